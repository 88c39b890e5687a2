//! # Infrastructure Layer
//!
//! Handles interactions with external systems and services.
//! Implements the traits defined in the Domain layer (ChatTransport, DocumentStore,
//! SecretStore, GenerationApi).

pub mod document_store;
pub mod generation;
pub mod matrix;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod secrets;
