//! # Domain Traits
//!
//! Abstract interfaces for the external collaborators (chat, store, secrets,
//! generation). Implementations live in the Infrastructure layer; tests use
//! in-memory fakes.

use async_trait::async_trait;
use futures::stream::BoxStream;
use secrecy::SecretString;
use serde_json::Value;

use crate::domain::errors::{GenerationError, StoreError};
use crate::domain::types::{GenerationOptions, JobKind, StoreEvent};

/// Abstract interface for the chat network the bot talks on.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a plain message to a channel
    async fn send(&self, channel: &str, text: &str) -> Result<(), String>;
}

/// Live feed of document changes.
pub type ChangeStream = BoxStream<'static, Result<StoreEvent, StoreError>>;

/// Channel-keyed document store with field-level merge writes.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Point read. `None` when no document exists.
    async fn get(&self, id: &str) -> Result<Option<Value>, StoreError>;

    /// Merge `patch` into the document (JSON Merge Patch), creating it if absent.
    async fn merge(&self, id: &str, patch: Value) -> Result<(), StoreError>;

    /// Subscribe to added/modified/removed events for every document.
    async fn watch(&self) -> Result<ChangeStream, StoreError>;
}

/// Resolves named secrets to their current value.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn resolve(&self, name: &str) -> Result<Option<SecretString>, String>;
}

/// Media generation provider. Returns the URL of the produced audio.
#[async_trait]
pub trait GenerationApi: Send + Sync {
    async fn generate(
        &self,
        kind: JobKind,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, GenerationError>;
}
