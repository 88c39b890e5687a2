//! # Domain Layer
//!
//! Channel settings, generation jobs, overlay frames and the collaborator
//! traits every other layer is written against. No I/O lives here.

pub mod config;
pub mod errors;
pub mod json;
pub mod protocol;
pub mod traits;
pub mod types;
