//! # Generation Backends
//!
//! Implementations of [`GenerationApi`]: the hosted predictions API and an
//! external-script runner. [`build`] picks one from the config.

pub mod replicate;
pub mod script;

use anyhow::Result;
use std::sync::Arc;

use crate::domain::config::{GenerationBackend, GenerationConfig};
use crate::domain::traits::GenerationApi;

pub fn build(config: &GenerationConfig) -> Result<Arc<dyn GenerationApi>> {
    let api: Arc<dyn GenerationApi> = match config.backend {
        GenerationBackend::Replicate => {
            Arc::new(replicate::ReplicateGenerator::from_config(&config.replicate)?)
        }
        GenerationBackend::Script => Arc::new(script::ScriptGenerator::new(config.script.clone())),
    };
    tracing::info!(backend = ?config.backend, "Generation backend ready");
    Ok(api)
}
