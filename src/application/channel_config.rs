//! # Channel Configuration Cache
//!
//! In-memory mirror of the per-channel settings documents.
//!
//! Reads never fail: a missing document or a store error yields the system
//! defaults, and stored documents are overlaid on the defaults so fields added
//! later are always populated. Writes go to the store as single-field merges and
//! are applied to the cache right away without waiting for the change feed.
//! Concurrent writers are last-writer-wins per field.

use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::json::{merge_patch, overlay};
use crate::domain::traits::DocumentStore;
use crate::domain::types::{ChangeKind, ChannelConfig, ChannelId, StoreEvent, UserPreference};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown setting '{0}'")]
    UnknownKey(String),
    #[error("{0}")]
    InvalidValue(String),
}

#[derive(Clone)]
pub struct ChannelConfigCache {
    store: Arc<dyn DocumentStore>,
    entries: Arc<RwLock<HashMap<ChannelId, ChannelConfig>>>,
}

impl ChannelConfigCache {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        self.store.clone()
    }

    /// Settings for `channel`, always fully populated.
    pub async fn get(&self, channel: &str) -> ChannelConfig {
        if let Some(config) = self.entries.read().await.get(channel) {
            return config.clone();
        }

        match self.store.get(channel).await {
            Ok(document) => {
                let config = materialize(channel, document.as_ref());
                // A change-feed update may have landed while we were reading.
                let mut entries = self.entries.write().await;
                entries.entry(channel.to_string()).or_insert(config).clone()
            }
            Err(e) => {
                tracing::warn!(channel, "Config read failed, using defaults: {}", e);
                ChannelConfig::default()
            }
        }
    }

    /// Write one top-level field. `Ok(false)` means the store write failed but
    /// the cached value was still updated.
    pub async fn set(&self, channel: &str, key: &str, value: Value) -> Result<bool, ConfigError> {
        if !is_known_key(key) {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }
        let mut patch = serde_json::Map::new();
        patch.insert(key.to_string(), value);
        self.write_patch(channel, Value::Object(patch)).await
    }

    /// Set one field of one user's preferences without touching other users.
    /// A `null` value removes the override.
    pub async fn set_user_preference(
        &self,
        channel: &str,
        user: &str,
        field: &str,
        value: Value,
    ) -> Result<bool, ConfigError> {
        if !UserPreference::FIELDS.contains(&field) {
            return Err(ConfigError::UnknownKey(field.to_string()));
        }
        let patch = json!({ "userPreferences": { user.to_lowercase(): { field: value } } });
        self.write_patch(channel, patch).await
    }

    pub async fn clear_user_preference(&self, channel: &str, user: &str) -> Result<bool, ConfigError> {
        let patch = json!({ "userPreferences": { user.to_lowercase(): null } });
        self.write_patch(channel, patch).await
    }

    pub async fn add_ignored_user(&self, channel: &str, user: &str) -> Result<bool, ConfigError> {
        let mut ignored = self.get(channel).await.ignored_users;
        ignored.insert(user.to_lowercase());
        self.set(channel, "ignoredUsers", json!(ignored)).await
    }

    pub async fn remove_ignored_user(&self, channel: &str, user: &str) -> Result<bool, ConfigError> {
        let mut ignored = self.get(channel).await.ignored_users;
        ignored.remove(&user.to_lowercase());
        self.set(channel, "ignoredUsers", json!(ignored)).await
    }

    /// Mirror one change-feed event into the cache.
    pub async fn apply_change(&self, event: StoreEvent) {
        let mut entries = self.entries.write().await;
        match (event.kind, event.data) {
            (ChangeKind::Removed, _) => {
                entries.remove(&event.id);
                tracing::debug!(channel = %event.id, "Config removed from store, evicted");
            }
            (_, Some(data)) => {
                let config = materialize(&event.id, Some(&data));
                entries.insert(event.id.clone(), config);
                tracing::debug!(channel = %event.id, "Config refreshed from change feed");
            }
            (kind, None) => {
                tracing::warn!(channel = %event.id, ?kind, "Change event without data ignored");
            }
        }
    }

    #[cfg(test)]
    pub async fn cached_channels(&self) -> usize {
        self.entries.read().await.len()
    }

    async fn write_patch(&self, channel: &str, patch: Value) -> Result<bool, ConfigError> {
        let current = self.get(channel).await;
        // Validate before anything is written.
        apply_patch(&current, &patch)?;

        let saved = match self.store.merge(channel, patch.clone()).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(channel, "Config write failed, keeping local value: {}", e);
                false
            }
        };

        let mut entries = self.entries.write().await;
        let base = entries.get(channel).cloned().unwrap_or(current);
        let updated = apply_patch(&base, &patch)?;
        entries.insert(channel.to_string(), updated);
        Ok(saved)
    }
}

fn defaults_value() -> Value {
    serde_json::to_value(ChannelConfig::default()).unwrap_or_else(|_| json!({}))
}

fn is_known_key(key: &str) -> bool {
    defaults_value()
        .as_object()
        .is_some_and(|fields| fields.contains_key(key))
}

/// Overlay a stored document (if any) on the system defaults, one top-level
/// field at a time. A field that does not deserialize keeps its default;
/// out-of-range numbers are clamped.
fn materialize(channel: &str, document: Option<&Value>) -> ChannelConfig {
    let Some(document) = document else {
        return ChannelConfig::default();
    };
    let Some(fields) = document.as_object() else {
        tracing::warn!(channel, "Stored config is not an object, using defaults");
        return ChannelConfig::default();
    };

    let mut merged = defaults_value();
    for (key, value) in fields {
        let mut candidate = merged.clone();
        let mut single = serde_json::Map::new();
        single.insert(key.clone(), value.clone());
        overlay(&mut candidate, &Value::Object(single));
        match serde_json::from_value::<ChannelConfig>(candidate.clone()) {
            Ok(_) => merged = candidate,
            Err(e) => {
                tracing::warn!(channel, field = %key, "Ignoring malformed stored setting: {}", e)
            }
        }
    }

    let mut config = match serde_json::from_value::<ChannelConfig>(merged) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(channel, "Stored config is malformed, using defaults: {}", e);
            return ChannelConfig::default();
        }
    };
    let clamped = config.sanitize();
    if !clamped.is_empty() {
        tracing::warn!(channel, ?clamped, "Stored settings out of range, clamped");
    }
    config
}

fn apply_patch(config: &ChannelConfig, patch: &Value) -> Result<ChannelConfig, ConfigError> {
    let mut value =
        serde_json::to_value(config).map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
    merge_patch(&mut value, patch);
    let updated: ChannelConfig =
        serde_json::from_value(value).map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
    updated
        .validate_fields(patch)
        .map_err(ConfigError::InvalidValue)?;
    Ok(updated)
}
