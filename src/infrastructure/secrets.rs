//! # Secret Stores
//!
//! Resolve per-channel delivery tokens. [`StaticSecretStore`] serves the
//! `system.secrets` map from the config file; [`EnvSecretStore`] reads the
//! process environment, and the two can be chained.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::traits::SecretStore;

#[derive(Default)]
pub struct StaticSecretStore {
    secrets: HashMap<String, SecretString>,
}

impl StaticSecretStore {
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            secrets: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), SecretString::new(v.into())))
                .collect(),
        }
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn resolve(&self, name: &str) -> Result<Option<SecretString>, String> {
        Ok(self
            .secrets
            .get(name)
            .map(|s| SecretString::new(s.expose_secret().clone())))
    }
}

/// Reads secrets from environment variables. The name is upper-cased and
/// every non-alphanumeric character becomes `_`, so `overlay-token-!abc:hs`
/// is looked up as `OVERLAY_TOKEN__ABC_HS`.
#[derive(Default)]
pub struct EnvSecretStore;

impl EnvSecretStore {
    pub fn variable_name(name: &str) -> String {
        name.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect()
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn resolve(&self, name: &str) -> Result<Option<SecretString>, String> {
        match std::env::var(Self::variable_name(name)) {
            Ok(value) if !value.is_empty() => Ok(Some(SecretString::new(value))),
            Ok(_) | Err(std::env::VarError::NotPresent) => Ok(None),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Tries each store in order and returns the first hit.
pub struct ChainedSecretStore {
    stores: Vec<Arc<dyn SecretStore>>,
}

impl ChainedSecretStore {
    pub fn new(stores: Vec<Arc<dyn SecretStore>>) -> Self {
        Self { stores }
    }
}

#[async_trait]
impl SecretStore for ChainedSecretStore {
    async fn resolve(&self, name: &str) -> Result<Option<SecretString>, String> {
        for store in &self.stores {
            if let Some(secret) = store.resolve(name).await? {
                return Ok(Some(secret));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_name() {
        assert_eq!(
            EnvSecretStore::variable_name("overlay-token-!abc:hs"),
            "OVERLAY_TOKEN__ABC_HS"
        );
    }

    #[tokio::test]
    async fn test_chain_prefers_first_store() {
        let chain = ChainedSecretStore::new(vec![
            Arc::new(StaticSecretStore::from_pairs([("a", "first")])),
            Arc::new(StaticSecretStore::from_pairs([("a", "second"), ("b", "only")])),
        ]);
        let a = chain.resolve("a").await.unwrap().unwrap();
        assert_eq!(a.expose_secret(), "first");
        let b = chain.resolve("b").await.unwrap().unwrap();
        assert_eq!(b.expose_secret(), "only");
        assert!(chain.resolve("c").await.unwrap().is_none());
    }
}
