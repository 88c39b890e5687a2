//! # Redis Document Store
//!
//! Channel documents stored as JSON strings under `{prefix}:{channel}`. Every
//! write is published on `{prefix}:changes` so all bot processes sharing the
//! database see it through [`DocumentStore::watch`].

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::errors::StoreError;
use crate::domain::json::merge_patch;
use crate::domain::traits::{ChangeStream, DocumentStore};
use crate::domain::types::{ChangeKind, StoreEvent};

#[derive(Debug, Serialize, Deserialize)]
struct WireEvent {
    kind: String,
    id: String,
    #[serde(default)]
    data: Option<Value>,
}

fn encode_event(event: &StoreEvent) -> Result<String, StoreError> {
    let kind = match event.kind {
        ChangeKind::Added => "added",
        ChangeKind::Modified => "modified",
        ChangeKind::Removed => "removed",
    };
    Ok(serde_json::to_string(&WireEvent {
        kind: kind.to_string(),
        id: event.id.clone(),
        data: event.data.clone(),
    })?)
}

fn decode_event(payload: &str) -> Result<StoreEvent, StoreError> {
    let wire: WireEvent = serde_json::from_str(payload)?;
    let kind = match wire.kind.as_str() {
        "added" => ChangeKind::Added,
        "modified" => ChangeKind::Modified,
        "removed" => ChangeKind::Removed,
        other => {
            return Err(StoreError::Malformed {
                id: wire.id,
                reason: format!("unknown change kind '{other}'"),
            });
        }
    };
    Ok(StoreEvent {
        kind,
        id: wire.id,
        data: wire.data,
    })
}

pub struct RedisDocumentStore {
    client: redis::Client,
    conn: ConnectionManager,
    prefix: String,
}

impl RedisDocumentStore {
    pub async fn connect(url: &str, prefix: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        tracing::info!(prefix, "Connected to Redis document store");
        Ok(Self {
            client,
            conn,
            prefix: prefix.to_string(),
        })
    }

    fn key(&self, id: &str) -> String {
        format!("{}:{}", self.prefix, id)
    }

    fn changes_channel(&self) -> String {
        format!("{}:changes", self.prefix)
    }
}

#[async_trait]
impl DocumentStore for RedisDocumentStore {
    async fn get(&self, id: &str) -> Result<Option<Value>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.key(id)).await?;
        raw.map(|s| {
            serde_json::from_str(&s).map_err(|e| StoreError::Malformed {
                id: id.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
    }

    // TODO: run the read-merge-write as a server-side script so two bot
    // processes writing different fields of one channel cannot interleave.
    async fn merge(&self, id: &str, patch: Value) -> Result<(), StoreError> {
        let existing = self.get(id).await?;
        let kind = if existing.is_some() {
            ChangeKind::Modified
        } else {
            ChangeKind::Added
        };
        let mut document = existing.unwrap_or_else(|| Value::Object(Default::default()));
        merge_patch(&mut document, &patch);

        let mut conn = self.conn.clone();
        let _: () = conn.set(self.key(id), serde_json::to_string(&document)?).await?;

        let event = encode_event(&StoreEvent {
            kind,
            id: id.to_string(),
            data: Some(document),
        })?;
        let _: i64 = conn.publish(self.changes_channel(), event).await?;
        Ok(())
    }

    async fn watch(&self) -> Result<ChangeStream, StoreError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(self.changes_channel()).await?;

        let stream = async_stream::stream! {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!("Unreadable change notification: {}", e);
                        continue;
                    }
                };
                match decode_event(&payload) {
                    Ok(event) => yield Ok(event),
                    Err(e) => tracing::warn!("Skipping malformed change notification: {}", e),
                }
            }
        };
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_event_round_trip() {
        let event = StoreEvent {
            kind: ChangeKind::Modified,
            id: "foo".to_string(),
            data: Some(json!({ "pitch": 3 })),
        };
        assert_eq!(decode_event(&encode_event(&event).unwrap()).unwrap(), event);
    }

    #[test]
    fn test_unknown_kind_is_malformed() {
        let payload = r#"{"kind":"exploded","id":"foo"}"#;
        assert!(matches!(
            decode_event(payload),
            Err(StoreError::Malformed { .. })
        ));
    }
}
