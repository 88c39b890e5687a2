//! # Delivery Fan-Out
//!
//! Registry of live overlay connections per channel. Pushes play/stop
//! directives to every open connection of a channel and evicts connections
//! that stop answering liveness pings.
//!
//! A connection is represented by the sending half of its write channel; the
//! socket task owns the other half and turns [`ClientMessage`]s into frames.

use secrecy::ExposeSecret;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;

use crate::domain::protocol::{CLOSE_POLICY_VIOLATION, ServerFrame};
use crate::domain::traits::SecretStore;
use crate::domain::types::{ChannelId, Directive};

/// What the socket write loop is asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Frame(String),
    Ping,
    Close { code: u16, reason: String },
}

/// Server-side handle to one overlay connection.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    conn_id: String,
    sender: mpsc::UnboundedSender<ClientMessage>,
}

impl ClientHandle {
    pub fn new(sender: mpsc::UnboundedSender<ClientMessage>) -> Self {
        Self {
            conn_id: uuid::Uuid::new_v4().to_string(),
            sender,
        }
    }

    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    pub fn send_frame(&self, frame: &ServerFrame) -> bool {
        self.sender.send(ClientMessage::Frame(frame.to_json())).is_ok()
    }

    fn ping(&self) -> bool {
        self.sender.send(ClientMessage::Ping).is_ok()
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.sender.send(ClientMessage::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegisterError {
    #[error("channel not active")]
    ChannelNotActive,
    #[error("authentication failed")]
    AuthenticationFailed,
}

struct Registration {
    handle: ClientHandle,
    last_ack: Instant,
    awaiting_ack: bool,
}

type Registry = HashMap<ChannelId, HashMap<String, Registration>>;

#[derive(Clone)]
pub struct DeliveryHub {
    registry: Arc<RwLock<Registry>>,
    active: Arc<RwLock<HashSet<ChannelId>>>,
    secrets: Arc<dyn SecretStore>,
    secret_name: String,
}

impl DeliveryHub {
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        secret_name: &str,
        channels: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            registry: Arc::new(RwLock::new(HashMap::new())),
            active: Arc::new(RwLock::new(channels.into_iter().collect())),
            secrets,
            secret_name: secret_name.to_string(),
        }
    }

    /// Authenticate and register a connection for `channel`. On refusal the
    /// connection is closed with a policy-violation code.
    pub async fn register(
        &self,
        channel: &str,
        handle: ClientHandle,
        token: &str,
    ) -> Result<(), RegisterError> {
        if !self.is_active(channel).await {
            tracing::warn!(channel, conn_id = handle.conn_id(), "Overlay refused: channel not active");
            handle.close(CLOSE_POLICY_VIOLATION, "channel not active");
            return Err(RegisterError::ChannelNotActive);
        }

        if !self.token_matches(channel, token).await {
            tracing::warn!(channel, conn_id = handle.conn_id(), "Overlay refused: authentication failed");
            handle.close(CLOSE_POLICY_VIOLATION, "authentication failed");
            return Err(RegisterError::AuthenticationFailed);
        }

        let mut registry = self.registry.write().await;
        // Deactivation may have raced the secret lookup.
        if !self.active.read().await.contains(channel) {
            handle.close(CLOSE_POLICY_VIOLATION, "channel not active");
            return Err(RegisterError::ChannelNotActive);
        }

        handle.send_frame(&ServerFrame::Registered {
            channel: channel.to_string(),
        });
        let conn_id = handle.conn_id().to_string();
        registry.entry(channel.to_string()).or_default().insert(
            conn_id.clone(),
            Registration {
                handle,
                last_ack: Instant::now(),
                awaiting_ack: false,
            },
        );
        tracing::info!(channel, conn_id = %conn_id, "Overlay client registered");
        Ok(())
    }

    /// Push a directive to every open connection of `channel`. Returns how many
    /// connections it reached.
    pub async fn deliver(&self, channel: &str, directive: Directive) -> usize {
        let frame = match directive {
            Directive::Play { url } => ServerFrame::PlayAudio { url },
            Directive::Stop => ServerFrame::StopAudio,
        };

        let registry = self.registry.read().await;
        let Some(connections) = registry.get(channel).filter(|c| !c.is_empty()) else {
            tracing::info!(channel, "No overlay client connected, nothing delivered");
            return 0;
        };

        let mut reached = 0;
        for (conn_id, registration) in connections {
            if !registration.handle.is_open() {
                tracing::debug!(channel, conn_id = %conn_id, "Skipping closed overlay connection");
                continue;
            }
            if registration.handle.send_frame(&frame) {
                reached += 1;
            } else {
                tracing::debug!(channel, conn_id = %conn_id, "Overlay connection closed mid-send");
            }
        }
        tracing::info!(channel, reached, "Delivered overlay directive");
        reached
    }

    /// Record a liveness acknowledgement (pong or client ping).
    pub async fn mark_alive(&self, channel: &str, conn_id: &str) {
        let mut registry = self.registry.write().await;
        if let Some(registration) = registry.get_mut(channel).and_then(|c| c.get_mut(conn_id)) {
            registration.awaiting_ack = false;
            registration.last_ack = Instant::now();
        }
    }

    pub async fn unregister(&self, channel: &str, conn_id: &str) -> bool {
        let mut registry = self.registry.write().await;
        let Some(connections) = registry.get_mut(channel) else {
            return false;
        };
        let removed = connections.remove(conn_id).is_some();
        if connections.is_empty() {
            registry.remove(channel);
        }
        if removed {
            tracing::info!(channel, conn_id, "Overlay client unregistered");
        }
        removed
    }

    /// Terminate connections that did not acknowledge the previous ping, then
    /// ping the rest. Returns the number of terminated connections.
    pub async fn sweep(&self) -> usize {
        let mut registry = self.registry.write().await;
        let mut terminated = 0;

        for (channel, connections) in registry.iter_mut() {
            connections.retain(|conn_id, registration| {
                if registration.awaiting_ack || !registration.handle.is_open() {
                    tracing::info!(
                        channel = %channel,
                        conn_id = %conn_id,
                        silent_for = ?registration.last_ack.elapsed(),
                        "Terminating unresponsive overlay connection"
                    );
                    registration.handle.close(CLOSE_POLICY_VIOLATION, "liveness check failed");
                    terminated += 1;
                    return false;
                }
                registration.awaiting_ack = true;
                registration.handle.ping()
            });
        }
        registry.retain(|_, connections| !connections.is_empty());
        terminated
    }

    pub async fn connection_count(&self, channel: &str) -> usize {
        self.registry
            .read()
            .await
            .get(channel)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    pub async fn registered_channels(&self) -> usize {
        self.registry.read().await.len()
    }

    pub async fn is_active(&self, channel: &str) -> bool {
        self.active.read().await.contains(channel)
    }

    pub async fn activate(&self, channel: &str) {
        self.active.write().await.insert(channel.to_string());
    }

    /// Remove `channel` from the active set and drop all its connections.
    pub async fn deactivate(&self, channel: &str) {
        self.active.write().await.remove(channel);
        if let Some(connections) = self.registry.write().await.remove(channel) {
            for registration in connections.values() {
                registration.handle.close(CLOSE_POLICY_VIOLATION, "channel deactivated");
            }
            tracing::info!(channel, dropped = connections.len(), "Channel deactivated");
        }
    }

    async fn token_matches(&self, channel: &str, token: &str) -> bool {
        let name = self.secret_name.replace("{channel}", channel);
        match self.secrets.resolve(&name).await {
            Ok(Some(secret)) => safe_equal(token, secret.expose_secret()),
            Ok(None) => {
                tracing::warn!(channel, secret = %name, "No delivery secret configured for channel");
                false
            }
            Err(e) => {
                tracing::warn!(channel, secret = %name, "Failed to resolve delivery secret: {}", e);
                false
            }
        }
    }
}

/// Periodically run [`DeliveryHub::sweep`].
pub fn spawn_liveness_sweeper(hub: DeliveryHub, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let terminated = hub.sweep().await;
            if terminated > 0 {
                tracing::info!(terminated, "Liveness sweep terminated overlay connections");
            }
            let channels = hub.registered_channels().await;
            tracing::debug!(channels, "Liveness sweep done");
        }
    })
}

fn safe_equal(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let diff = a
        .as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y));
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::secrets::StaticSecretStore;

    fn hub() -> DeliveryHub {
        let secrets = StaticSecretStore::from_pairs([("overlay-token-foo", "s3cret")]);
        DeliveryHub::new(
            Arc::new(secrets),
            "overlay-token-{channel}",
            vec!["foo".to_string(), "bar".to_string()],
        )
    }

    fn client() -> (ClientHandle, mpsc::UnboundedReceiver<ClientMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ClientHandle::new(tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ClientMessage>) -> Vec<ClientMessage> {
        let mut out = Vec::new();
        while let Ok(m) = rx.try_recv() {
            out.push(m);
        }
        out
    }

    #[test]
    fn test_safe_equal() {
        assert!(safe_equal("abc", "abc"));
        assert!(!safe_equal("abc", "abd"));
        assert!(!safe_equal("abc", "abcd"));
    }

    #[tokio::test]
    async fn test_register_sends_ack() {
        let hub = hub();
        let (handle, mut rx) = client();
        hub.register("foo", handle, "s3cret").await.unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![ClientMessage::Frame(
                r#"{"type":"registered","channel":"foo"}"#.to_string()
            )]
        );
        assert_eq!(hub.connection_count("foo").await, 1);
    }

    #[tokio::test]
    async fn test_wrong_token_closes_and_never_registers() {
        let hub = hub();
        let (handle, mut rx) = client();
        assert_eq!(
            hub.register("foo", handle, "guess").await,
            Err(RegisterError::AuthenticationFailed)
        );
        assert_eq!(
            drain(&mut rx),
            vec![ClientMessage::Close {
                code: 1008,
                reason: "authentication failed".to_string()
            }]
        );
        assert_eq!(hub.connection_count("foo").await, 0);
        assert_eq!(
            hub.deliver("foo", Directive::Play { url: "u".into() }).await,
            0
        );
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_missing_secret_and_inactive_channel_are_refused() {
        let hub = hub();
        let (handle, _rx) = client();
        assert_eq!(
            hub.register("bar", handle, "anything").await,
            Err(RegisterError::AuthenticationFailed)
        );
        let (handle, mut rx) = client();
        assert_eq!(
            hub.register("baz", handle, "s3cret").await,
            Err(RegisterError::ChannelNotActive)
        );
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [ClientMessage::Close { code: 1008, .. }]
        ));
    }

    #[tokio::test]
    async fn test_deliver_fans_out_and_skips_closed() {
        let hub = hub();
        let (a, mut rx_a) = client();
        let (b, mut rx_b) = client();
        let (c, rx_c) = client();
        hub.register("foo", a, "s3cret").await.unwrap();
        hub.register("foo", b, "s3cret").await.unwrap();
        hub.register("foo", c, "s3cret").await.unwrap();
        drop(rx_c);
        drain(&mut rx_a);
        drain(&mut rx_b);

        let reached = hub
            .deliver("foo", Directive::Play { url: "https://cdn/x.mp3".into() })
            .await;
        assert_eq!(reached, 2);
        let expected = ClientMessage::Frame(r#"{"type":"playAudio","url":"https://cdn/x.mp3"}"#.into());
        assert_eq!(drain(&mut rx_a), vec![expected.clone()]);
        assert_eq!(drain(&mut rx_b), vec![expected]);

        assert_eq!(hub.deliver("foo", Directive::Stop).await, 2);
        assert_eq!(
            drain(&mut rx_a),
            vec![ClientMessage::Frame(r#"{"type":"stopAudio"}"#.into())]
        );
    }

    #[tokio::test]
    async fn test_deliver_to_empty_channel_is_noop() {
        let hub = hub();
        assert_eq!(hub.deliver("foo", Directive::Stop).await, 0);
    }

    #[tokio::test]
    async fn test_unregister_removes_empty_channel_entry() {
        let hub = hub();
        let (handle, _rx) = client();
        let conn_id = handle.conn_id().to_string();
        hub.register("foo", handle, "s3cret").await.unwrap();
        assert_eq!(hub.registered_channels().await, 1);

        assert!(hub.unregister("foo", &conn_id).await);
        assert_eq!(hub.registered_channels().await, 0);
        assert!(!hub.unregister("foo", &conn_id).await);
    }

    #[tokio::test]
    async fn test_sweep_terminates_silent_connections() {
        let hub = hub();
        let (alive, mut rx_alive) = client();
        let (silent, mut rx_silent) = client();
        let alive_id = alive.conn_id().to_string();
        hub.register("foo", alive, "s3cret").await.unwrap();
        hub.register("foo", silent, "s3cret").await.unwrap();
        drain(&mut rx_alive);
        drain(&mut rx_silent);

        // First sweep pings everyone.
        assert_eq!(hub.sweep().await, 0);
        assert_eq!(drain(&mut rx_alive), vec![ClientMessage::Ping]);
        assert_eq!(drain(&mut rx_silent), vec![ClientMessage::Ping]);

        hub.mark_alive("foo", &alive_id).await;

        // Second sweep drops the one that never answered.
        assert_eq!(hub.sweep().await, 1);
        assert_eq!(hub.connection_count("foo").await, 1);
        assert!(matches!(
            drain(&mut rx_silent).as_slice(),
            [ClientMessage::Close { code: 1008, .. }]
        ));

        // And the last one goes too once it stops answering.
        assert_eq!(hub.sweep().await, 1);
        assert_eq!(hub.registered_channels().await, 0);
    }

    #[tokio::test]
    async fn test_sweeper_task_pings_then_closes() {
        let hub = hub();
        let (handle, mut rx) = client();
        hub.register("foo", handle, "s3cret").await.unwrap();
        drain(&mut rx);

        let sweeper = spawn_liveness_sweeper(hub.clone(), Duration::from_millis(20));

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        assert_eq!(first.unwrap(), Some(ClientMessage::Ping));
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        assert!(matches!(
            second.unwrap(),
            Some(ClientMessage::Close { code: 1008, .. })
        ));
        assert_eq!(hub.registered_channels().await, 0);

        sweeper.abort();
    }

    #[tokio::test]
    async fn test_deactivate_drops_connections() {
        let hub = hub();
        let (handle, mut rx) = client();
        hub.register("foo", handle, "s3cret").await.unwrap();
        drain(&mut rx);

        hub.deactivate("foo").await;
        assert!(!hub.is_active("foo").await);
        assert_eq!(hub.connection_count("foo").await, 0);
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [ClientMessage::Close { .. }]
        ));

        hub.activate("foo").await;
        let (handle, _rx) = client();
        assert!(hub.register("foo", handle, "s3cret").await.is_ok());
    }
}
