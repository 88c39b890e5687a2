//! # Test Support
//!
//! In-memory fakes of the collaborator traits and polling helpers shared by
//! the unit tests.

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::application::channel_config::ChannelConfigCache;
use crate::application::delivery::DeliveryHub;
use crate::application::jobs::JobQueue;
use crate::application::outbound::OutboundQueue;
use crate::application::router::Services;
use crate::domain::config::QueueConfig;
use crate::domain::errors::{GenerationError, StoreError};
use crate::domain::traits::{ChangeStream, ChatTransport, DocumentStore, GenerationApi};
use crate::domain::types::{GenerationOptions, JobKind};
use crate::infrastructure::document_store::FileDocumentStore;
use crate::infrastructure::secrets::StaticSecretStore;

const WAIT_LIMIT: Duration = Duration::from_secs(5);
const POLL: Duration = Duration::from_millis(10);

/// Poll `check` until it holds or the wait limit passes.
pub async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(POLL).await;
    }
    check()
}

pub async fn wait_until_async<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(POLL).await;
    }
    check().await
}

/// Chat transport that records every successful send.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, String)>>,
    attempts: AtomicUsize,
    fail_on: Option<String>,
}

impl RecordingTransport {
    /// Fails any send whose text equals `text`.
    pub fn failing_on(text: &str) -> Self {
        Self {
            fail_on: Some(text.to_string()),
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.sent().len()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send(&self, channel: &str, text: &str) -> Result<(), String> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_on.as_deref() == Some(text) {
            return Err("send refused".to_string());
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((channel.to_string(), text.to_string()));
        }
        Ok(())
    }
}

/// Document store whose every call fails.
pub struct FailingStore;

#[async_trait]
impl DocumentStore for FailingStore {
    async fn get(&self, _id: &str) -> Result<Option<Value>, StoreError> {
        Err(StoreError::Unavailable("offline".to_string()))
    }

    async fn merge(&self, _id: &str, _patch: Value) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("offline".to_string()))
    }

    async fn watch(&self) -> Result<ChangeStream, StoreError> {
        Err(StoreError::Unavailable("offline".to_string()))
    }
}

/// Generation backend with scripted latency and outcomes. Tracks how many
/// calls overlap so single-flight can be asserted.
pub struct ScriptedGenerator {
    delay: Duration,
    failure: Option<String>,
    hang_on: Option<String>,
    calls: AtomicUsize,
    active: Arc<AtomicUsize>,
    max_active: AtomicUsize,
    last: Mutex<Option<(GenerationOptions, Value)>>,
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedGenerator {
    pub fn succeeding() -> Self {
        Self {
            delay: Duration::ZERO,
            failure: None,
            hang_on: None,
            calls: AtomicUsize::new(0),
            active: Arc::new(AtomicUsize::new(0)),
            max_active: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    pub fn failing(raw: &str) -> Self {
        Self {
            failure: Some(raw.to_string()),
            ..Self::succeeding()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Never answer for this exact prompt.
    pub fn hanging_on(mut self, prompt: &str) -> Self {
        self.hang_on = Some(prompt.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn last_options(&self) -> Option<GenerationOptions> {
        self.last
            .lock()
            .ok()
            .and_then(|l| l.as_ref().map(|(o, _)| o.clone()))
    }

    pub fn last_input(&self) -> Option<Value> {
        self.last
            .lock()
            .ok()
            .and_then(|l| l.as_ref().map(|(_, i)| i.clone()))
    }
}

#[async_trait]
impl GenerationApi for ScriptedGenerator {
    async fn generate(
        &self,
        kind: JobKind,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, GenerationError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let _guard = ActiveGuard(self.active.clone());
        if let Ok(mut last) = self.last.lock() {
            *last = Some((options.clone(), options.to_input(prompt)));
        }

        if self.hang_on.as_deref() == Some(prompt) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        tokio::time::sleep(self.delay).await;

        match &self.failure {
            Some(raw) => Err(GenerationError::Provider {
                raw: raw.clone(),
                error_type: None,
            }),
            None => Ok(format!("https://cdn.example/{}/{n}.mp3", kind.as_str())),
        }
    }
}

pub fn fast_queue() -> QueueConfig {
    QueueConfig {
        max_length: 8,
        timeout_secs: 1,
        cooldown_ms: 20,
        max_payload_chars: 100,
        announce: true,
    }
}

/// Fully wired components over in-memory collaborators, for channel `foo`.
pub fn services(transport: Arc<RecordingTransport>, generator: Arc<ScriptedGenerator>) -> Services {
    let outbound = OutboundQueue::new(transport, Duration::from_millis(1), 500);
    let configs = ChannelConfigCache::new(Arc::new(FileDocumentStore::in_memory()));
    let delivery = DeliveryHub::new(
        Arc::new(StaticSecretStore::from_pairs([("overlay-token-foo", "s3cret")])),
        "overlay-token-{channel}",
        vec!["foo".to_string()],
    );
    let queue = |kind| {
        JobQueue::new(
            kind,
            fast_queue(),
            configs.clone(),
            generator.clone(),
            outbound.clone(),
            delivery.clone(),
        )
    };
    Services {
        speech: queue(JobKind::Speech),
        music: queue(JobKind::Music),
        configs: configs.clone(),
        outbound: outbound.clone(),
        delivery: delivery.clone(),
    }
}
