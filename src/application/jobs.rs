//! # Generation Job Queue
//!
//! Per-channel FIFO of generation requests with at most one job in flight per
//! channel. One instance serves speech, another music.
//!
//! Each channel moves `Idle -> Processing -> Idle`. After a job finishes the
//! next one is picked up only after a cool-down, so the provider is never
//! hammered in a tight loop. All check-then-set steps on a channel's state
//! happen inside a single lock acquisition.

use chrono::Utc;
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};

use crate::application::channel_config::ChannelConfigCache;
use crate::application::delivery::DeliveryHub;
use crate::application::failures::categorize;
use crate::application::outbound::OutboundQueue;
use crate::domain::config::QueueConfig;
use crate::domain::errors::GenerationError;
use crate::domain::traits::GenerationApi;
use crate::domain::types::{
    ChannelId, Directive, GenerationJob, GenerationOptions, GenerationRequest, JobKind,
    PayloadIssue, QueueStatus, RejectReason,
};
use crate::strings::messages;

#[derive(Default)]
struct ChannelQueue {
    pending: VecDeque<GenerationJob>,
    in_flight: Option<GenerationJob>,
    /// A cool-down pickup is scheduled; new jobs must wait for it.
    pickup_scheduled: bool,
}

impl ChannelQueue {
    fn is_idle(&self) -> bool {
        self.in_flight.is_none() && !self.pickup_scheduled
    }

    fn len(&self) -> usize {
        self.pending.len() + usize::from(self.in_flight.is_some())
    }

    fn is_vacant(&self) -> bool {
        self.is_idle() && self.pending.is_empty()
    }
}

#[derive(Clone)]
pub struct JobQueue {
    kind: JobKind,
    settings: QueueConfig,
    channels: Arc<Mutex<HashMap<ChannelId, ChannelQueue>>>,
    configs: ChannelConfigCache,
    api: Arc<dyn GenerationApi>,
    outbound: OutboundQueue,
    delivery: DeliveryHub,
}

impl JobQueue {
    pub fn new(
        kind: JobKind,
        settings: QueueConfig,
        configs: ChannelConfigCache,
        api: Arc<dyn GenerationApi>,
        outbound: OutboundQueue,
        delivery: DeliveryHub,
    ) -> Self {
        Self {
            kind,
            settings,
            channels: Arc::new(Mutex::new(HashMap::new())),
            configs,
            api,
            outbound,
            delivery,
        }
    }

    /// Accept a request into the channel's queue. Returns its 1-based position
    /// (counting the in-flight job), or why it was refused.
    pub async fn enqueue(&self, request: GenerationRequest) -> Result<usize, RejectReason> {
        let config = self.configs.get(&request.channel).await;

        if !config.is_enabled(self.kind) {
            return Err(RejectReason::Disabled);
        }
        if config.is_ignored(&request.user) {
            tracing::debug!(channel = %request.channel, user = %request.user, "Dropping request from ignored user");
            return Err(RejectReason::Ignored);
        }
        let payload = self
            .check_payload(&request.text)
            .map_err(RejectReason::Invalid)?;

        let options = match self.kind {
            JobKind::Speech => GenerationOptions::Speech(config.resolve_voice(&request.user)),
            JobKind::Music => GenerationOptions::Music(request.music.clone()),
        };
        let job = GenerationJob {
            id: uuid::Uuid::new_v4().to_string(),
            kind: self.kind,
            channel: request.channel.clone(),
            user: request.user.clone(),
            payload,
            options,
            enqueued_at: Utc::now(),
        };

        let (position, start) = {
            let mut channels = self.channels.lock().await;
            let queue = channels.entry(request.channel.clone()).or_default();
            if queue.len() >= self.settings.max_length {
                return Err(RejectReason::QueueFull {
                    max: self.settings.max_length,
                });
            }
            queue.pending.push_back(job);
            let position = queue.len();
            let start = if queue.is_idle() {
                queue.in_flight = queue.pending.pop_front();
                queue.in_flight.clone()
            } else {
                None
            };
            (position, start)
        };

        tracing::info!(
            kind = self.kind.as_str(),
            channel = %request.channel,
            user = %request.user,
            position,
            "Generation job queued"
        );
        if let Some(job) = start {
            self.spawn_job(job);
        }
        Ok(position)
    }

    /// Drop pending jobs (not the in-flight one). Returns how many were removed.
    pub async fn clear(&self, channel: &str) -> usize {
        let mut channels = self.channels.lock().await;
        let Some(queue) = channels.get_mut(channel) else {
            return 0;
        };
        let removed = queue.pending.len();
        queue.pending.clear();
        if queue.is_vacant() {
            channels.remove(channel);
        }
        if removed > 0 {
            tracing::info!(kind = self.kind.as_str(), channel, removed, "Cleared pending jobs");
        }
        removed
    }

    pub async fn status(&self, channel: &str) -> QueueStatus {
        let channels = self.channels.lock().await;
        match channels.get(channel) {
            Some(queue) => QueueStatus {
                pending: queue.pending.len(),
                in_flight: queue.in_flight.is_some(),
                current_user: queue.in_flight.as_ref().map(|j| j.user.clone()),
            },
            None => QueueStatus::default(),
        }
    }

    fn check_payload(&self, text: &str) -> Result<String, PayloadIssue> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PayloadIssue::Empty);
        }
        let max = self.settings.max_payload_chars;
        if text.chars().count() > max {
            return Err(PayloadIssue::TooLong { max });
        }
        if link_pattern().is_some_and(|re| re.is_match(text)) {
            return Err(PayloadIssue::ContainsLink);
        }
        Ok(text.to_string())
    }

    fn spawn_job(&self, job: GenerationJob) {
        let this = self.clone();
        tokio::spawn(async move {
            let channel = job.channel.clone();
            let worker = this.clone();
            // A panicking job must not leave the channel stuck in Processing.
            if let Err(e) = tokio::spawn(async move { worker.run(job).await }).await {
                tracing::error!(channel = %channel, "Generation job aborted: {}", e);
            }
            this.finish(&channel).await;
        });
    }

    async fn run(&self, job: GenerationJob) {
        tracing::info!(
            kind = self.kind.as_str(),
            channel = %job.channel,
            user = %job.user,
            job_id = %job.id,
            waited_ms = (Utc::now() - job.enqueued_at).num_milliseconds(),
            "Generation job started"
        );
        if self.settings.announce {
            self.outbound
                .enqueue(&job.channel, &messages::job_started(self.kind, &job.user, &job.payload))
                .await;
        }

        let result = match timeout(
            self.settings.timeout(),
            self.api.generate(self.kind, &job.payload, &job.options),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout(self.settings.timeout_secs)),
        };

        match result {
            Ok(url) => {
                let reached = self
                    .delivery
                    .deliver(&job.channel, Directive::Play { url: url.clone() })
                    .await;
                tracing::info!(channel = %job.channel, job_id = %job.id, url = %url, reached, "Generation job finished");
                if self.settings.announce {
                    self.outbound
                        .enqueue(&job.channel, &messages::job_finished(self.kind, &job.user, reached))
                        .await;
                }
            }
            Err(e) => {
                let category = categorize(&e.raw());
                tracing::warn!(
                    channel = %job.channel,
                    job_id = %job.id,
                    error_type = e.error_type(),
                    category = category.code(),
                    "Generation job failed: {}",
                    e
                );
                self.outbound
                    .enqueue(&job.channel, &messages::job_failed(&job.user, category.user_message()))
                    .await;
            }
        }
    }

    /// Back to Idle; schedule the next pickup after the cool-down if needed.
    async fn finish(&self, channel: &str) {
        let schedule = {
            let mut channels = self.channels.lock().await;
            match channels.get_mut(channel) {
                Some(queue) => {
                    queue.in_flight = None;
                    if queue.pending.is_empty() {
                        channels.remove(channel);
                        false
                    } else {
                        queue.pickup_scheduled = true;
                        true
                    }
                }
                None => false,
            }
        };

        if schedule {
            let this = self.clone();
            let channel = channel.to_string();
            let cooldown = self.settings.cooldown();
            tokio::spawn(async move {
                sleep(cooldown).await;
                this.pickup(&channel).await;
            });
        }
    }

    async fn pickup(&self, channel: &str) {
        let next = {
            let mut channels = self.channels.lock().await;
            let Some(queue) = channels.get_mut(channel) else {
                return;
            };
            queue.pickup_scheduled = false;
            if queue.in_flight.is_some() {
                return;
            }
            match queue.pending.pop_front() {
                Some(job) => {
                    queue.in_flight = Some(job.clone());
                    Some(job)
                }
                None => {
                    channels.remove(channel);
                    None
                }
            }
        };
        if let Some(job) = next {
            self.spawn_job(job);
        }
    }
}

fn link_pattern() -> Option<&'static Regex> {
    static LINK: OnceLock<Option<Regex>> = OnceLock::new();
    LINK.get_or_init(|| Regex::new(r"(?i)\b(?:https?://|www\.)\S+").ok())
        .as_ref()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::document_store::FileDocumentStore;
    use crate::infrastructure::secrets::StaticSecretStore;
    use crate::testing::{RecordingTransport, ScriptedGenerator, wait_until, wait_until_async};
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        queue: JobQueue,
        configs: ChannelConfigCache,
        transport: Arc<RecordingTransport>,
        generator: Arc<ScriptedGenerator>,
    }

    fn settings() -> QueueConfig {
        QueueConfig {
            max_length: 8,
            timeout_secs: 1,
            cooldown_ms: 20,
            max_payload_chars: 100,
            announce: true,
        }
    }

    fn harness(kind: JobKind, generator: ScriptedGenerator, settings: QueueConfig) -> Harness {
        let transport = Arc::new(RecordingTransport::default());
        let outbound = OutboundQueue::new(transport.clone(), Duration::from_millis(1), 500);
        let configs = ChannelConfigCache::new(Arc::new(FileDocumentStore::in_memory()));
        let delivery = DeliveryHub::new(
            Arc::new(StaticSecretStore::default()),
            "overlay-token-{channel}",
            vec!["foo".to_string()],
        );
        let generator = Arc::new(generator);
        let queue = JobQueue::new(
            kind,
            settings,
            configs.clone(),
            generator.clone(),
            outbound,
            delivery,
        );
        Harness {
            queue,
            configs,
            transport,
            generator,
        }
    }

    async fn idle(queue: &JobQueue, channel: &str) -> bool {
        let queue = queue.clone();
        let channel = channel.to_string();
        wait_until_async(move || {
            let queue = queue.clone();
            let channel = channel.clone();
            async move { queue.status(&channel).await == QueueStatus::default() }
        })
        .await
    }

    #[tokio::test]
    async fn test_disabled_channel_rejects() {
        let h = harness(JobKind::Speech, ScriptedGenerator::succeeding(), settings());
        h.configs.set("foo", "ttsEnabled", json!(false)).await.unwrap();

        let result = h.queue.enqueue(GenerationRequest::new("foo", "amy", "hello")).await;
        assert_eq!(result, Err(RejectReason::Disabled));
        assert_eq!(h.queue.status("foo").await.pending, 0);
        assert_eq!(h.generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_music_uses_its_own_enable_flag() {
        let h = harness(JobKind::Music, ScriptedGenerator::succeeding(), settings());
        h.configs.set("foo", "ttsEnabled", json!(false)).await.unwrap();
        assert!(h.queue.enqueue(GenerationRequest::new("foo", "amy", "lofi")).await.is_ok());
        h.configs.set("foo", "musicEnabled", json!(false)).await.unwrap();
        assert_eq!(
            h.queue.enqueue(GenerationRequest::new("foo", "amy", "lofi")).await,
            Err(RejectReason::Disabled)
        );
    }

    #[tokio::test]
    async fn test_ignored_user_is_dropped_silently() {
        let h = harness(JobKind::Speech, ScriptedGenerator::succeeding(), settings());
        h.configs.add_ignored_user("foo", "Troll").await.unwrap();

        let result = h.queue.enqueue(GenerationRequest::new("foo", "troll", "hi")).await;
        assert_eq!(result, Err(RejectReason::Ignored));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(h.transport.count(), 0);
        assert_eq!(h.queue.status("foo").await, QueueStatus::default());
    }

    #[tokio::test]
    async fn test_payload_sanity_checks() {
        let h = harness(JobKind::Speech, ScriptedGenerator::succeeding(), settings());
        let reject = |text: &str| GenerationRequest::new("foo", "amy", text);

        assert_eq!(
            h.queue.enqueue(reject("   ")).await,
            Err(RejectReason::Invalid(PayloadIssue::Empty))
        );
        assert_eq!(
            h.queue.enqueue(reject(&"a".repeat(101))).await,
            Err(RejectReason::Invalid(PayloadIssue::TooLong { max: 100 }))
        );
        assert_eq!(
            h.queue.enqueue(reject("visit https://spam.example now")).await,
            Err(RejectReason::Invalid(PayloadIssue::ContainsLink))
        );
    }

    #[tokio::test]
    async fn test_cap_rejects_newest_and_keeps_length() {
        let h = harness(
            JobKind::Music,
            ScriptedGenerator::succeeding().with_delay(Duration::from_millis(500)),
            settings(),
        );
        for i in 0..8 {
            let position = h
                .queue
                .enqueue(GenerationRequest::new("foo", "amy", &format!("song {i}")))
                .await
                .unwrap();
            assert_eq!(position, i + 1);
        }
        let ninth = h.queue.enqueue(GenerationRequest::new("foo", "amy", "song 9")).await;
        assert_eq!(ninth, Err(RejectReason::QueueFull { max: 8 }));

        let status = h.queue.status("foo").await;
        assert!(status.in_flight);
        assert_eq!(status.pending + 1, 8);
    }

    #[tokio::test]
    async fn test_single_flight_under_concurrent_enqueue() {
        let h = harness(
            JobKind::Speech,
            ScriptedGenerator::succeeding().with_delay(Duration::from_millis(20)),
            QueueConfig {
                cooldown_ms: 1,
                ..settings()
            },
        );

        let requests = (0..6).map(|i| {
            let queue = h.queue.clone();
            async move {
                queue
                    .enqueue(GenerationRequest::new("foo", &format!("user{i}"), "hello"))
                    .await
            }
        });
        let results = futures::future::join_all(requests).await;
        assert!(results.iter().all(|r| r.is_ok()));

        assert!(wait_until(|| h.generator.calls() == 6).await);
        assert!(idle(&h.queue, "foo").await);
        assert_eq!(h.generator.max_concurrent(), 1);
    }

    #[tokio::test]
    async fn test_channels_process_independently() {
        let h = harness(
            JobKind::Speech,
            ScriptedGenerator::succeeding().with_delay(Duration::from_millis(100)),
            settings(),
        );
        h.queue.enqueue(GenerationRequest::new("foo", "a", "one")).await.unwrap();
        h.queue.enqueue(GenerationRequest::new("bar", "b", "two")).await.unwrap();
        assert!(wait_until(|| h.generator.max_concurrent() == 2).await);
    }

    #[tokio::test]
    async fn test_success_posts_start_and_result() {
        let h = harness(JobKind::Music, ScriptedGenerator::succeeding(), settings());
        h.queue.enqueue(GenerationRequest::new("foo", "amy", "lofi beats")).await.unwrap();

        assert!(wait_until(|| h.transport.count() == 2).await);
        let sent = h.transport.sent();
        assert!(sent[0].1.contains("Generating music for @amy"));
        assert!(sent[1].1.contains("@amy"));
        assert!(idle(&h.queue, "foo").await);
    }

    #[tokio::test]
    async fn test_speech_job_receives_resolved_voice() {
        let h = harness(JobKind::Speech, ScriptedGenerator::succeeding(), settings());
        h.configs.set("foo", "pitch", json!(2)).await.unwrap();
        h.configs
            .set_user_preference("foo", "amy", "voiceId", json!("Wise_Woman"))
            .await
            .unwrap();

        h.queue.enqueue(GenerationRequest::new("foo", "Amy", "hello")).await.unwrap();
        assert!(wait_until(|| h.generator.calls() == 1).await);

        match h.generator.last_options() {
            Some(GenerationOptions::Speech(voice)) => {
                assert_eq!(voice.voice_id, "Wise_Woman");
                assert_eq!(voice.pitch, 2);
            }
            other => panic!("unexpected options: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_fails_job_and_moves_on_after_cooldown() {
        let h = harness(
            JobKind::Music,
            ScriptedGenerator::succeeding().hanging_on("slow"),
            QueueConfig {
                cooldown_ms: 300,
                ..settings()
            },
        );

        h.queue.enqueue(GenerationRequest::new("foo", "amy", "slow")).await.unwrap();
        h.queue.enqueue(GenerationRequest::new("foo", "bob", "fast")).await.unwrap();

        // Timeout is 1s; the failure message reaches chat.
        assert!(
            wait_until(|| h
                .transport
                .sent()
                .iter()
                .any(|(_, t)| t.contains("@amy") && t.contains("timed out")))
            .await
        );
        // Between the failure and the cool-down the channel is not processing.
        let queue = h.queue.clone();
        assert!(
            wait_until_async(move || {
                let queue = queue.clone();
                async move {
                    let status = queue.status("foo").await;
                    !status.in_flight && status.pending == 1
                }
            })
            .await
        );
        assert_eq!(h.generator.calls(), 1);

        assert!(wait_until(|| h.generator.calls() == 2).await);
        assert!(idle(&h.queue, "foo").await);
    }

    #[tokio::test]
    async fn test_provider_failure_is_categorized_for_user() {
        let h = harness(
            JobKind::Music,
            ScriptedGenerator::failing("Prompt was rejected because it contains artist names"),
            settings(),
        );
        h.queue.enqueue(GenerationRequest::new("foo", "amy", "like taylor")).await.unwrap();
        assert!(
            wait_until(|| h
                .transport
                .sent()
                .iter()
                .any(|(_, t)| t.contains("@amy") && t.contains("artist names")))
            .await
        );
        assert!(idle(&h.queue, "foo").await);
    }

    #[tokio::test]
    async fn test_clear_keeps_in_flight_job() {
        let h = harness(
            JobKind::Music,
            ScriptedGenerator::succeeding().with_delay(Duration::from_millis(300)),
            settings(),
        );
        for i in 0..4 {
            h.queue
                .enqueue(GenerationRequest::new("foo", "amy", &format!("song {i}")))
                .await
                .unwrap();
        }
        assert_eq!(h.queue.clear("foo").await, 3);

        let status = h.queue.status("foo").await;
        assert!(status.in_flight);
        assert_eq!(status.current_user.as_deref(), Some("amy"));
        assert_eq!(status.pending, 0);

        assert!(idle(&h.queue, "foo").await);
        assert_eq!(h.generator.calls(), 1);
        assert_eq!(h.queue.clear("foo").await, 0);
    }
}
