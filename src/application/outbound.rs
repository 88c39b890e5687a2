//! # Outbound Rate Limiter
//!
//! Every chat reply the bot produces goes through one global FIFO that a single
//! drain loop empties at a fixed pace:
//! - Text is truncated to the transport's byte cap before it is queued
//! - The loop sleeps the pacing interval after every send, failed or not
//! - Failed sends are logged and dropped (at-most-once)
//! - `clear` drops whatever is still pending (used on shutdown)

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::domain::config::OutboundConfig;
use crate::domain::traits::ChatTransport;
use crate::domain::types::ChannelId;

const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub destination: ChannelId,
    pub text: String,
}

#[derive(Default)]
struct OutboundState {
    queue: VecDeque<OutboundMessage>,
    draining: bool,
}

/// Handle to the global reply queue. Cheap to clone.
#[derive(Clone)]
pub struct OutboundQueue {
    state: Arc<Mutex<OutboundState>>,
    transport: Arc<dyn ChatTransport>,
    pacing: Duration,
    max_bytes: usize,
}

impl OutboundQueue {
    pub fn new(transport: Arc<dyn ChatTransport>, pacing: Duration, max_bytes: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(OutboundState::default())),
            transport,
            pacing,
            max_bytes: max_bytes.max(ELLIPSIS.len() + 1),
        }
    }

    pub fn from_config(transport: Arc<dyn ChatTransport>, config: &OutboundConfig) -> Self {
        Self::new(transport, config.pacing(), config.max_message_bytes)
    }

    /// Queue a message. Returns `false` if destination or text is empty.
    pub async fn enqueue(&self, destination: &str, text: &str) -> bool {
        if destination.trim().is_empty() || text.trim().is_empty() {
            tracing::warn!(
                destination,
                "Refusing to queue outbound message with empty destination or text"
            );
            return false;
        }

        let message = OutboundMessage {
            destination: destination.to_string(),
            text: truncate(text, self.max_bytes),
        };

        let start_loop = {
            let mut state = self.state.lock().await;
            state.queue.push_back(message);
            if state.draining {
                false
            } else {
                state.draining = true;
                true
            }
        };

        if start_loop {
            let this = self.clone();
            tokio::spawn(async move { this.drain().await });
        }
        true
    }

    /// Drop all pending messages without sending them.
    pub async fn clear(&self) -> usize {
        let mut state = self.state.lock().await;
        let dropped = state.queue.len();
        state.queue.clear();
        if dropped > 0 {
            tracing::info!(dropped, "Cleared outbound queue");
        }
        dropped
    }

    #[cfg(test)]
    pub async fn pending(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    async fn drain(&self) {
        loop {
            let next = {
                let mut state = self.state.lock().await;
                match state.queue.pop_front() {
                    Some(message) => message,
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };

            if let Err(e) = self.transport.send(&next.destination, &next.text).await {
                tracing::warn!(
                    channel = %next.destination,
                    "Failed to deliver chat message: {}",
                    e
                );
            }

            // Pace after failures too, so a flapping transport is not hammered.
            sleep(self.pacing).await;
        }
    }
}

/// Truncates `text` to at most `max_bytes` bytes, ending in an ellipsis when cut.
pub fn truncate(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes.saturating_sub(ELLIPSIS.len());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", text[..end].trim_end(), ELLIPSIS)
}
