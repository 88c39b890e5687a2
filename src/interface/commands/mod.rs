//! # Command Handlers
//!
//! Contains the handler functions for each chat command (`!tts`, `!music`, `!voice`).
//! These handlers are invoked by the Router.

pub mod help;
pub mod music;
pub mod tts;
pub mod voice;

use crate::application::channel_config::ConfigError;
use crate::application::router::{Routed, Services};
use crate::domain::types::{ChatEvent, GenerationRequest, JobKind, PermissionLevel};
use crate::strings::messages;

/// Everything a handler needs for one inbound command.
pub struct CommandContext<'a> {
    pub services: &'a Services,
    pub event: &'a ChatEvent,
}

impl CommandContext<'_> {
    pub fn channel(&self) -> &str {
        &self.event.channel
    }

    pub fn user(&self) -> &str {
        &self.event.user
    }

    pub fn is_moderator(&self) -> bool {
        self.event.permission >= PermissionLevel::Moderator
    }

    pub async fn reply(&self, text: &str) {
        self.services.outbound.enqueue(self.channel(), text).await;
    }

    /// Replies with the denial and returns `false` for non-moderators.
    pub async fn require_moderator(&self) -> bool {
        if self.is_moderator() {
            return true;
        }
        tracing::info!(channel = %self.channel(), user = %self.user(), "Moderator command denied");
        self.reply(messages::PERMISSION_DENIED).await;
        false
    }

    /// Queue a job and tell the user how it went.
    pub async fn submit(&self, kind: JobKind, request: GenerationRequest) -> Routed {
        match self.services.queue(kind).enqueue(request).await {
            Ok(position) => {
                // Position 1 starts right away and announces itself.
                if position > 1 {
                    self.reply(&messages::job_queued(kind, self.user(), position))
                        .await;
                }
                Routed::Queued { kind, position }
            }
            Err(reason) => {
                if let Some(text) = messages::rejection(kind, self.user(), reason) {
                    self.reply(&text).await;
                }
                Routed::Rejected(reason)
            }
        }
    }

    /// Report the outcome of a settings write.
    pub async fn report_saved(&self, what: &str, shown: &str, result: Result<bool, ConfigError>) {
        let text = match result {
            Ok(true) => messages::setting_saved(what, shown),
            Ok(false) => messages::setting_saved_locally(what, shown),
            Err(e) => messages::setting_rejected(&e.to_string()),
        };
        self.reply(&text).await;
    }
}

/// Split `"word rest of args"` into the lower-cased first word and the rest.
pub fn split_subcommand(args: &str) -> (String, &str) {
    match args.find(char::is_whitespace) {
        Some(idx) => (args[..idx].to_lowercase(), args[idx..].trim()),
        None => (args.to_lowercase(), ""),
    }
}

/// Parse `on`/`off` style toggles.
pub fn parse_toggle(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "on" | "enable" | "enabled" | "true" | "yes" => Some(true),
        "off" | "disable" | "disabled" | "false" | "no" => Some(false),
        _ => None,
    }
}
