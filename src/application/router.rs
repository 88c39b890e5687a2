//! # Event Router
//!
//! Turns inbound chat events into work. Prefixed commands (e.g. `!tts`) are
//! dispatched to the handlers in `interface/commands`; everything else is an
//! ambient message that may become a speech job depending on the channel's
//! mode, permission level and bits settings.

use crate::application::channel_config::ChannelConfigCache;
use crate::application::delivery::DeliveryHub;
use crate::application::jobs::JobQueue;
use crate::application::outbound::OutboundQueue;
use crate::domain::types::{ChatEvent, GenerationRequest, JobKind, RejectReason, TtsMode};
use crate::interface::commands::{self, CommandContext};

/// Handles to every component a command may touch.
#[derive(Clone)]
pub struct Services {
    pub configs: ChannelConfigCache,
    pub outbound: OutboundQueue,
    pub speech: JobQueue,
    pub music: JobQueue,
    pub delivery: DeliveryHub,
}

impl Services {
    pub fn queue(&self, kind: JobKind) -> &JobQueue {
        match kind {
            JobKind::Speech => &self.speech,
            JobKind::Music => &self.music,
        }
    }
}

/// What became of one inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// A command ran (and replied, if it had anything to say).
    Command,
    Queued { kind: JobKind, position: usize },
    Rejected(RejectReason),
    /// Silently ignored; the reason is for logs and tests only.
    Dropped(&'static str),
}

#[derive(Clone)]
pub struct EventRouter {
    prefix: String,
    services: Services,
}

impl EventRouter {
    pub fn new(prefix: &str, services: Services) -> Self {
        Self {
            prefix: prefix.to_string(),
            services,
        }
    }

    #[cfg(test)]
    pub fn services(&self) -> &Services {
        &self.services
    }

    pub async fn route(&self, event: ChatEvent) -> Routed {
        let msg = event.text.trim();

        let Some(rest) = msg.strip_prefix(self.prefix.as_str()) else {
            return self.ambient(&event).await;
        };
        let (cmd, args) = match rest.find(char::is_whitespace) {
            Some(idx) => (&rest[..idx], rest[idx..].trim()),
            None => (rest, ""),
        };
        tracing::info!(
            channel = %event.channel,
            user = %event.user,
            "Router dispatching cmd='{}' args='{}'",
            cmd,
            args
        );

        let ctx = CommandContext {
            services: &self.services,
            event: &event,
        };
        match cmd.to_lowercase().as_str() {
            "tts" => commands::tts::handle_tts(&ctx, args).await,
            "music" => commands::music::handle_music(&ctx, args).await,
            "voice" => commands::voice::handle_voice(&ctx, args).await,
            _ => Routed::Dropped("unknown command"),
        }
    }

    /// A non-command message. Checked in order: engine disabled, ignore-list,
    /// mode and permission, bits threshold. Nothing here replies to chat.
    async fn ambient(&self, event: &ChatEvent) -> Routed {
        let config = self.services.configs.get(&event.channel).await;

        if !config.tts_enabled {
            return Routed::Dropped("disabled");
        }
        if config.is_ignored(&event.user) {
            return Routed::Dropped("ignored");
        }

        let eligible = match config.mode {
            TtsMode::All => event.permission >= config.tts_permission_level,
            TtsMode::Bits => event.bits > 0,
            TtsMode::Command => config.bits_mode_enabled && event.bits > 0,
        };
        if !eligible {
            return Routed::Dropped("mode");
        }
        if config.bits_required() && event.bits < config.bits_minimum_amount {
            return Routed::Dropped("bits");
        }

        let text = if event.bits > 0 {
            strip_cheermotes(&event.text, event.bits)
        } else {
            event.text.trim().to_string()
        };
        if text.is_empty() {
            return Routed::Dropped("empty");
        }

        let request = GenerationRequest::new(&event.channel, &event.user, &text);
        match self.services.speech.enqueue(request).await {
            Ok(position) => Routed::Queued {
                kind: JobKind::Speech,
                position,
            },
            Err(reason) => {
                tracing::debug!(
                    channel = %event.channel,
                    user = %event.user,
                    reason = reason.code(),
                    "Ambient message not queued"
                );
                Routed::Rejected(reason)
            }
        }
    }
}

/// Global cheermote prefixes. Channel-specific ones are recognised by amount.
const CHEERMOTE_PREFIXES: &[&str] = &[
    "cheer", "doodlecheer", "biblethump", "cheerwhal", "corgo", "uni", "showlove", "party",
    "seemsgood", "pride", "kappa", "frankerz", "heyguys", "dansgame", "elegiggle", "trihard",
    "kreygasm", "4head", "swiftrage", "notlikethis", "failfish", "vohiyo", "pjsalt",
    "mrdestructoid", "bday", "ripcheer", "shamrock", "holidaycheer", "goal", "anon", "charity",
];

/// Split `Prefix123` into its prefix and amount.
fn cheer_token(word: &str) -> Option<(&str, u32)> {
    let prefix = word.trim_end_matches(|c: char| c.is_ascii_digit());
    if prefix.is_empty() || prefix.len() == word.len() {
        return None;
    }
    if !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    let amount = word[prefix.len()..].parse().ok()?;
    Some((prefix, amount))
}

/// Remove the cheermote tokens that carry the bits of a message. Known
/// prefixes are always removed; other `word123` tokens only when their amounts
/// add up to exactly `bits` (custom channel cheermotes).
pub fn strip_cheermotes(text: &str, bits: u32) -> String {
    let words: Vec<(&str, Option<(bool, u32)>)> = text
        .split_whitespace()
        .map(|w| {
            let token = cheer_token(w).map(|(prefix, amount)| {
                let known = CHEERMOTE_PREFIXES.contains(&prefix.to_lowercase().as_str());
                (known, amount)
            });
            (w, token)
        })
        .collect();

    let sum = |only_known: bool| -> u64 {
        words
            .iter()
            .filter_map(|(_, t)| *t)
            .filter(|(known, _)| *known || !only_known)
            .map(|(_, amount)| u64::from(amount))
            .sum()
    };
    let strip_custom = sum(true) != u64::from(bits) && sum(false) == u64::from(bits);

    words
        .into_iter()
        .filter(|(_, token)| match token {
            Some((true, _)) => false,
            Some((false, _)) => !strip_custom,
            None => true,
        })
        .map(|(w, _)| w)
        .collect::<Vec<_>>()
        .join(" ")
}
