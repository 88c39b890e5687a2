//! # Messages
//!
//! Contains constant strings and format functions for user-facing chat messages.
//! Every reply that concerns a request is addressed to the requesting user.

use crate::domain::types::{JobKind, PayloadIssue, QueueStatus, RejectReason};

fn noun(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Speech => "TTS",
        JobKind::Music => "music",
    }
}

fn icon(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Speech => "🔊",
        JobKind::Music => "🎵",
    }
}

fn preview(text: &str) -> String {
    const MAX: usize = 60;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let cut: String = text.chars().take(MAX).collect();
        format!("{cut}...")
    }
}

pub fn job_queued(kind: JobKind, user: &str, position: usize) -> String {
    format!(
        "{} @{user}, your {} request is #{position} in the queue.",
        icon(kind),
        noun(kind)
    )
}

pub fn job_started(kind: JobKind, user: &str, payload: &str) -> String {
    match kind {
        JobKind::Speech => format!("🔊 Speaking for @{user}: \"{}\"", preview(payload)),
        JobKind::Music => format!("🎵 Generating music for @{user}: \"{}\"", preview(payload)),
    }
}

pub fn job_finished(kind: JobKind, user: &str, reached: usize) -> String {
    if reached == 0 {
        format!(
            "{} @{user}, your {} is ready but no overlay is connected.",
            icon(kind),
            noun(kind)
        )
    } else {
        format!("{} @{user}, your {} is now playing!", icon(kind), noun(kind))
    }
}

pub fn job_failed(user: &str, reason: &str) -> String {
    format!("❌ @{user}, {reason}")
}

/// Reply for a refused request. `None` means stay silent.
pub fn rejection(kind: JobKind, user: &str, reason: RejectReason) -> Option<String> {
    let text = match reason {
        RejectReason::Ignored => return None,
        RejectReason::Disabled => format!("@{user}, {} is disabled in this channel.", noun(kind)),
        RejectReason::Invalid(PayloadIssue::Empty) => {
            format!("@{user}, please include some text with your request.")
        }
        RejectReason::Invalid(PayloadIssue::TooLong { max }) => {
            format!("@{user}, your request is too long (max {max} characters).")
        }
        RejectReason::Invalid(PayloadIssue::ContainsLink) => {
            format!("@{user}, links are not allowed in requests.")
        }
        RejectReason::QueueFull { max } => format!(
            "@{user}, the {} queue is full ({max} requests). Please try again later.",
            noun(kind)
        ),
    };
    Some(text)
}

pub fn bits_required(user: &str, minimum: u32) -> String {
    format!("@{user}, TTS in this channel needs a cheer of at least {minimum} bits.")
}

pub fn queue_status(kind: JobKind, status: &QueueStatus) -> String {
    if !status.in_flight && status.pending == 0 {
        return format!("{} The {} queue is empty.", icon(kind), noun(kind));
    }
    match &status.current_user {
        Some(user) => format!(
            "{} Now generating for @{user}. {} waiting.",
            icon(kind),
            status.pending
        ),
        None => format!("{} {} {} requests waiting.", icon(kind), status.pending, noun(kind)),
    }
}

pub fn queue_cleared(kind: JobKind, removed: usize) -> String {
    format!("🧹 Cleared {removed} pending {} request(s).", noun(kind))
}

pub const STOPPED: &str = "⏹️ Playback stopped.";
pub const PERMISSION_DENIED: &str = "🚫 Only moderators can change that.";

pub fn setting_saved(what: &str, value: &str) -> String {
    format!("✅ {what} set to {value}.")
}

pub fn setting_saved_locally(what: &str, value: &str) -> String {
    format!("⚠️ {what} set to {value}, but it could not be saved and may reset on restart.")
}

pub fn setting_rejected(reason: &str) -> String {
    format!("❌ {reason}")
}

pub fn voice_set(user: &str, voice: &str) -> String {
    format!("✅ @{user}, your voice is now {voice}.")
}

pub fn voice_reset(user: &str) -> String {
    format!("✅ @{user}, your voice settings were reset to the channel defaults.")
}

pub fn usage(line: &str) -> String {
    format!("Usage: `{line}`")
}
