//! # Domain Types
//!
//! Data structures shared by the outbound queue, the channel config cache,
//! the generation queues and the delivery hub.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Chat room identifier (a Matrix room id in production).
pub type ChannelId = String;

/// Which generation engine a job targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Speech,
    Music,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Speech => "speech",
            JobKind::Music => "music",
        }
    }
}

/// When chat messages are turned into speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsMode {
    /// Every chat message from a sufficiently privileged user.
    All,
    /// Only explicit `!tts` commands.
    #[default]
    Command,
    /// Only messages carrying enough bits.
    Bits,
}

impl TtsMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "all" => Some(TtsMode::All),
            "command" | "commands" => Some(TtsMode::Command),
            "bits" | "cheer" => Some(TtsMode::Bits),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TtsMode::All => "all",
            TtsMode::Command => "command",
            TtsMode::Bits => "bits",
        }
    }
}

/// Chat role of a user, ordered from least to most privileged.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    #[default]
    Everyone,
    Subscriber,
    Vip,
    Moderator,
    Broadcaster,
}

impl PermissionLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "everyone" | "all" => Some(PermissionLevel::Everyone),
            "subscriber" | "subs" | "sub" => Some(PermissionLevel::Subscriber),
            "vip" => Some(PermissionLevel::Vip),
            "moderator" | "mod" | "mods" => Some(PermissionLevel::Moderator),
            "broadcaster" => Some(PermissionLevel::Broadcaster),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionLevel::Everyone => "everyone",
            PermissionLevel::Subscriber => "subscriber",
            PermissionLevel::Vip => "vip",
            PermissionLevel::Moderator => "moderator",
            PermissionLevel::Broadcaster => "broadcaster",
        }
    }
}

/// Sparse per-user voice overrides. Absent fields fall through to the channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_boost: Option<String>,
}

impl UserPreference {
    /// Field names accepted by `set_user_preference`.
    pub const FIELDS: [&'static str; 5] = ["voiceId", "pitch", "speed", "emotion", "languageBoost"];
}

pub const DEFAULT_VOICE_ID: &str = "Friendly_Person";
pub const DEFAULT_EMOTION: &str = "auto";
pub const DEFAULT_LANGUAGE_BOOST: &str = "Automatic";
pub const PITCH_RANGE: (i32, i32) = (-12, 12);
pub const SPEED_RANGE: (f64, f64) = (0.5, 2.0);

/// Per-channel settings record. Stored camelCase in the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelConfig {
    pub tts_enabled: bool,
    pub music_enabled: bool,
    pub mode: TtsMode,
    pub voice_id: String,
    pub pitch: i32,
    pub speed: f64,
    pub emotion: String,
    pub language_boost: String,
    pub english_normalization: bool,
    pub tts_permission_level: PermissionLevel,
    pub bits_mode_enabled: bool,
    pub bits_minimum_amount: u32,
    pub ignored_users: BTreeSet<String>,
    pub user_preferences: BTreeMap<String, UserPreference>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            tts_enabled: true,
            music_enabled: true,
            mode: TtsMode::default(),
            voice_id: DEFAULT_VOICE_ID.to_string(),
            pitch: 0,
            speed: 1.0,
            emotion: DEFAULT_EMOTION.to_string(),
            language_boost: DEFAULT_LANGUAGE_BOOST.to_string(),
            english_normalization: false,
            tts_permission_level: PermissionLevel::default(),
            bits_mode_enabled: false,
            bits_minimum_amount: 100,
            ignored_users: BTreeSet::new(),
            user_preferences: BTreeMap::new(),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

impl ChannelConfig {
    pub fn is_enabled(&self, kind: JobKind) -> bool {
        match kind {
            JobKind::Speech => self.tts_enabled,
            JobKind::Music => self.music_enabled,
        }
    }

    pub fn is_ignored(&self, user: &str) -> bool {
        self.ignored_users.contains(&user.to_lowercase())
    }

    /// Whether speech requests must carry bits.
    pub fn bits_required(&self) -> bool {
        self.mode == TtsMode::Bits || self.bits_mode_enabled
    }

    /// Range checks for the numeric fields a merge patch touched. Values the
    /// patch did not mention are left to [`ChannelConfig::sanitize`].
    pub fn validate_fields(&self, patch: &serde_json::Value) -> Result<(), String> {
        let Some(fields) = patch.as_object() else {
            return Ok(());
        };
        if fields.contains_key("pitch") {
            check_pitch(self.pitch)?;
        }
        if fields.contains_key("speed") {
            check_speed(self.speed)?;
        }
        let users = fields
            .get("userPreferences")
            .and_then(serde_json::Value::as_object);
        for user in users.into_iter().flat_map(|u| u.keys()) {
            let Some(pref) = self.user_preferences.get(user) else {
                continue;
            };
            if let Some(p) = pref.pitch {
                check_pitch(p)?;
            }
            if let Some(s) = pref.speed {
                check_speed(s)?;
            }
        }
        Ok(())
    }

    /// Pull out-of-range numeric fields back into range. Returns the names of
    /// the fields that were changed.
    pub fn sanitize(&mut self) -> Vec<String> {
        let mut changed = Vec::new();
        if let Some(pitch) = clamp_pitch(self.pitch) {
            self.pitch = pitch;
            changed.push("pitch".to_string());
        }
        if let Some(speed) = clamp_speed(self.speed) {
            self.speed = speed;
            changed.push("speed".to_string());
        }
        for (user, pref) in self.user_preferences.iter_mut() {
            if let Some(pitch) = pref.pitch.and_then(clamp_pitch) {
                pref.pitch = Some(pitch);
                changed.push(format!("userPreferences.{user}.pitch"));
            }
            if let Some(speed) = pref.speed.and_then(clamp_speed) {
                pref.speed = Some(speed);
                changed.push(format!("userPreferences.{user}.speed"));
            }
        }
        changed
    }

    /// Effective voice parameters for `user`: user override, then channel
    /// default, then system default.
    pub fn resolve_voice(&self, user: &str) -> VoiceOptions {
        let system = ChannelConfig::default();
        let pref = self.user_preferences.get(&user.to_lowercase());

        let pick = |user_value: Option<&str>, channel_value: &str, system_value: &str| {
            non_empty(user_value)
                .or(non_empty(Some(channel_value)))
                .unwrap_or(system_value)
                .to_string()
        };

        VoiceOptions {
            voice_id: pick(
                pref.and_then(|p| p.voice_id.as_deref()),
                &self.voice_id,
                &system.voice_id,
            ),
            pitch: pref.and_then(|p| p.pitch).unwrap_or(self.pitch),
            speed: pref.and_then(|p| p.speed).unwrap_or(self.speed),
            emotion: pick(
                pref.and_then(|p| p.emotion.as_deref()),
                &self.emotion,
                &system.emotion,
            ),
            language_boost: pick(
                pref.and_then(|p| p.language_boost.as_deref()),
                &self.language_boost,
                &system.language_boost,
            ),
            english_normalization: self.english_normalization,
        }
    }
}

/// `Some(clamped)` when `pitch` is out of range.
fn clamp_pitch(pitch: i32) -> Option<i32> {
    let clamped = pitch.clamp(PITCH_RANGE.0, PITCH_RANGE.1);
    (clamped != pitch).then_some(clamped)
}

fn clamp_speed(speed: f64) -> Option<f64> {
    if !speed.is_finite() {
        return Some(ChannelConfig::default().speed);
    }
    let clamped = speed.clamp(SPEED_RANGE.0, SPEED_RANGE.1);
    (clamped != speed).then_some(clamped)
}

fn check_pitch(pitch: i32) -> Result<(), String> {
    if (PITCH_RANGE.0..=PITCH_RANGE.1).contains(&pitch) {
        Ok(())
    } else {
        Err(format!(
            "pitch must be between {} and {}",
            PITCH_RANGE.0, PITCH_RANGE.1
        ))
    }
}

fn check_speed(speed: f64) -> Result<(), String> {
    if (SPEED_RANGE.0..=SPEED_RANGE.1).contains(&speed) {
        Ok(())
    } else {
        Err(format!(
            "speed must be between {} and {}",
            SPEED_RANGE.0, SPEED_RANGE.1
        ))
    }
}

/// Fully resolved speech parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceOptions {
    pub voice_id: String,
    pub pitch: i32,
    pub speed: f64,
    pub emotion: String,
    pub language_boost: String,
    pub english_normalization: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MusicOptions {
    pub negative_prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOptions {
    Speech(VoiceOptions),
    Music(MusicOptions),
}

impl GenerationOptions {
    /// Flat input object handed to the generation provider.
    pub fn to_input(&self, prompt: &str) -> serde_json::Value {
        match self {
            GenerationOptions::Speech(v) => serde_json::json!({
                "text": prompt,
                "voice_id": v.voice_id,
                "pitch": v.pitch,
                "speed": v.speed,
                "emotion": v.emotion,
                "language_boost": v.language_boost,
                "english_normalization": v.english_normalization,
            }),
            GenerationOptions::Music(m) => {
                let mut input = serde_json::json!({ "prompt": prompt });
                if let Some(neg) = &m.negative_prompt {
                    input["negative_prompt"] = serde_json::Value::String(neg.clone());
                }
                input
            }
        }
    }
}

/// A user's request before it is accepted into a queue.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub channel: ChannelId,
    pub user: String,
    pub text: String,
    pub music: MusicOptions,
}

impl GenerationRequest {
    pub fn new(channel: &str, user: &str, text: &str) -> Self {
        Self {
            channel: channel.to_string(),
            user: user.to_string(),
            text: text.to_string(),
            music: MusicOptions::default(),
        }
    }
}

/// An accepted generation request.
#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub id: String,
    pub kind: JobKind,
    pub channel: ChannelId,
    pub user: String,
    pub payload: String,
    pub options: GenerationOptions,
    pub enqueued_at: DateTime<Utc>,
}

/// Why a payload failed the sanity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadIssue {
    Empty,
    TooLong { max: usize },
    ContainsLink,
}

/// Reason an enqueue was refused. Each variant has a distinct code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Disabled,
    Ignored,
    Invalid(PayloadIssue),
    QueueFull { max: usize },
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::Disabled => "disabled",
            RejectReason::Ignored => "ignored",
            RejectReason::Invalid(_) => "invalid",
            RejectReason::QueueFull { .. } => "queue_full",
        }
    }
}

/// Snapshot of a channel's queue for display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStatus {
    pub pending: usize,
    pub in_flight: bool,
    pub current_user: Option<String>,
}

/// What overlay clients are told to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Play { url: String },
    Stop,
}

/// Inbound chat activity handed to the router.
#[derive(Debug, Clone)]
pub struct ChatEvent {
    pub channel: ChannelId,
    pub user: String,
    pub text: String,
    pub permission: PermissionLevel,
    pub bits: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One entry of the document store's change feed.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreEvent {
    pub kind: ChangeKind,
    pub id: String,
    pub data: Option<serde_json::Value>,
}
