//! # Configuration
//!
//! Manages the loading and parsing of the application's configuration file (`config.yaml`).
//! Defines the structs for the chat service, queue tuning, delivery, store and generation backends.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Main application configuration structure.
/// Matches the layout of `data/config.yaml`.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub services: ServicesConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub outbound: OutboundConfig,
    #[serde(default)]
    pub queues: QueuesConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    /// Channels (room ids) the bot is active in.
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub system: SystemConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse config YAML")
    }
}

/// Configuration for various connected services.
#[derive(Debug, Deserialize, Clone)]
pub struct ServicesConfig {
    pub matrix: MatrixConfig,
}

/// Specific configuration for the Matrix service.
#[derive(Debug, Deserialize, Clone)]
pub struct MatrixConfig {
    pub username: String,
    pub password: String,
    pub homeserver: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

/// Pacing of the global chat reply queue.
#[derive(Debug, Deserialize, Clone)]
pub struct OutboundConfig {
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            pacing_ms: default_pacing_ms(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

impl OutboundConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

fn default_pacing_ms() -> u64 {
    1500
}
fn default_max_message_bytes() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueuesConfig {
    #[serde(default = "QueueConfig::speech")]
    pub speech: QueueConfig,
    #[serde(default = "QueueConfig::music")]
    pub music: QueueConfig,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            speech: QueueConfig::speech(),
            music: QueueConfig::music(),
        }
    }
}

/// Tuning for one generation queue.
#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    pub timeout_secs: u64,
    pub cooldown_ms: u64,
    pub max_payload_chars: usize,
    /// Post "started" and "finished" notices to chat. Failures are always posted.
    #[serde(default = "default_true")]
    pub announce: bool,
}

impl QueueConfig {
    pub fn speech() -> Self {
        Self {
            max_length: default_max_length(),
            timeout_secs: 60,
            cooldown_ms: 1000,
            max_payload_chars: 500,
            announce: true,
        }
    }

    pub fn music() -> Self {
        Self {
            max_length: default_max_length(),
            timeout_secs: 180,
            cooldown_ms: 5000,
            max_payload_chars: 300,
            announce: true,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

fn default_max_length() -> usize {
    8
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Secret name per channel; `{channel}` is substituted.
    #[serde(default = "default_secret_name")]
    pub secret_name: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            secret_name: default_secret_name(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    30
}
fn default_secret_name() -> String {
    "overlay-token-{channel}".to_string()
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    File,
    Redis,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// JSON file for the file backend. Memory only when unset.
    #[serde(default = "default_store_path")]
    pub path: Option<String>,
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_store_prefix")]
    pub prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
            redis_url: None,
            prefix: default_store_prefix(),
        }
    }
}

fn default_store_path() -> Option<String> {
    Some("data/channels.json".to_string())
}
fn default_store_prefix() -> String {
    "herald:channel".to_string()
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GenerationBackend {
    #[default]
    Replicate,
    Script,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GenerationConfig {
    #[serde(default)]
    pub backend: GenerationBackend,
    #[serde(default)]
    pub replicate: ReplicateConfig,
    #[serde(default)]
    pub script: ScriptConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReplicateConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_api_token_env")]
    pub api_token_env: String,
    #[serde(default = "default_speech_model")]
    pub speech_model: String,
    #[serde(default = "default_music_model")]
    pub music_model: String,
}

impl Default for ReplicateConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_token_env: default_api_token_env(),
            speech_model: default_speech_model(),
            music_model: default_music_model(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.replicate.com/v1".to_string()
}
fn default_api_token_env() -> String {
    "REPLICATE_API_TOKEN".to_string()
}
fn default_speech_model() -> String {
    "minimax/speech-02-turbo".to_string()
}
fn default_music_model() -> String {
    "google/lyria-2".to_string()
}

/// External program per job kind. It receives the flat input object as its
/// single JSON argument and prints a JSON result on stdout.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ScriptConfig {
    #[serde(default)]
    pub speech: Option<ScriptCommand>,
    #[serde(default)]
    pub music: Option<ScriptCommand>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScriptCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// System-level settings for the bot.
#[derive(Debug, Deserialize, Clone)]
pub struct SystemConfig {
    #[serde(default = "default_prefix")]
    pub command_prefix: String,
    /// Users treated as broadcaster in every channel.
    #[serde(default)]
    pub admin: Vec<String>,
    /// Users treated as moderator in every channel.
    #[serde(default)]
    pub moderators: Vec<String>,
    #[serde(default)]
    pub secrets: HashMap<String, String>,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            command_prefix: default_prefix(),
            admin: Vec::new(),
            moderators: Vec::new(),
            secrets: HashMap::new(),
            log_dir: default_log_dir(),
        }
    }
}

fn default_prefix() -> String {
    "!".to_string()
}
fn default_log_dir() -> String {
    "data".to_string()
}
