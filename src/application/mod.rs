//! # Application Layer
//!
//! Contains the core business logic and orchestration of the bot.
//! This includes the outbound pacing queue, the channel config cache and its
//! watcher, the generation job queues, overlay delivery and event routing.

pub mod backoff;
pub mod channel_config;
pub mod delivery;
pub mod failures;
pub mod jobs;
pub mod outbound;
pub mod router;
pub mod watcher;
