//! # Help Command
//!
//! Handles `!tts help`.

use super::CommandContext;
use crate::application::router::Routed;

pub async fn handle_help(ctx: &CommandContext<'_>) -> Routed {
    ctx.reply(crate::strings::help::MAIN).await;
    Routed::Command
}
