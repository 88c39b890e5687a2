//! # Voice Command
//!
//! Handles `!voice <id>` and `!voice reset`: the requesting user's own voice
//! preference. Other users' preferences are never touched.

use serde_json::json;

use super::CommandContext;
use crate::application::router::Routed;
use crate::strings::messages;

pub async fn handle_voice(ctx: &CommandContext<'_>, args: &str) -> Routed {
    let configs = &ctx.services.configs;
    if configs.get(ctx.channel()).await.is_ignored(ctx.user()) {
        return Routed::Dropped("ignored");
    }

    let voice = args.split_whitespace().next().unwrap_or("");
    match voice.to_lowercase().as_str() {
        "" => {
            ctx.reply(&messages::usage("!voice <voice id> | !voice reset"))
                .await
        }
        "reset" | "default" => match configs.clear_user_preference(ctx.channel(), ctx.user()).await {
            Ok(_) => ctx.reply(&messages::voice_reset(ctx.user())).await,
            Err(e) => ctx.reply(&messages::setting_rejected(&e.to_string())).await,
        },
        _ => {
            let result = configs
                .set_user_preference(ctx.channel(), ctx.user(), "voiceId", json!(voice))
                .await;
            match result {
                Ok(_) => ctx.reply(&messages::voice_set(ctx.user(), voice)).await,
                Err(e) => ctx.reply(&messages::setting_rejected(&e.to_string())).await,
            }
        }
    }
    Routed::Command
}
