//! # TTS Commands
//!
//! Handles `!tts <text>` and the `!tts <subcommand>` family: playback control,
//! queue inspection and the moderator-only channel settings.

use serde_json::json;

use super::{CommandContext, parse_toggle, split_subcommand};
use crate::application::router::Routed;
use crate::domain::types::{Directive, GenerationRequest, JobKind, PermissionLevel, TtsMode};
use crate::strings::messages;

pub async fn handle_tts(ctx: &CommandContext<'_>, args: &str) -> Routed {
    let (sub, rest) = split_subcommand(args);
    // Argument-less subcommands only match on their own, so "!tts on my way" is speech.
    let bare = rest.is_empty();

    match sub.as_str() {
        "" => {
            ctx.reply(&messages::usage("!tts <text>")).await;
            Routed::Command
        }
        "help" if bare => super::help::handle_help(ctx).await,
        "status" if bare => {
            let status = ctx.services.speech.status(ctx.channel()).await;
            ctx.reply(&messages::queue_status(JobKind::Speech, &status)).await;
            Routed::Command
        }
        "stop" if bare => handle_stop(ctx).await,
        "clear" if bare => {
            if ctx.require_moderator().await {
                let removed = ctx.services.speech.clear(ctx.channel()).await;
                ctx.reply(&messages::queue_cleared(JobKind::Speech, removed)).await;
            }
            Routed::Command
        }
        "on" | "off" if bare => {
            if ctx.require_moderator().await {
                let enabled = sub == "on";
                let result = ctx
                    .services
                    .configs
                    .set(ctx.channel(), "ttsEnabled", json!(enabled))
                    .await;
                ctx.report_saved("TTS", if enabled { "on" } else { "off" }, result)
                    .await;
            }
            Routed::Command
        }
        "mode" | "pitch" | "speed" | "voice" | "emotion" | "permission" | "bits" => {
            if ctx.require_moderator().await {
                handle_setting(ctx, &sub, rest).await;
            }
            Routed::Command
        }
        "ignore" | "unignore" => {
            if ctx.require_moderator().await {
                handle_ignore(ctx, sub == "ignore", rest).await;
            }
            Routed::Command
        }
        _ => speak(ctx, args).await,
    }
}

async fn speak(ctx: &CommandContext<'_>, text: &str) -> Routed {
    let config = ctx.services.configs.get(ctx.channel()).await;
    let gated = config.tts_enabled && !config.is_ignored(ctx.user());
    if gated && config.bits_required() && ctx.event.bits < config.bits_minimum_amount {
        ctx.reply(&messages::bits_required(ctx.user(), config.bits_minimum_amount))
            .await;
        return Routed::Dropped("bits");
    }

    let request = GenerationRequest::new(ctx.channel(), ctx.user(), text);
    ctx.submit(JobKind::Speech, request).await
}

async fn handle_stop(ctx: &CommandContext<'_>) -> Routed {
    if ctx.require_moderator().await {
        let reached = ctx
            .services
            .delivery
            .deliver(ctx.channel(), Directive::Stop)
            .await;
        tracing::info!(channel = %ctx.channel(), reached, "Playback stop requested");
        ctx.reply(messages::STOPPED).await;
    }
    Routed::Command
}

/// One field per command; the cache validates ranges.
async fn handle_setting(ctx: &CommandContext<'_>, sub: &str, value: &str) {
    let configs = &ctx.services.configs;
    let channel = ctx.channel();

    match sub {
        "mode" => match TtsMode::parse(value) {
            Some(mode) => {
                let result = configs.set(channel, "mode", json!(mode.as_str())).await;
                ctx.report_saved("TTS mode", mode.as_str(), result).await;
            }
            None => ctx.reply(&messages::usage("!tts mode all|command|bits")).await,
        },
        "pitch" => match value.parse::<i32>() {
            Ok(pitch) => {
                let result = configs.set(channel, "pitch", json!(pitch)).await;
                ctx.report_saved("Pitch", value, result).await;
            }
            Err(_) => ctx.reply(&messages::usage("!tts pitch <-12..12>")).await,
        },
        "speed" => match value.parse::<f64>() {
            Ok(speed) if speed.is_finite() => {
                let result = configs.set(channel, "speed", json!(speed)).await;
                ctx.report_saved("Speed", value, result).await;
            }
            _ => ctx.reply(&messages::usage("!tts speed <0.5..2.0>")).await,
        },
        "voice" | "emotion" if !value.is_empty() => {
            let (key, what) = if sub == "voice" {
                ("voiceId", "Default voice")
            } else {
                ("emotion", "Emotion")
            };
            let result = configs.set(channel, key, json!(value)).await;
            ctx.report_saved(what, value, result).await;
        }
        "permission" => match PermissionLevel::parse(value) {
            Some(level) => {
                let result = configs
                    .set(channel, "ttsPermissionLevel", json!(level.as_str()))
                    .await;
                ctx.report_saved("TTS permission", level.as_str(), result).await;
            }
            None => {
                ctx.reply(&messages::usage(
                    "!tts permission everyone|subscriber|vip|moderator|broadcaster",
                ))
                .await
            }
        },
        "bits" => handle_bits(ctx, value).await,
        _ => ctx.reply(&messages::usage(&format!("!tts {sub} <value>"))).await,
    }
}

async fn handle_bits(ctx: &CommandContext<'_>, args: &str) {
    let configs = &ctx.services.configs;
    let (action, rest) = split_subcommand(args);

    if action == "min" {
        match rest.parse::<u32>() {
            Ok(amount) => {
                let result = configs
                    .set(ctx.channel(), "bitsMinimumAmount", json!(amount))
                    .await;
                ctx.report_saved("Minimum bits", rest, result).await;
            }
            Err(_) => ctx.reply(&messages::usage("!tts bits min <amount>")).await,
        }
        return;
    }

    match parse_toggle(&action) {
        Some(enabled) => {
            let result = configs
                .set(ctx.channel(), "bitsModeEnabled", json!(enabled))
                .await;
            ctx.report_saved("Bits mode", if enabled { "on" } else { "off" }, result)
                .await;
        }
        None => ctx.reply(&messages::usage("!tts bits on|off|min <amount>")).await,
    }
}

async fn handle_ignore(ctx: &CommandContext<'_>, ignore: bool, target: &str) {
    let target = target.trim_start_matches('@');
    if target.is_empty() {
        let line = if ignore { "!tts ignore <user>" } else { "!tts unignore <user>" };
        ctx.reply(&messages::usage(line)).await;
        return;
    }

    let configs = &ctx.services.configs;
    let result = if ignore {
        configs.add_ignored_user(ctx.channel(), target).await
    } else {
        configs.remove_ignored_user(ctx.channel(), target).await
    };
    let shown = if ignore { "ignored" } else { "not ignored" };
    ctx.report_saved(&format!("@{}", target.to_lowercase()), shown, result)
        .await;
}
