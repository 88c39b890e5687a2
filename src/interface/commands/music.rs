//! # Music Commands
//!
//! Handles `!music <prompt> [--no <avoid>]` and the `on|off|clear|status` subcommands.

use serde_json::json;

use super::{CommandContext, split_subcommand};
use crate::application::router::Routed;
use crate::domain::types::{GenerationRequest, JobKind, MusicOptions};
use crate::strings::messages;

const NEGATIVE_FLAG: &str = "--no";

pub async fn handle_music(ctx: &CommandContext<'_>, args: &str) -> Routed {
    let (sub, rest) = split_subcommand(args);
    let bare = rest.is_empty();

    match sub.as_str() {
        "" => {
            ctx.reply(&messages::usage("!music <prompt> [--no <avoid>]"))
                .await;
        }
        "status" if bare => {
            let status = ctx.services.music.status(ctx.channel()).await;
            ctx.reply(&messages::queue_status(JobKind::Music, &status)).await;
        }
        "clear" if bare => {
            if ctx.require_moderator().await {
                let removed = ctx.services.music.clear(ctx.channel()).await;
                ctx.reply(&messages::queue_cleared(JobKind::Music, removed)).await;
            }
        }
        "on" | "off" if bare => {
            if ctx.require_moderator().await {
                let enabled = sub == "on";
                let result = ctx
                    .services
                    .configs
                    .set(ctx.channel(), "musicEnabled", json!(enabled))
                    .await;
                ctx.report_saved("Music", if enabled { "on" } else { "off" }, result)
                    .await;
            }
        }
        _ => {
            let (prompt, negative_prompt) = split_negative(args);
            let mut request = GenerationRequest::new(ctx.channel(), ctx.user(), prompt);
            request.music = MusicOptions { negative_prompt };
            return ctx.submit(JobKind::Music, request).await;
        }
    }
    Routed::Command
}

/// `"calm piano --no drums"` becomes `("calm piano", Some("drums"))`.
fn split_negative(args: &str) -> (&str, Option<String>) {
    // Only a standalone `--no` counts; `--notes` stays part of the prompt.
    let flag = args.match_indices(NEGATIVE_FLAG).find(|&(idx, _)| {
        let before = args[..idx].chars().next_back();
        let after = args[idx + NEGATIVE_FLAG.len()..].chars().next();
        before.is_none_or(char::is_whitespace) && after.is_none_or(char::is_whitespace)
    });
    let Some((idx, _)) = flag else {
        return (args.trim(), None);
    };
    let prompt = args[..idx].trim();
    let negative = args[idx + NEGATIVE_FLAG.len()..].trim();
    let negative = (!negative.is_empty()).then(|| negative.to_string());
    (prompt, negative)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_negative() {
        assert_eq!(
            split_negative("calm piano --no drums, bass"),
            ("calm piano", Some("drums, bass".to_string()))
        );
        assert_eq!(split_negative("lofi beats"), ("lofi beats", None));
        assert_eq!(split_negative("lofi --no "), ("lofi", None));
    }

    #[test]
    fn test_split_negative_needs_standalone_flag() {
        assert_eq!(
            split_negative("jazz --notes swing"),
            ("jazz --notes swing", None)
        );
        assert_eq!(split_negative("lofi x--no drums"), ("lofi x--no drums", None));
        assert_eq!(
            split_negative("jazz --notes swing --no vocals"),
            ("jazz --notes swing", Some("vocals".to_string()))
        );
        assert_eq!(split_negative("--no drums"), ("", Some("drums".to_string())));
    }
}
