//! External-script generation backend.
//!
//! Runs the configured program with the flat input object as its last argument
//! and reads one JSON result from stdout:
//! `{"success": true, "audio_url": "..."}` or
//! `{"success": false, "raw_error": "...", "error_type": "..."}`.
//! The child is killed when the future is dropped (e.g. on timeout).

use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use tokio::process::Command;

use crate::domain::config::{ScriptCommand, ScriptConfig};
use crate::domain::errors::GenerationError;
use crate::domain::traits::GenerationApi;
use crate::domain::types::{GenerationOptions, JobKind};

#[derive(Debug, Deserialize)]
struct ScriptResult {
    success: bool,
    #[serde(default)]
    audio_url: Option<String>,
    #[serde(default)]
    raw_error: Option<String>,
    #[serde(default)]
    error_type: Option<String>,
}

pub struct ScriptGenerator {
    config: ScriptConfig,
}

impl ScriptGenerator {
    pub fn new(config: ScriptConfig) -> Self {
        Self { config }
    }

    fn command(&self, kind: JobKind) -> Option<&ScriptCommand> {
        match kind {
            JobKind::Speech => self.config.speech.as_ref(),
            JobKind::Music => self.config.music.as_ref(),
        }
    }
}

/// Interpret the script's stdout, falling back to stderr for the error text.
fn parse_output(stdout: &str, stderr: &str, exit_ok: bool) -> Result<String, GenerationError> {
    let line = stdout.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
    match serde_json::from_str::<ScriptResult>(line) {
        Ok(ScriptResult {
            success: true,
            audio_url: Some(url),
            ..
        }) if !url.trim().is_empty() => Ok(url),
        Ok(ScriptResult { success: true, .. }) => Err(GenerationError::InvalidOutput(
            "script reported success without an audio_url".to_string(),
        )),
        Ok(result) => Err(GenerationError::Provider {
            raw: result
                .raw_error
                .unwrap_or_else(|| "script reported failure".to_string()),
            error_type: result.error_type,
        }),
        Err(_) if !exit_ok => Err(GenerationError::Provider {
            raw: stderr.trim().to_string(),
            error_type: Some("ScriptExit".to_string()),
        }),
        Err(e) => Err(GenerationError::InvalidOutput(format!(
            "unreadable script output: {e}"
        ))),
    }
}

#[async_trait]
impl GenerationApi for ScriptGenerator {
    async fn generate(
        &self,
        kind: JobKind,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, GenerationError> {
        let command = self.command(kind).ok_or_else(|| {
            GenerationError::Transport(format!("no script configured for {}", kind.as_str()))
        })?;

        let input = options.to_input(prompt).to_string();
        let output = Command::new(&command.program)
            .args(&command.args)
            .arg(&input)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| GenerationError::Transport(format!("failed to run {}: {e}", command.program)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::debug!(
            program = %command.program,
            status = ?output.status,
            "Generation script exited"
        );
        parse_output(&stdout, &stderr, output.status.success())
    }
}
