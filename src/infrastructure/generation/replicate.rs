//! Hosted predictions API (Replicate-style).
//!
//! Creates a prediction with `Prefer: wait` and, if it is still running when the
//! server returns, polls its `get` URL until it reaches a terminal state. The
//! job queue's timeout bounds the whole exchange; dropping the future aborts
//! the in-flight request.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::domain::config::ReplicateConfig;
use crate::domain::errors::GenerationError;
use crate::domain::traits::GenerationApi;
use crate::domain::types::{GenerationOptions, JobKind};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Serialize)]
struct PredictionRequest {
    input: Value,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    #[serde(default)]
    id: String,
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    urls: Option<PredictionUrls>,
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    get: Option<String>,
}

pub struct ReplicateGenerator {
    client: Client,
    api_base: String,
    token: SecretString,
    speech_model: String,
    music_model: String,
}

impl ReplicateGenerator {
    pub fn from_config(config: &ReplicateConfig) -> Result<Self> {
        let token = std::env::var(&config.api_token_env)
            .with_context(|| format!("{} is not set", config.api_token_env))?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: SecretString::new(token),
            speech_model: config.speech_model.clone(),
            music_model: config.music_model.clone(),
        })
    }

    fn model(&self, kind: JobKind) -> &str {
        match kind {
            JobKind::Speech => &self.speech_model,
            JobKind::Music => &self.music_model,
        }
    }

    async fn create(&self, model: &str, input: Value) -> Result<Prediction, GenerationError> {
        let url = format!("{}/models/{}/predictions", self.api_base, model);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.token.expose_secret())
            .header("Prefer", "wait")
            .json(&PredictionRequest { input })
            .send()
            .await?;
        read_prediction(response).await
    }

    async fn poll(&self, url: &str) -> Result<Prediction, GenerationError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(self.token.expose_secret())
            .send()
            .await?;
        read_prediction(response).await
    }
}

async fn read_prediction(response: reqwest::Response) -> Result<Prediction, GenerationError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(GenerationError::Provider {
            raw: api_error_text(status.as_u16(), &body),
            error_type: Some(format!("Http{}", status.as_u16())),
        });
    }
    serde_json::from_str(&body).map_err(|e| GenerationError::InvalidOutput(e.to_string()))
}

/// Error text from a failed HTTP exchange; prefers the API's `detail` field.
fn api_error_text(status: u16, body: &str) -> String {
    let detail = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        v.get("detail")
            .or_else(|| v.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    match (status, detail) {
        (401, d) => format!("Invalid API token: {}", d.unwrap_or_default()),
        (429, d) => format!("Rate limit exceeded: {}", d.unwrap_or_default()),
        (_, Some(d)) => d,
        (_, None) => format!("HTTP {status}: {body}"),
    }
}

/// Outcome of a prediction: `Ok(Some(url))` when done, `Ok(None)` while running.
fn outcome(prediction: &Prediction) -> Result<Option<String>, GenerationError> {
    match prediction.status.as_str() {
        "succeeded" => first_url(prediction.output.as_ref())
            .map(Some)
            .ok_or_else(|| GenerationError::InvalidOutput("prediction has no audio URL".to_string())),
        "failed" | "canceled" => {
            let raw = match &prediction.error {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => format!("prediction {}", prediction.status),
            };
            Err(GenerationError::Provider {
                raw,
                error_type: Some("PredictionFailed".to_string()),
            })
        }
        _ => Ok(None),
    }
}

/// Output is either a URL or a list of URLs.
fn first_url(output: Option<&Value>) -> Option<String> {
    match output? {
        Value::String(url) => Some(url.clone()),
        Value::Array(items) => items.iter().find_map(|v| v.as_str().map(str::to_string)),
        _ => None,
    }
}

#[async_trait]
impl GenerationApi for ReplicateGenerator {
    async fn generate(
        &self,
        kind: JobKind,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, GenerationError> {
        let model = self.model(kind);
        let mut prediction = self.create(model, options.to_input(prompt)).await?;
        tracing::debug!(model, id = %prediction.id, status = %prediction.status, "Prediction created");

        loop {
            if let Some(url) = outcome(&prediction)? {
                return Ok(url);
            }
            let Some(get) = prediction.urls.as_ref().and_then(|u| u.get.clone()) else {
                return Err(GenerationError::InvalidOutput(
                    "running prediction has no poll URL".to_string(),
                ));
            };
            tokio::time::sleep(POLL_INTERVAL).await;
            prediction = self.poll(&get).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn prediction(value: Value) -> Prediction {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_succeeded_with_string_or_list_output() {
        let single = prediction(json!({ "status": "succeeded", "output": "https://cdn/a.mp3" }));
        assert_eq!(outcome(&single).unwrap().as_deref(), Some("https://cdn/a.mp3"));

        let list = prediction(json!({ "status": "succeeded", "output": ["https://cdn/b.wav"] }));
        assert_eq!(outcome(&list).unwrap().as_deref(), Some("https://cdn/b.wav"));

        let empty = prediction(json!({ "status": "succeeded", "output": null }));
        assert!(matches!(outcome(&empty), Err(GenerationError::InvalidOutput(_))));
    }

    #[test]
    fn test_running_prediction_has_no_outcome_yet() {
        let running = prediction(json!({
            "id": "p1",
            "status": "processing",
            "urls": { "get": "https://api/predictions/p1" }
        }));
        assert_eq!(outcome(&running).unwrap(), None);
    }

    #[test]
    fn test_failed_prediction_keeps_raw_error() {
        let failed = prediction(json!({
            "status": "failed",
            "error": "Service is temporarily unavailable. Please try again later. (E004)"
        }));
        let err = outcome(&failed).unwrap_err();
        assert!(err.raw().contains("(E004)"));
    }

    #[test]
    fn test_api_error_text() {
        assert!(api_error_text(401, r#"{"detail":"bad token"}"#).starts_with("Invalid API token"));
        assert!(api_error_text(429, "").contains("Rate limit"));
        assert_eq!(api_error_text(422, r#"{"detail":"Prompt was rejected"}"#), "Prompt was rejected");
        assert_eq!(api_error_text(500, "oops"), "HTTP 500: oops");
    }
}
