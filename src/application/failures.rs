//! # Generation Failure Categories
//!
//! Maps raw provider errors to a category and the plain-language reason shown
//! to the requesting user. The raw text only goes to the log.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    ServiceUnavailable,
    ArtistNamesRejected,
    RateLimited,
    Timeout,
    AuthError,
    ContentPolicy,
    Unknown,
}

impl FailureCategory {
    pub fn code(&self) -> &'static str {
        match self {
            FailureCategory::ServiceUnavailable => "service_unavailable",
            FailureCategory::ArtistNamesRejected => "artist_names_rejected",
            FailureCategory::RateLimited => "rate_limited",
            FailureCategory::Timeout => "timeout",
            FailureCategory::AuthError => "auth_error",
            FailureCategory::ContentPolicy => "content_policy",
            FailureCategory::Unknown => "unknown_error",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            FailureCategory::ServiceUnavailable => {
                "the generation service is temporarily unavailable. Please try again in a few minutes."
            }
            FailureCategory::ArtistNamesRejected => {
                "your prompt was rejected. Please do not include specific artist names."
            }
            FailureCategory::RateLimited => {
                "the rate limit was exceeded. Please wait a moment before trying again."
            }
            FailureCategory::Timeout => {
                "generation timed out. Please try again with a simpler request."
            }
            FailureCategory::AuthError => {
                "the bot could not authenticate with the generation service. Please contact the bot administrator."
            }
            FailureCategory::ContentPolicy => {
                "your request was rejected for safety reasons. Please try something different."
            }
            FailureCategory::Unknown => "an unexpected error occurred. Please try again later.",
        }
    }
}

pub fn categorize(raw: &str) -> FailureCategory {
    let lower = raw.to_lowercase();

    if lower.contains("service is temporarily unavailable") || raw.contains("(E004)") {
        return FailureCategory::ServiceUnavailable;
    }
    if lower.contains("prompt was rejected") && lower.contains("artist names") {
        return FailureCategory::ArtistNamesRejected;
    }
    if lower.contains("rate limit") || lower.contains("quota exceeded") {
        return FailureCategory::RateLimited;
    }
    if lower.contains("timeout") || lower.contains("timed out") {
        return FailureCategory::Timeout;
    }
    if lower.contains("invalid") && lower.contains("token") {
        return FailureCategory::AuthError;
    }
    if lower.contains("content policy") || lower.contains("safety") {
        return FailureCategory::ContentPolicy;
    }
    FailureCategory::Unknown
}
