use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors that abort a pass or an entry point.
///
/// Per-record failures never end up here: the driver records them as
/// [`ErrorClass`] bookkeeping and moves on to the next record.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("snapshot not found: {}", .0.display())]
    SnapshotMissing(PathBuf),

    #[error("corrupt snapshot {}: {reason}", .path.display())]
    CorruptSnapshot { path: PathBuf, reason: String },

    #[error("failed to persist snapshot {}: {reason}", .path.display())]
    Persistence { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Io(String),

    #[error("{0}")]
    Json(String),
}

// ── From impls ─────────────────────────────────────────────────────────────

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Json(e.to_string())
    }
}

impl From<serde_yaml::Error> for PipelineError {
    fn from(e: serde_yaml::Error) -> Self {
        PipelineError::Config(e.to_string())
    }
}

/// Why the last attempt at a stage failed. Persisted in `enrichment_meta`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    RateLimited,
    BotCheck,
    Network,
    ExtractorUnavailable,
    MalformedResponse,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimited => write!(f, "rate_limited"),
            Self::BotCheck => write!(f, "bot_check"),
            Self::Network => write!(f, "network"),
            Self::ExtractorUnavailable => write!(f, "extractor_unavailable"),
            Self::MalformedResponse => write!(f, "malformed_response"),
        }
    }
}

/// Transient subtitle fetch failure. The record stays `needs_work`.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("anti-bot check triggered: {0}")]
    BotCheck(String),

    #[error("{0}")]
    Transient(String),
}

impl FetchError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::RateLimited(_) => ErrorClass::RateLimited,
            Self::BotCheck(_) => ErrorClass::BotCheck,
            Self::Transient(_) => ErrorClass::Network,
        }
    }
}

/// Structured extraction failure. The record stays `needs_work`.
#[derive(Debug, Clone, Error)]
pub enum ExtractionError {
    #[error("extractor unavailable: {0}")]
    Unavailable(String),

    #[error("malformed extractor response: {0}")]
    Malformed(String),
}

impl ExtractionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Unavailable(_) => ErrorClass::ExtractorUnavailable,
            Self::Malformed(_) => ErrorClass::MalformedResponse,
        }
    }
}
