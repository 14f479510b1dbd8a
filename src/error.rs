use serde::Serialize;

use crate::scan::model::SkipReason;

/// Crate-wide error type.
///
/// Only `Config` is expected to abort a user-facing operation outright; the
/// per-file classify/read/move failures are folded into rows and summaries.
#[derive(Debug, thiserror::Error)]
pub enum OrganizerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("{0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, OrganizerError>;

impl Serialize for OrganizerError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Failure modes of a single classification round-trip.
///
/// These never reach the caller of `classify`; they are recorded in the
/// fallback result's metadata instead.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClassifyError {
    #[error("{provider} request failed: {message}")]
    Network { provider: String, message: String },

    #[error("{provider} API error ({status}): {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider} response has unexpected shape: {detail}")]
    Envelope { provider: String, detail: String },

    #[error("{provider} response did not contain parseable JSON")]
    Parse { provider: String },
}

impl ClassifyError {
    pub fn kind(&self) -> &'static str {
        match self {
            ClassifyError::Network { .. } => "network",
            ClassifyError::Status { .. } => "status",
            ClassifyError::Envelope { .. } => "envelope",
            ClassifyError::Parse { .. } => "parse",
        }
    }
}

/// A file that could not be turned into classifiable content.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ReadError {
    pub reason: SkipReason,
    pub message: String,
}

impl ReadError {
    pub fn new(reason: SkipReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

/// Cap error/response text kept for the user-visible log.
pub(crate) fn truncate_for_log(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}
