//! Crate-wide error type.

use thiserror::Error;

/// Errors surfaced by the desk's subsystems.
#[derive(Error, Debug)]
pub enum DeskError {
    /// Transport-level HTTP failure (venue, store, or LLM endpoint).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// A venue returned a non-success status or an unparseable payload.
    #[error("venue {venue}: {message}")]
    Venue { venue: String, message: String },

    /// Store read or write failed.
    #[error("store error: {0}")]
    Store(String),

    /// LLM endpoint failure other than a timeout.
    #[error("llm error: {0}")]
    Llm(String),

    /// LLM call exceeded its deadline on every attempt.
    #[error("LLM timed out after {0}s")]
    LlmTimeout(u64),

    /// Unknown asset, portfolio, or agent.
    #[error("{0} not found")]
    NotFound(String),

    /// Missing or malformed request parameter.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl DeskError {
    pub fn venue(venue: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Venue {
            venue: venue.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DeskError>;
