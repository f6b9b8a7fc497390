//! Error types for the research pipeline.
//!
//! Capability failures are recovered at the smallest possible scope, so most
//! of these never reach the caller of [`crate::ResearchOrchestrator::run`].
//! Only [`ResearchError`] is returned from a run.

use std::time::Duration;

use thiserror::Error;

/// Run-level failure. `Cancelled` is deliberately separate from the failure
/// variants so callers can report "cancelled" instead of "failed".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResearchError {
    #[error("Topic must not be empty")]
    InvalidTopic,

    #[error("No completion capability configured")]
    CompletionUnavailable,

    #[error("Research run was cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ResearchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ResearchError::Cancelled)
    }
}

/// Failure of the completion capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompletionError {
    #[error("Completion request failed: {0}")]
    Request(String),

    #[error("Completion returned no content")]
    EmptyResponse,

    #[error("Completion call was cancelled")]
    Cancelled,
}

/// Failure of the search capability. Zero hits is not an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    #[error("Search request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error ({0}): {1}")]
    Http(u16, String),

    #[error("Search endpoint rejected the request: {0}")]
    Rejected(String),

    #[error("Failed to parse search response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for SearchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SearchError::Timeout
        } else if e.is_decode() {
            SearchError::Parse(e.to_string())
        } else {
            SearchError::Network(e.to_string())
        }
    }
}

/// Failure of a single page fetch. Rendered into a diagnostic
/// [`crate::fetch::CrawlResult`] by the dispatcher, never propagated further.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("page load timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP status {0}")]
    Http(u16),

    #[error("page has no extractable text")]
    EmptyContent,

    #[error("fetcher not initialized: {0}")]
    NotInitialized(String),
}

/// Every tier of the response parser was exhausted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("could not extract a list from model output")]
pub struct ParseError {
    /// The unparsed model output, kept for diagnostics.
    pub blob: String,
}

/// Failure of one search round as a whole.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoundError {
    #[error("Search failed: {0}")]
    Search(#[from] SearchError),

    #[error("URL selection failed: {0}")]
    Selection(#[from] CompletionError),
}

/// Failure to persist a run snapshot.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
