//! Error types for Predator core operations.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Predator core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Metadata lookup did not finish within the allowed time.
    #[error("Metadata fetch timed out after {}s", .0.as_secs())]
    FetchTimeout(Duration),

    /// The engine failed while dumping metadata.
    #[error("Metadata fetch failed: {0}")]
    FetchEngine(String),

    /// The engine returned metadata that could not be parsed.
    #[error("Failed to parse metadata: {0}")]
    MetadataParse(#[source] serde_json::Error),

    /// The download stopped because cancellation was requested.
    #[error("Download canceled")]
    DownloadCanceled,

    /// The engine failed while downloading.
    #[error("Download failed: {0}")]
    DownloadEngine(String),

    /// A download was requested with an incomplete selection.
    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    /// A download session is already active.
    #[error("A download is already in progress")]
    DownloadActive,

    /// The orchestrator is no longer accepting commands.
    #[error("Orchestrator channel closed")]
    ChannelClosed,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Category of a failed metadata fetch, as shown to the user.
///
/// Raw engine output never leaves the core; presentation layers only get
/// one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchFailure {
    /// The lookup timed out.
    Timeout,
    /// The engine reported an error.
    Engine,
    /// The engine output was not valid metadata.
    Parse,
}

impl std::fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "Failed to fetch info (timed out)"),
            Self::Engine => write!(f, "Failed to fetch info"),
            Self::Parse => write!(f, "Failed to parse info"),
        }
    }
}

impl Error {
    /// The user-facing category for a fetch error, if this is one.
    #[must_use]
    pub const fn fetch_failure(&self) -> Option<FetchFailure> {
        match self {
            Self::FetchTimeout(_) => Some(FetchFailure::Timeout),
            Self::FetchEngine(_) => Some(FetchFailure::Engine),
            Self::MetadataParse(_) => Some(FetchFailure::Parse),
            _ => None,
        }
    }

    /// Whether this error is the expected result of a user cancellation.
    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(self, Self::DownloadCanceled)
    }
}
