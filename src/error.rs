use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Failures reported by a page driver.
#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("Failed to connect to Chrome: {0}")]
    ConnectionFailed(String),

    #[error("Failed to launch Chrome: {0}")]
    LaunchFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("No page available")]
    NoPage,

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("CDP error: {0}")]
    CdpError(#[from] chromiumoxide::error::CdpError),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, BrowserError>;

/// Error taxonomy surfaced in capture results.
///
/// An absent element is deliberately not represented here: optional UI is
/// modelled as a plain `false`/skip, never as an error value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NavigationFailed,
    NoVariants,
    InteractionFailed,
    ArtifactWriteFailed,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::NavigationFailed => "NavigationFailed",
            ErrorKind::NoVariants => "NoVariants",
            ErrorKind::InteractionFailed => "InteractionFailed",
            ErrorKind::ArtifactWriteFailed => "ArtifactWriteFailed",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Navigation to {url} failed: {reason}")]
    NavigationFailed { url: String, reason: String },

    #[error("No variants found: {0}")]
    NoVariants(String),

    #[error("Interaction with '{selector}' failed: {reason}")]
    InteractionFailed { selector: String, reason: String },

    #[error("Failed to write artifact {}: {source}", path.display())]
    ArtifactWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl CaptureError {
    /// Maps the error onto the result taxonomy, if it belongs to it.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            CaptureError::NavigationFailed { .. } => Some(ErrorKind::NavigationFailed),
            CaptureError::NoVariants(_) => Some(ErrorKind::NoVariants),
            CaptureError::InteractionFailed { .. } => Some(ErrorKind::InteractionFailed),
            CaptureError::ArtifactWriteFailed { .. } => Some(ErrorKind::ArtifactWriteFailed),
            CaptureError::Config(_)
            | CaptureError::Io(_)
            | CaptureError::Json(_)
            | CaptureError::Csv(_) => None,
        }
    }
}
