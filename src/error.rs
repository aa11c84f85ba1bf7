use thiserror::Error;

/// Errors surfaced by the tour engine and its collaborators.
///
/// Only structural failures and action resolution failures ever reach the
/// caller. Hook, integration and storage failures are absorbed where they
/// happen and only show up in the logs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TourError {
    #[error("step index {index} is out of range for a tour of {total} steps")]
    StepOutOfRange { index: usize, total: usize },

    #[error("invalid tour state: {0}")]
    InvalidState(String),

    #[error("element '{selector}' was not found within {timeout_ms}ms")]
    ElementNotFound { selector: String, timeout_ms: u64 },

    #[error("'{kind}' action requires a target")]
    MissingTarget { kind: String },

    #[error("invalid tour definition: {0}")]
    InvalidDefinition(String),

    #[error("DOM operation failed: {0}")]
    Dom(String),

    #[error("failed to load tour definition: {0}")]
    Definition(String),
}

impl From<serde_json::Error> for TourError {
    fn from(err: serde_json::Error) -> Self {
        TourError::Definition(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TourError>;
