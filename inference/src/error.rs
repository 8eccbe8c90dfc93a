use std::time::Duration;

use thiserror::Error;

/// Why a model answer could not be used.
///
/// These never reach callers of `predict`; they are logged and carried in
/// `Outcome::Fallback` for diagnosis.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InferenceError {
    #[error("inference transport failed: {0}")]
    Transport(String),
    #[error("inference timed out after {0:?}")]
    Timeout(Duration),
    #[error("could not parse model output: {0}")]
    Parse(String),
    #[error("model output failed validation: {0}")]
    Validation(String),
}

impl InferenceError {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Timeout(_) => "timeout",
            Self::Parse(_) => "parse",
            Self::Validation(_) => "validation",
        }
    }
}
