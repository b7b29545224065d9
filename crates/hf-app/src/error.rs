//! Error types for the hf-app service layer.

use std::path::PathBuf;

use hf_core::{HfError, ResultId, RunOrder};
use hf_gateway::GatewayError;

/// Unified error of the application layer, wrapping backend crate errors.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The batch submission failed outright.
    #[error("Submission failed: {0}")]
    Submission(String),

    #[error("Transport error: {0}")]
    Transport(String),

    /// Step input outside the valid range; raised before any network call.
    #[error("{0}")]
    OutOfRange(HfError),

    #[error("Cannot {operation}: {reason}")]
    InvalidState {
        operation: &'static str,
        reason: String,
    },

    #[error("Run {0} is not configured completely: {1}")]
    InvalidConfig(RunOrder, String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Run not found: {0}")]
    RunNotFound(RunOrder),

    #[error("Result {0} already has an open animation")]
    AlreadyStreaming(ResultId),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read file: {path}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Results error: {0}")]
    Results(String),
}

/// Result type for hf-app operations.
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub(crate) fn invalid_state(operation: &'static str, reason: impl Into<String>) -> Self {
        AppError::InvalidState {
            operation,
            reason: reason.into(),
        }
    }
}

impl From<HfError> for AppError {
    fn from(err: HfError) -> Self {
        match err {
            HfError::OutOfRange { .. } => AppError::OutOfRange(err),
            other => AppError::InvalidInput(other.to_string()),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        AppError::Transport(err.user_message())
    }
}

impl From<hf_results::ResultsError> for AppError {
    fn from(err: hf_results::ResultsError) -> Self {
        AppError::Results(err.to_string())
    }
}
