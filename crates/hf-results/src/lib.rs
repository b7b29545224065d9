//! hf-results: per-step artifacts, their session cache and frame export.

pub mod export;
pub mod store;
pub mod types;

pub use export::{ExportSummary, FrameExport};
pub use store::ArtifactStore;
pub use types::*;

pub type ResultsResult<T> = Result<T, ResultsError>;

#[derive(thiserror::Error, Debug)]
pub enum ResultsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Invalid path: {message}")]
    InvalidPath { message: String },
}
