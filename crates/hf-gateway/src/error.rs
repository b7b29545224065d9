//! Error types for gateway calls.

use thiserror::Error;

/// Failure of one gateway request or stream.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Gateway rejected request ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Malformed gateway payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Animation stream error: {0}")]
    Stream(String),

    #[error("Invalid gateway URL: {0}")]
    InvalidUrl(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    /// Text suitable for a status banner: the gateway's own message when it
    /// sent one, the full error otherwise.
    pub fn user_message(&self) -> String {
        match self {
            GatewayError::Api { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Transport(err.to_string())
    }
}
