use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to launch translation server: {0}")]
    ProcessLaunch(String),

    #[error("Translation server error: {message}")]
    Backend { message: String, payload: String },

    #[error("Translation server did not become ready within {0:?}")]
    BackendTimeout(Duration),

    #[error("Translation request cancelled")]
    Cancelled,
}

impl BridgeError {
    /// Per-request backend failure carrying the raw server payload
    pub fn backend<M: Into<String>, P: Into<String>>(message: M, payload: P) -> Self {
        Self::Backend {
            message: message.into(),
            payload: payload.into(),
        }
    }

    /// Errors that halt initialization and need manual intervention
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::ProcessLaunch(_))
    }

    /// Raw backend payload, if the error carries one
    pub fn payload(&self) -> Option<&str> {
        match self {
            Self::Backend { payload, .. } => Some(payload.as_str()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
