// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for lmscribe

use std::path::PathBuf;
use thiserror::Error;

use crate::inference::InferenceError;

/// Result type alias for lmscribe operations
pub type Result<T> = std::result::Result<T, LmscribeError>;

/// lmscribe error types
#[derive(Error, Debug)]
pub enum LmscribeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Setup error: {0}")]
    Setup(String),

    #[error("Connect timeout: server unreachable at {0}")]
    ConnectTimeout(String),

    #[error("Read timeout: server slow or unresponsive after {0}s")]
    ReadTimeout(u64),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Failed to read {path:?}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<InferenceError> for LmscribeError {
    fn from(err: InferenceError) -> Self {
        match err {
            InferenceError::ConnectTimeout { endpoint } => Self::ConnectTimeout(endpoint),
            InferenceError::ReadTimeout { timeout } => Self::ReadTimeout(timeout.as_secs()),
            InferenceError::Server(msg) => Self::Server(msg),
            InferenceError::MalformedResponse(msg) => Self::MalformedResponse(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_inference_error_conversion_keeps_kind() {
        let err: LmscribeError = InferenceError::ReadTimeout {
            timeout: Duration::from_secs(120),
        }
        .into();
        assert!(matches!(err, LmscribeError::ReadTimeout(120)));

        let err: LmscribeError = InferenceError::ConnectTimeout {
            endpoint: "http://localhost:1234".into(),
        }
        .into();
        assert!(err.to_string().contains("unreachable"));
    }
}
