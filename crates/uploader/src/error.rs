//! Upload error types.

use stowage_transfer::{Retryable, TransferError};

/// Errors produced while running a batch.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("invalid batch: {0}")]
    Validation(String),

    #[error("coordinator returned HTTP {status}: {message}")]
    Coordinator { status: u16, message: String },

    #[error("coordinator rejected completion: {0}")]
    Rejected(String),

    #[error("coordinator unreachable: {0}")]
    Transport(String),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cancelled")]
    Cancelled,
}

impl UploadError {
    /// Maps a reqwest failure: malformed requests are validation errors,
    /// everything else is transport.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_builder() {
            UploadError::Validation(err.to_string())
        } else {
            UploadError::Transport(err.to_string())
        }
    }
}

impl Retryable for UploadError {
    fn is_retryable(&self) -> bool {
        match self {
            UploadError::Transport(_) => true,
            UploadError::Coordinator { status, .. } => *status >= 500,
            UploadError::Transfer(e) => e.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let coord = |status| UploadError::Coordinator {
            status,
            message: String::new(),
        };
        assert!(coord(500).is_retryable());
        assert!(coord(503).is_retryable());
        assert!(!coord(400).is_retryable());
        assert!(!coord(409).is_retryable());
        assert!(UploadError::Transport("reset".into()).is_retryable());
        assert!(UploadError::Transfer(TransferError::Store {
            status: 502,
            message: String::new()
        })
        .is_retryable());
        assert!(!UploadError::Transfer(TransferError::MissingEtag(1)).is_retryable());
        assert!(!UploadError::Rejected("no".into()).is_retryable());
        assert!(!UploadError::Validation("dup".into()).is_retryable());
        assert!(!UploadError::Cancelled.is_retryable());
    }
}
