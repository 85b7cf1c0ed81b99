//! Content addressing, chunked multipart transfer and retry policy.
//!
//! Everything that touches file bytes or the object store lives here; the
//! coordinator conversation is driven by `stowage-uploader`.

mod chunked;
mod multipart;
mod progress;
mod retry;
mod store;
mod validation;

pub use chunked::{PartReader, content_address_bytes, content_address_file};
pub use multipart::{ChunkedUploader, PartUpload};
pub use progress::ThroughputMeter;
pub use retry::{RetryPolicy, Retryable};
pub use store::{
    HttpObjectStore, MAX_ERROR_BODY, ObjectStore, StoreFuture, strip_etag_quotes, truncate_error_body,
};
pub use validation::{join_logical_path, validate_logical_path};

/// Default multipart part size: 10 MiB.
///
/// The coordinator's descriptor always carries the actual part size; this
/// is only used for dry-run planning.
pub const DEFAULT_PART_SIZE: u64 = 10 * 1024 * 1024;

/// Prefix identifying the hash function of a content address.
pub const CONTENT_ADDRESS_PREFIX: &str = "sha256:";

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid transfer request: {0}")]
    Validation(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("object store returned HTTP {status}: {message}")]
    Store { status: u16, message: String },

    #[error("object store returned no ETag for part {0}")]
    MissingEtag(u32),

    #[error("cancelled")]
    Cancelled,
}

impl TransferError {
    /// Wraps a reqwest failure that happened before a response arrived.
    ///
    /// A request that could not even be built (a malformed presigned URL)
    /// is a validation error and is never retried.
    pub fn transport(err: reqwest::Error) -> Self {
        if err.is_builder() {
            TransferError::Validation(err.to_string())
        } else {
            TransferError::Transport(err.to_string())
        }
    }
}
