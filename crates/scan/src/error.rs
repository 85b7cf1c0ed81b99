//! Scan error types.

use std::path::PathBuf;

/// Errors that abort a scan.
///
/// Problems with individual files are never fatal; they are recorded as
/// skipped entries instead.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("cannot read {path}: {source}")]
    Inaccessible {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid logical root: {0}")]
    InvalidLogicalRoot(String),

    #[error("batch of {total} bytes exceeds the {limit} byte limit")]
    BatchTooLarge { total: u64, limit: u64 },
}
