/// Errors that abort preprocessing.
///
/// Failures converting a single file are not errors; the stage reports a
/// warning and keeps the original.
#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("{stage}: cannot prepare scratch storage: {source}")]
    Setup {
        stage: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage}: duplicate logical path {path}")]
    DuplicateLogicalPath { stage: &'static str, path: String },

    #[error("{stage}: cancelled")]
    Cancelled { stage: &'static str },
}
