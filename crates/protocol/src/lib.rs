//! Wire protocol types for the Stowage coordinator API.
//!
//! The coordinator speaks camelCase JSON over HTTPS. A batch goes through
//! four calls: `init`, one `start-file`/`complete-file` pair per file, and
//! `finalize`.

pub mod constants;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use messages::{
    ApiErrorBody, CompleteFileRequest, CompleteFileResponse, FinalizeResponse, InitRequest,
    InitResponse, MultipartCompletion, PartTarget, StartFileRequest, UploadDescriptor,
};
pub use types::{PartRecord, PolicyOverride, ProcessingPolicy, UploadKind, part_count};
