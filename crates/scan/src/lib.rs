//! Directory scanning for upload.
//!
//! Walks a directory tree once, resolves the processing policy in effect
//! for every directory, filters files by extension and size, and computes
//! a content address for every eligible file.

pub mod content_type;
pub mod error;
pub mod policy;
pub mod record;
pub mod scanner;

pub use content_type::detect_content_type;
pub use error::ScanError;
pub use policy::load_policy_override;
pub use record::FileRecord;
pub use scanner::{ScanOptions, ScanResult, ScanTotals, SkipReason, SkippedFile, scan};
