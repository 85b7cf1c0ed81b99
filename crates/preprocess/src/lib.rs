//! File transformations applied between scanning and upload.
//!
//! A [`Pipeline`] runs an ordered list of [`Stage`]s over the scanned
//! records. Stages never edit a record in place: a transformed file is a
//! new record pointing at a derived file in the stage's scratch storage.

pub mod error;
pub mod pipeline;
pub mod stage;
pub mod tiff;

pub use error::PreprocessError;
pub use pipeline::{Pipeline, PipelineOutput, StageReport};
pub use stage::{InheritMode, PipelineConfig, Stage, StageOutput};
pub use tiff::TiffToJpeg;
