use serde::{Deserialize, Serialize};
use stowage_scan::FileRecord;
use tokio_util::sync::CancellationToken;

use crate::PreprocessError;

/// How a converted file relates to its source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InheritMode {
    /// Upload the derived file instead of the original.
    #[default]
    Replace,
    /// Upload the original untouched.
    Preserve,
    /// Upload both.
    Both,
    /// Do not run the stage at all.
    Disabled,
}

/// Settings shared by every stage of a run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Count what would change without touching the filesystem.
    pub dry_run: bool,
    pub tiff_mode: InheritMode,
    /// JPEG quality, 1-100.
    pub jpeg_quality: u8,
    /// Stops the run between files once cancelled.
    pub cancel: CancellationToken,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            tiff_mode: InheritMode::Replace,
            jpeg_quality: 90,
            cancel: CancellationToken::new(),
        }
    }
}

/// Result of one stage.
#[derive(Debug, Default)]
pub struct StageOutput {
    pub files: Vec<FileRecord>,
    pub transformed: usize,
    pub skipped: usize,
    pub warnings: Vec<String>,
}

impl StageOutput {
    /// Output that passes `files` through untouched.
    pub fn unchanged(files: Vec<FileRecord>) -> Self {
        Self {
            files,
            ..Default::default()
        }
    }
}

/// A transformation step of the pipeline.
pub trait Stage: Send {
    fn name(&self) -> &'static str;

    /// Whether the stage has anything to do for `files`.
    fn should_run(&self, files: &[FileRecord], config: &PipelineConfig) -> bool;

    fn process(
        &mut self,
        files: Vec<FileRecord>,
        config: &PipelineConfig,
    ) -> Result<StageOutput, PreprocessError>;

    /// Releases scratch storage. Called once uploads no longer need the
    /// derived files, or when the pipeline fails.
    fn cleanup(&mut self);
}
