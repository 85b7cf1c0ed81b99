//! TIFF to JPEG conversion.
//!
//! Only the first page of a multi-page TIFF is converted.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::ImageReader;
use image::codecs::jpeg::JpegEncoder;
use stowage_scan::FileRecord;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::PreprocessError;
use crate::stage::{InheritMode, PipelineConfig, Stage, StageOutput};

const STAGE_NAME: &str = "tiff-to-jpeg";

/// Converts `.tif`/`.tiff` files to JPEG in a scratch directory.
#[derive(Default)]
pub struct TiffToJpeg {
    scratch: Option<TempDir>,
    converted: usize,
}

impl TiffToJpeg {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scratch directory, created on first use.
    fn scratch_dir(&mut self) -> Result<PathBuf, PreprocessError> {
        if let Some(dir) = &self.scratch {
            return Ok(dir.path().to_path_buf());
        }
        let dir = tempfile::Builder::new()
            .prefix("stowage-tiff-")
            .tempdir()
            .map_err(|source| PreprocessError::Setup {
                stage: STAGE_NAME,
                source,
            })?;
        debug!(path = %dir.path().display(), "scratch directory created");
        let path = dir.path().to_path_buf();
        self.scratch = Some(dir);
        Ok(path)
    }

    fn convert(
        &mut self,
        record: &FileRecord,
        scratch: &Path,
        logical_path: String,
        quality: u8,
    ) -> Result<FileRecord, String> {
        self.converted += 1;
        let stem = Path::new(record.file_name())
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("image");
        let dest = scratch.join(format!("{:06}-{stem}.jpg", self.converted));

        encode_first_page(record.local_path(), &dest, quality).map_err(|e| e.to_string())?;
        record
            .derive(dest, logical_path, "image/jpeg")
            .map_err(|e| e.to_string())
    }
}

impl Stage for TiffToJpeg {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    fn should_run(&self, files: &[FileRecord], config: &PipelineConfig) -> bool {
        config.tiff_mode != InheritMode::Disabled && files.iter().any(is_tiff)
    }

    fn process(
        &mut self,
        files: Vec<FileRecord>,
        config: &PipelineConfig,
    ) -> Result<StageOutput, PreprocessError> {
        let mode = config.tiff_mode;
        if mode == InheritMode::Disabled {
            return Ok(StageOutput::unchanged(files));
        }

        let mut taken: HashSet<String> = files.iter().map(|f| f.logical_path().to_string()).collect();
        let mut out = StageOutput {
            files: Vec::with_capacity(files.len()),
            ..Default::default()
        };

        for record in files {
            if config.cancel.is_cancelled() {
                info!(converted = out.transformed, "conversion cancelled");
                return Err(PreprocessError::Cancelled { stage: STAGE_NAME });
            }
            if !is_tiff(&record) {
                out.files.push(record);
                continue;
            }
            if mode == InheritMode::Preserve {
                out.skipped += 1;
                out.files.push(record);
                continue;
            }
            if config.dry_run {
                debug!(path = %record.logical_path(), "would convert to JPEG");
                out.transformed += 1;
                out.files.push(record);
                continue;
            }

            let Some(logical_path) = derived_logical_path(record.logical_path(), &taken) else {
                out.warnings.push(format!(
                    "{}: no free logical path for the converted file, keeping original",
                    record.logical_path()
                ));
                out.skipped += 1;
                out.files.push(record);
                continue;
            };

            let scratch = self.scratch_dir()?;
            match self.convert(&record, &scratch, logical_path, config.jpeg_quality) {
                Ok(derived) => {
                    info!(
                        from = %record.logical_path(),
                        to = %derived.logical_path(),
                        size = derived.size(),
                        "converted TIFF to JPEG"
                    );
                    taken.insert(derived.logical_path().to_string());
                    out.transformed += 1;
                    if mode == InheritMode::Both {
                        out.files.push(record);
                    }
                    out.files.push(derived);
                }
                Err(e) => {
                    out.warnings.push(format!(
                        "{}: conversion failed, keeping original: {e}",
                        record.logical_path()
                    ));
                    out.skipped += 1;
                    out.files.push(record);
                }
            }
        }

        Ok(out)
    }

    fn cleanup(&mut self) {
        if let Some(dir) = self.scratch.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!(path = %path.display(), error = %e, "failed to remove scratch directory");
            } else {
                debug!(path = %path.display(), "scratch directory removed");
            }
        }
    }
}

fn is_tiff(record: &FileRecord) -> bool {
    matches!(record.extension().as_deref(), Some("tif" | "tiff"))
}

/// Swaps the extension for `.jpg`, falling back to `<stem>.converted.jpg`
/// when that path is already taken.
fn derived_logical_path(logical: &str, taken: &HashSet<String>) -> Option<String> {
    let (dir, name) = logical.rsplit_once('/')?;
    let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
    [format!("{dir}/{stem}.jpg"), format!("{dir}/{stem}.converted.jpg")]
        .into_iter()
        .find(|candidate| !taken.contains(candidate))
}

fn encode_first_page(src: &Path, dest: &Path, quality: u8) -> Result<(), image::ImageError> {
    let img = ImageReader::open(src)?.with_guessed_format()?.decode()?;
    let rgb = img.to_rgb8();
    let mut writer = BufWriter::new(File::create(dest)?);
    JpegEncoder::new_with_quality(&mut writer, quality.clamp(1, 100)).encode_image(&rgb)?;
    writer.flush()?;
    Ok(())
}
