use std::collections::HashSet;

use stowage_scan::FileRecord;
use tracing::{debug, error, info, warn};

use crate::PreprocessError;
use crate::stage::{PipelineConfig, Stage};
use crate::tiff::TiffToJpeg;

/// What one stage did during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub name: &'static str,
    pub ran: bool,
    pub transformed: usize,
    pub skipped: usize,
}

#[derive(Debug, Default)]
pub struct PipelineOutput {
    pub files: Vec<FileRecord>,
    pub stages: Vec<StageReport>,
    pub warnings: Vec<String>,
}

impl PipelineOutput {
    pub fn transformed(&self) -> usize {
        self.stages.iter().map(|s| s.transformed).sum()
    }
}

/// Ordered list of stages.
///
/// Derived files live in the stages' scratch storage until
/// [`Pipeline::cleanup`] is called, so the pipeline must outlive the
/// upload of its output.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stages every upload runs.
    pub fn standard() -> Self {
        Self::new().with_stage(Box::new(TiffToJpeg::new()))
    }

    pub fn with_stage(mut self, stage: Box<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Runs the stages in order, each consuming the previous output.
    ///
    /// On any error every stage is cleaned up before the error is returned.
    pub fn run(
        &mut self,
        files: Vec<FileRecord>,
        config: &PipelineConfig,
    ) -> Result<PipelineOutput, PreprocessError> {
        match self.run_stages(files, config) {
            Ok(output) => Ok(output),
            Err(e) => {
                error!(error = %e, "preprocessing failed");
                self.cleanup();
                Err(e)
            }
        }
    }

    fn run_stages(
        &mut self,
        mut files: Vec<FileRecord>,
        config: &PipelineConfig,
    ) -> Result<PipelineOutput, PreprocessError> {
        let mut output = PipelineOutput::default();

        for stage in &mut self.stages {
            let name = stage.name();
            if config.cancel.is_cancelled() {
                return Err(PreprocessError::Cancelled { stage: name });
            }
            if !stage.should_run(&files, config) {
                debug!(stage = name, "stage not applicable");
                output.stages.push(StageReport {
                    name,
                    ran: false,
                    transformed: 0,
                    skipped: 0,
                });
                continue;
            }

            let result = stage.process(files, config)?;
            ensure_unique(name, &result.files)?;
            info!(
                stage = name,
                transformed = result.transformed,
                skipped = result.skipped,
                warnings = result.warnings.len(),
                dry_run = config.dry_run,
                "stage finished"
            );
            for w in &result.warnings {
                warn!(stage = name, "{w}");
            }

            output.stages.push(StageReport {
                name,
                ran: true,
                transformed: result.transformed,
                skipped: result.skipped,
            });
            output.warnings.extend(result.warnings);
            files = result.files;
        }

        // Derived files join the batch unsorted; restore smallest-first.
        files.sort_by(|a, b| {
            a.size()
                .cmp(&b.size())
                .then_with(|| a.logical_path().cmp(b.logical_path()))
        });
        output.files = files;
        Ok(output)
    }

    /// Releases every stage's scratch storage.
    pub fn cleanup(&mut self) {
        for stage in &mut self.stages {
            stage.cleanup();
        }
    }
}

fn ensure_unique(stage: &'static str, files: &[FileRecord]) -> Result<(), PreprocessError> {
    let mut seen = HashSet::with_capacity(files.len());
    for f in files {
        if !seen.insert(f.logical_path()) {
            return Err(PreprocessError::DuplicateLogicalPath {
                stage,
                path: f.logical_path().to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageOutput;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use stowage_protocol::ProcessingPolicy;

    fn logical_paths(files: &[FileRecord]) -> Vec<&str> {
        files.iter().map(|f| f.logical_path()).collect()
    }

    fn record(logical: &str, size: u64) -> FileRecord {
        FileRecord::new(
            format!("/src{logical}").into(),
            logical.into(),
            size,
            "text/plain",
            format!("sha256:{size:064x}"),
            ProcessingPolicy::default(),
        )
        .unwrap()
    }

    /// Test stage with scripted behaviour.
    struct MockStage {
        name: &'static str,
        applies: bool,
        duplicate: bool,
        fail: bool,
        /// Appended to the stage output, as a conversion would.
        derived: Option<FileRecord>,
        calls: Arc<AtomicUsize>,
        cleanups: Arc<AtomicUsize>,
    }

    impl MockStage {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                applies: true,
                duplicate: false,
                fail: false,
                derived: None,
                calls: Arc::new(AtomicUsize::new(0)),
                cleanups: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl Stage for MockStage {
        fn name(&self) -> &'static str {
            self.name
        }

        fn should_run(&self, _files: &[FileRecord], _config: &PipelineConfig) -> bool {
            self.applies
        }

        fn process(
            &mut self,
            mut files: Vec<FileRecord>,
            _config: &PipelineConfig,
        ) -> Result<StageOutput, PreprocessError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(PreprocessError::Setup {
                    stage: self.name,
                    source: std::io::Error::other("boom"),
                });
            }
            let mut transformed = 0;
            if self.duplicate
                && let Some(first) = files.first().cloned()
            {
                files.push(first);
                transformed = 1;
            }
            if let Some(derived) = self.derived.clone() {
                files.push(derived);
                transformed += 1;
            }
            Ok(StageOutput {
                files,
                transformed,
                ..Default::default()
            })
        }

        fn cleanup(&mut self) {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn empty_pipeline_passes_files_through() {
        let mut pipeline = Pipeline::new();
        let out = pipeline
            .run(vec![record("/a.txt", 1), record("/b.txt", 2)], &PipelineConfig::default())
            .unwrap();
        assert_eq!(out.files.len(), 2);
        assert!(out.stages.is_empty());
    }

    #[test]
    fn inapplicable_stage_is_skipped() {
        let mut stage = MockStage::new("noop");
        stage.applies = false;
        let calls = stage.calls.clone();
        let mut pipeline = Pipeline::new().with_stage(Box::new(stage));

        let out = pipeline.run(vec![record("/a.txt", 1)], &PipelineConfig::default()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!out.stages[0].ran);
        assert_eq!(out.files.len(), 1);
    }

    #[test]
    fn stages_run_in_order_on_previous_output() {
        let first = MockStage::new("first");
        let second = MockStage::new("second");
        let calls = second.calls.clone();
        let mut pipeline = Pipeline::new()
            .with_stage(Box::new(first))
            .with_stage(Box::new(second));

        let out = pipeline.run(vec![record("/a.txt", 1)], &PipelineConfig::default()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let names: Vec<&str> = out.stages.iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn duplicate_logical_path_fails_and_cleans_up() {
        let mut dup = MockStage::new("dup");
        dup.duplicate = true;
        let other = MockStage::new("other");
        let dup_cleanups = dup.cleanups.clone();
        let other_cleanups = other.cleanups.clone();
        let mut pipeline = Pipeline::new()
            .with_stage(Box::new(other))
            .with_stage(Box::new(dup));

        let err = pipeline
            .run(vec![record("/a.txt", 1)], &PipelineConfig::default())
            .unwrap_err();
        assert!(matches!(
            err,
            PreprocessError::DuplicateLogicalPath { stage: "dup", ref path } if path == "/a.txt"
        ));
        assert_eq!(dup_cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(other_cleanups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stage_error_cleans_up_every_stage() {
        let ok = MockStage::new("ok");
        let mut failing = MockStage::new("failing");
        failing.fail = true;
        let after = MockStage::new("after");
        let counters = [ok.cleanups.clone(), failing.cleanups.clone(), after.cleanups.clone()];
        let after_calls = after.calls.clone();
        let mut pipeline = Pipeline::new()
            .with_stage(Box::new(ok))
            .with_stage(Box::new(failing))
            .with_stage(Box::new(after));

        assert!(pipeline.run(vec![record("/a.txt", 1)], &PipelineConfig::default()).is_err());
        assert_eq!(after_calls.load(Ordering::SeqCst), 0);
        for c in counters {
            assert_eq!(c.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn output_is_resorted_smallest_first() {
        let mut stage = MockStage::new("derive");
        stage.derived = Some(record("/a.jpg", 5));
        let mut pipeline = Pipeline::new().with_stage(Box::new(stage));

        let out = pipeline
            .run(
                vec![record("/b.txt", 3), record("/c.txt", 5), record("/d.txt", 9)],
                &PipelineConfig::default(),
            )
            .unwrap();
        assert_eq!(logical_paths(&out.files), vec!["/b.txt", "/a.jpg", "/c.txt", "/d.txt"]);
    }

    #[test]
    fn cancelled_run_stops_and_cleans_up() {
        let stage = MockStage::new("never");
        let calls = stage.calls.clone();
        let cleanups = stage.cleanups.clone();
        let mut pipeline = Pipeline::new().with_stage(Box::new(stage));
        let config = PipelineConfig::default();
        config.cancel.cancel();

        let err = pipeline.run(vec![record("/a.txt", 1)], &config).unwrap_err();
        assert!(matches!(err, PreprocessError::Cancelled { stage: "never" }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }
}
