//! Data types for the upload flow.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use stowage_protocol::{FinalizeResponse, InitResponse, UploadKind};
use stowage_scan::FileRecord;
use stowage_transfer::RetryPolicy;

/// Lifecycle of one file within a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    InFlight,
    Completed,
    Failed(String),
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed(_))
    }
}

/// One file's transfer.
///
/// Transitions are one-way: once completed or failed, later transitions
/// are ignored and report `false`.
#[derive(Debug, Clone)]
pub struct TransferTask {
    record: FileRecord,
    state: TaskState,
}

impl TransferTask {
    pub fn new(record: FileRecord) -> Self {
        Self {
            record,
            state: TaskState::Pending,
        }
    }

    pub fn record(&self) -> &FileRecord {
        &self.record
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    /// Pending to in-flight.
    pub fn begin(&mut self) -> bool {
        if self.state != TaskState::Pending {
            return false;
        }
        self.state = TaskState::InFlight;
        true
    }

    /// In-flight to completed.
    pub fn complete(&mut self) -> bool {
        if self.state != TaskState::InFlight {
            return false;
        }
        self.state = TaskState::Completed;
        true
    }

    /// Any non-terminal state to failed.
    pub fn fail(&mut self, cause: impl Into<String>) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = TaskState::Failed(cause.into());
        true
    }
}

/// A batch opened with the coordinator.
///
/// Lives for one run only. Tasks are individually locked so file workers
/// can update their own task without coordinating with each other.
#[derive(Debug)]
pub struct BatchSession {
    pub batch_id: String,
    pub session_id: String,
    /// Threshold the coordinator announced, if any.
    pub multipart_threshold: Option<u64>,
    tasks: Vec<Mutex<TransferTask>>,
}

impl BatchSession {
    pub fn new(init: InitResponse, records: Vec<FileRecord>) -> Self {
        Self {
            batch_id: init.batch_id,
            session_id: init.session_id,
            multipart_threshold: init.multipart_threshold,
            tasks: records
                .into_iter()
                .map(|r| Mutex::new(TransferTask::new(r)))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Runs `f` on task `index` under its lock.
    pub fn with_task<R>(&self, index: usize, f: impl FnOnce(&mut TransferTask) -> R) -> Option<R> {
        let task = self.tasks.get(index)?;
        let mut guard = task.lock().unwrap_or_else(PoisonError::into_inner);
        Some(f(&mut guard))
    }

    pub fn into_tasks(self) -> Vec<TransferTask> {
        self.tasks
            .into_iter()
            .map(|t| t.into_inner().unwrap_or_else(PoisonError::into_inner))
            .collect()
    }
}

/// Progress event emitted during a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    BatchInitialized {
        batch_id: String,
        file_count: usize,
        total_bytes: u64,
    },
    FileStarted {
        logical_path: String,
        size: u64,
        kind: UploadKind,
    },
    /// Bytes stored for a file: one event per part, or one for a simple PUT.
    BytesTransferred { logical_path: String, bytes: u64 },
    FileCompleted { logical_path: String, size: u64 },
    FileFailed { logical_path: String, error: String },
    BatchFinalized {
        files_uploaded: u64,
        total_bytes: u64,
        storage_prefix: String,
    },
}

/// A file that did not make it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub logical_path: String,
    pub error: String,
}

/// Outcome of a batch.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub batch_id: String,
    /// Logical paths of the completed files.
    pub succeeded: Vec<String>,
    pub failed: Vec<FileFailure>,
    /// Bytes of the completed files.
    pub total_bytes: u64,
    /// Coordinator summary, when finalize succeeded.
    pub summary: Option<FinalizeResponse>,
    pub finalize_error: Option<String>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.finalize_error.is_none()
    }
}

/// Concurrency and retry settings of a run.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub max_parallel_files: usize,
    pub max_parallel_parts: usize,
    pub retry: RetryPolicy,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            max_parallel_files: 4,
            max_parallel_parts: 4,
            retry: RetryPolicy::default(),
        }
    }
}

/// Batch-level attributes sent with `init`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    pub uploader: String,
    pub logical_root: String,
    pub metadata: BTreeMap<String, String>,
}
