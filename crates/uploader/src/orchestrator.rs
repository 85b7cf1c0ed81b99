//! Batch orchestrator.
//!
//! Opens the batch, drains the file queue with a bounded pool of workers,
//! then finalizes. Files fail independently; a failed file never stops the
//! others.

use std::collections::{HashSet, VecDeque};

use bytes::Bytes;
use futures_util::future::join_all;
use stowage_protocol::{
    CompleteFileRequest, InitRequest, MultipartCompletion, UploadDescriptor, UploadKind, part_count,
};
use stowage_scan::FileRecord;
use stowage_transfer::{ChunkedUploader, ObjectStore, PartUpload, TransferError};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::coordinator::Coordinator;
use crate::error::UploadError;
use crate::types::{
    BatchReport, BatchRequest, BatchSession, FileFailure, TaskState, UploadEvent, UploadOptions,
};

const CANCELLED: &str = "cancelled";

/// Runs one batch against a coordinator and an object store.
pub struct Orchestrator<'a> {
    coordinator: &'a dyn Coordinator,
    store: &'a dyn ObjectStore,
    options: UploadOptions,
    events_tx: mpsc::UnboundedSender<UploadEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<UploadEvent>>,
    cancel: CancellationToken,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        coordinator: &'a dyn Coordinator,
        store: &'a dyn ObjectStore,
        options: UploadOptions,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            coordinator,
            store,
            options,
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<UploadEvent>> {
        self.events_rx.take()
    }

    /// Uses `cancel` instead of a private token, so a caller can share one
    /// token between preprocessing and upload.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns the cancellation token of this run.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Uploads `records` as one batch.
    ///
    /// Returns an error only when the batch cannot start: invalid input,
    /// `init` failing, or cancellation before `init`. Everything after
    /// that is reported per file in the [`BatchReport`].
    pub async fn run(
        &self,
        records: Vec<FileRecord>,
        request: &BatchRequest,
    ) -> Result<BatchReport, UploadError> {
        validate(&records, request, &self.options)?;
        if self.cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let total_bytes: u64 = records.iter().map(FileRecord::size).sum();
        let init_request = InitRequest {
            uploader: request.uploader.clone(),
            logical_root: request.logical_root.clone(),
            file_count: records.len() as u64,
            total_bytes,
            metadata: request.metadata.clone(),
        };
        let init = self
            .options
            .retry
            .run_cancellable("init", &self.cancel, || self.coordinator.init(&init_request))
            .await?;
        info!(
            batch_id = %init.batch_id,
            files = records.len(),
            bytes = total_bytes,
            threshold = ?init.multipart_threshold,
            "batch initialized"
        );
        self.emit(UploadEvent::BatchInitialized {
            batch_id: init.batch_id.clone(),
            file_count: records.len(),
            total_bytes,
        });

        let session = BatchSession::new(init, records);
        let queue = Mutex::new((0..session.len()).collect::<VecDeque<_>>());
        let workers = self.options.max_parallel_files.min(session.len());
        join_all((0..workers).map(|_| self.file_worker(&session, &queue))).await;

        let (summary, finalize_error) = if self.cancel.is_cancelled() {
            warn!(batch_id = %session.batch_id, "batch cancelled, not finalizing");
            (None, Some(CANCELLED.to_string()))
        } else {
            match self
                .options
                .retry
                .run("finalize", || {
                    self.coordinator
                        .finalize(&session.batch_id, &session.session_id)
                })
                .await
            {
                Ok(summary) => {
                    info!(
                        batch_id = %session.batch_id,
                        files = summary.files_uploaded,
                        bytes = summary.total_bytes,
                        prefix = %summary.storage_prefix,
                        "batch finalized"
                    );
                    self.emit(UploadEvent::BatchFinalized {
                        files_uploaded: summary.files_uploaded,
                        total_bytes: summary.total_bytes,
                        storage_prefix: summary.storage_prefix.clone(),
                    });
                    (Some(summary), None)
                }
                Err(e) => {
                    error!(batch_id = %session.batch_id, error = %e, "finalize failed");
                    (None, Some(e.to_string()))
                }
            }
        };

        let mut report = BatchReport {
            batch_id: session.batch_id.clone(),
            summary,
            finalize_error,
            ..Default::default()
        };
        for mut task in session.into_tasks() {
            // Workers leave every task terminal; anything else was never reached.
            task.fail(CANCELLED);
            let logical_path = task.record().logical_path().to_string();
            match task.state() {
                TaskState::Completed => {
                    report.total_bytes += task.record().size();
                    report.succeeded.push(logical_path);
                }
                TaskState::Failed(cause) => report.failed.push(FileFailure {
                    logical_path,
                    error: cause.clone(),
                }),
                TaskState::Pending | TaskState::InFlight => {}
            }
        }
        Ok(report)
    }

    async fn file_worker(&self, session: &BatchSession, queue: &Mutex<VecDeque<usize>>) {
        loop {
            let Some(index) = queue.lock().await.pop_front() else {
                return;
            };
            let Some(record) = session.with_task(index, |task| {
                task.begin();
                task.record().clone()
            }) else {
                continue;
            };

            let outcome = if self.cancel.is_cancelled() {
                Err(UploadError::Cancelled)
            } else {
                self.upload_file(session, &record).await
            };

            let logical_path = record.logical_path().to_string();
            match outcome {
                Ok(()) => {
                    session.with_task(index, |task| task.complete());
                    info!(path = %logical_path, size = record.size(), "file uploaded");
                    self.emit(UploadEvent::FileCompleted {
                        logical_path,
                        size: record.size(),
                    });
                }
                Err(e) => {
                    let cause = e.to_string();
                    session.with_task(index, |task| task.fail(cause.clone()));
                    error!(path = %logical_path, error = %cause, "file failed");
                    self.emit(UploadEvent::FileFailed {
                        logical_path,
                        error: cause,
                    });
                }
            }
        }
    }

    async fn upload_file(
        &self,
        session: &BatchSession,
        record: &FileRecord,
    ) -> Result<(), UploadError> {
        let retry = &self.options.retry;
        let start = record.start_request();
        let descriptor = retry
            .run_cancellable("start-file", &self.cancel, || {
                self.coordinator
                    .start_file(&session.batch_id, &session.session_id, &start)
            })
            .await?;

        if let Some(threshold) = session.multipart_threshold {
            let expected = UploadKind::for_size(record.size(), threshold);
            if expected != descriptor.kind() {
                warn!(
                    path = %record.logical_path(),
                    size = record.size(),
                    threshold,
                    expected = ?expected,
                    actual = ?descriptor.kind(),
                    "coordinator chose a different upload kind"
                );
            }
        }
        debug!(path = %record.logical_path(), kind = ?descriptor.kind(), "transfer starting");
        self.emit(UploadEvent::FileStarted {
            logical_path: record.logical_path().to_string(),
            size: record.size(),
            kind: descriptor.kind(),
        });

        let multipart = match &descriptor {
            UploadDescriptor::Simple { presigned_url, .. } => {
                self.put_simple(record, presigned_url).await?;
                None
            }
            UploadDescriptor::Multipart {
                upload_id,
                part_size,
                presigned_urls,
                completed_parts,
                ..
            } => {
                let uploader = ChunkedUploader::new(
                    self.store,
                    retry.clone(),
                    self.options.max_parallel_parts,
                );
                let on_progress = |bytes: u64| {
                    self.emit(UploadEvent::BytesTransferred {
                        logical_path: record.logical_path().to_string(),
                        bytes,
                    });
                };
                let parts = uploader
                    .upload(
                        PartUpload {
                            path: record.local_path(),
                            part_size: *part_size,
                            targets: presigned_urls.clone(),
                            completed: completed_parts.clone(),
                        },
                        &on_progress,
                        &self.cancel,
                    )
                    .await?;
                Some(MultipartCompletion {
                    upload_id: upload_id.clone(),
                    parts,
                })
            }
        };

        if self.cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let complete = CompleteFileRequest {
            key: descriptor.key().to_string(),
            multipart,
        };
        let response = retry
            .run_cancellable("complete-file", &self.cancel, || {
                self.coordinator
                    .complete_file(&session.batch_id, &session.session_id, &complete)
            })
            .await?;
        if !response.success {
            return Err(UploadError::Rejected(
                response.message.unwrap_or_else(|| "no reason given".into()),
            ));
        }
        Ok(())
    }

    async fn put_simple(&self, record: &FileRecord, url: &str) -> Result<(), UploadError> {
        let data = tokio::fs::read(record.local_path())
            .await
            .map_err(TransferError::from)?;
        if data.len() as u64 != record.size() {
            return Err(TransferError::Validation(format!(
                "{} changed size since scan ({} -> {} bytes)",
                record.local_path().display(),
                record.size(),
                data.len()
            ))
            .into());
        }

        let body = Bytes::from(data);
        self.options
            .retry
            .run_cancellable("put-object", &self.cancel, || {
                self.store
                    .put(url, body.clone(), Some(record.content_type()))
            })
            .await?;
        self.emit(UploadEvent::BytesTransferred {
            logical_path: record.logical_path().to_string(),
            bytes: record.size(),
        });
        Ok(())
    }

    fn emit(&self, event: UploadEvent) {
        // No receiver means nobody is listening; progress is best-effort.
        let _ = self.events_tx.send(event);
    }
}

/// Checks the batch before any network call.
fn validate(
    records: &[FileRecord],
    request: &BatchRequest,
    options: &UploadOptions,
) -> Result<(), UploadError> {
    if request.logical_root.is_empty() {
        return Err(UploadError::Validation("logical root is empty".into()));
    }
    if options.max_parallel_files == 0 || options.max_parallel_parts == 0 {
        return Err(UploadError::Validation(
            "parallelism must be at least 1".into(),
        ));
    }
    if records.is_empty() {
        return Err(UploadError::Validation("batch has no files".into()));
    }

    let mut seen = HashSet::with_capacity(records.len());
    for r in records {
        if r.size() == 0 {
            return Err(UploadError::Validation(format!(
                "{} is empty",
                r.logical_path()
            )));
        }
        if !seen.insert(r.logical_path()) {
            return Err(UploadError::Validation(format!(
                "duplicate logical path {}",
                r.logical_path()
            )));
        }
    }
    Ok(())
}

/// How a file would be transferred, for dry runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFile {
    pub logical_path: String,
    pub size: u64,
    pub kind: UploadKind,
    pub parts: u32,
}

/// Predicts the transfer of every record without any network call.
pub fn plan(records: &[FileRecord], threshold: u64, part_size: u64) -> Vec<PlannedFile> {
    records
        .iter()
        .map(|r| {
            let kind = UploadKind::for_size(r.size(), threshold);
            let parts = match kind {
                UploadKind::Simple => 1,
                UploadKind::Multipart => part_count(r.size(), part_size).unwrap_or(u32::MAX),
            };
            PlannedFile {
                logical_path: r.logical_path().to_string(),
                size: r.size(),
                kind,
                parts,
            }
        })
        .collect()
}
