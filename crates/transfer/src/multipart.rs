//! Chunked multipart transfer.
//!
//! A file is split into fixed-size parts that are PUT to their presigned
//! targets by a bounded pool of part workers sharing one [`PartReader`].

use std::collections::{BTreeSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use futures_util::future::join_all;
use stowage_protocol::{PartRecord, PartTarget};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::chunked::PartReader;
use crate::retry::RetryPolicy;
use crate::store::{ObjectStore, strip_etag_quotes};
use crate::TransferError;

/// One multipart transfer request.
#[derive(Debug, Clone)]
pub struct PartUpload<'a> {
    pub path: &'a Path,
    pub part_size: u64,
    /// Presigned targets for the parts still to upload.
    pub targets: Vec<PartTarget>,
    /// Parts already stored by a previous attempt.
    pub completed: Vec<PartRecord>,
}

/// Uploads the parts of one file with bounded concurrency.
pub struct ChunkedUploader<'s> {
    store: &'s dyn ObjectStore,
    retry: RetryPolicy,
    max_parallel_parts: usize,
}

impl<'s> ChunkedUploader<'s> {
    /// Creates an uploader running at most `max_parallel_parts` PUTs at once.
    pub fn new(store: &'s dyn ObjectStore, retry: RetryPolicy, max_parallel_parts: usize) -> Self {
        Self {
            store,
            retry,
            max_parallel_parts: max_parallel_parts.max(1),
        }
    }

    /// Uploads every pending part and returns the full manifest, sorted by
    /// part number.
    ///
    /// `on_progress` is called with the byte count of each stored part.
    /// If any part exhausts its retries, the remaining workers stop picking
    /// up new parts and the first error is returned.
    pub async fn upload(
        &self,
        request: PartUpload<'_>,
        on_progress: &(dyn Fn(u64) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<Vec<PartRecord>, TransferError> {
        let reader = tokio::task::spawn_blocking({
            let path = request.path.to_path_buf();
            let part_size = request.part_size;
            move || PartReader::open(&path, part_size)
        })
        .await
        .map_err(|e| TransferError::Io(std::io::Error::other(e)))??;
        let reader = Arc::new(reader);

        validate_manifest(reader.part_count(), &request.targets, &request.completed)?;

        let pending = request.targets.len();
        let workers = self.max_parallel_parts.min(pending);
        debug!(
            path = %request.path.display(),
            parts = reader.part_count(),
            pending,
            resumed = request.completed.len(),
            workers,
            "starting multipart transfer"
        );

        let queue = Mutex::new(VecDeque::from(request.targets));
        let uploaded = Mutex::new(Vec::with_capacity(pending));
        let abort = AtomicBool::new(false);

        let outcomes = join_all((0..workers).map(|_| {
            self.part_worker(&reader, &queue, &uploaded, &abort, on_progress, cancel)
        }))
        .await;

        // Dropping the last reference closes the file on every path.
        drop(reader);

        if let Some(err) = outcomes.into_iter().find_map(Result::err) {
            return Err(err);
        }

        let mut parts = uploaded.into_inner();
        parts.extend(request.completed);
        parts.sort_by_key(|p| p.part_number);
        Ok(parts)
    }

    async fn part_worker(
        &self,
        reader: &Arc<PartReader>,
        queue: &Mutex<VecDeque<PartTarget>>,
        uploaded: &Mutex<Vec<PartRecord>>,
        abort: &AtomicBool,
        on_progress: &(dyn Fn(u64) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        loop {
            if abort.load(Ordering::Acquire) {
                return Ok(());
            }
            if cancel.is_cancelled() {
                abort.store(true, Ordering::Release);
                return Err(TransferError::Cancelled);
            }
            let Some(target) = queue.lock().await.pop_front() else {
                return Ok(());
            };

            match self.upload_part(reader, &target, cancel).await {
                Ok(record) => {
                    on_progress(reader.part_range(record.part_number)?.1 as u64);
                    uploaded.lock().await.push(record);
                }
                Err(e) => {
                    warn!(
                        path = %reader.path().display(),
                        part = target.part_number,
                        error = %e,
                        "part upload failed"
                    );
                    abort.store(true, Ordering::Release);
                    return Err(e);
                }
            }
        }
    }

    async fn upload_part(
        &self,
        reader: &Arc<PartReader>,
        target: &PartTarget,
        cancel: &CancellationToken,
    ) -> Result<PartRecord, TransferError> {
        let data = tokio::task::spawn_blocking({
            let reader = Arc::clone(reader);
            let part_number = target.part_number;
            move || reader.read_part(part_number)
        })
        .await
        .map_err(|e| TransferError::Io(std::io::Error::other(e)))??;
        let data = Bytes::from(data);

        let etag = self
            .retry
            .run_cancellable("upload part", cancel, || {
                self.store.put(&target.url, data.clone(), None)
            })
            .await?
            .map(|raw| strip_etag_quotes(&raw))
            .filter(|tag| !tag.is_empty())
            .ok_or(TransferError::MissingEtag(target.part_number))?;

        Ok(PartRecord {
            part_number: target.part_number,
            etag,
        })
    }
}

/// Checks that pending targets plus resumed parts cover exactly
/// `1..=part_count` with no duplicates.
fn validate_manifest(
    part_count: u32,
    targets: &[PartTarget],
    completed: &[PartRecord],
) -> Result<(), TransferError> {
    let mut seen = BTreeSet::new();
    let numbers = targets
        .iter()
        .map(|t| t.part_number)
        .chain(completed.iter().map(|p| p.part_number));
    for n in numbers {
        if n == 0 || n > part_count {
            return Err(TransferError::Validation(format!(
                "part {n} outside 1..={part_count}"
            )));
        }
        if !seen.insert(n) {
            return Err(TransferError::Validation(format!("part {n} listed twice")));
        }
    }
    if seen.len() != part_count as usize {
        return Err(TransferError::Validation(format!(
            "descriptor covers {} of {part_count} parts",
            seen.len()
        )));
    }
    Ok(())
}
