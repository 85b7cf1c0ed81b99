//! Batch upload flow.
//!
//! Opens a batch with the coordinator, runs a bounded pool of file workers
//! over the scanned records (each doing start, transfer and complete), and
//! finalizes the batch. Progress is reported as [`UploadEvent`]s and the
//! outcome as a [`BatchReport`].

pub mod coordinator;
pub mod error;
pub mod orchestrator;
pub mod types;

pub use coordinator::{Coordinator, CoordinatorFuture, HttpCoordinator};
pub use error::UploadError;
pub use orchestrator::{Orchestrator, PlannedFile, plan};
pub use types::{
    BatchReport, BatchRequest, BatchSession, FileFailure, TaskState, TransferTask, UploadEvent,
    UploadOptions,
};
