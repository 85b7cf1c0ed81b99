//! Stowage uploader.
//!
//! Scans a directory, converts what needs converting, and uploads the
//! result as one batch. Exit status: 0 when every file made it, 1 when
//! the batch ran with failures, 2 when it could not start.

mod config;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use stowage_preprocess::{Pipeline, PreprocessError};
use stowage_protocol::UploadKind;
use stowage_scan::{FileRecord, scan};
use stowage_transfer::{DEFAULT_PART_SIZE, HttpObjectStore, ThroughputMeter};
use stowage_uploader::{
    BatchRequest, HttpCoordinator, Orchestrator, UploadError, UploadEvent, plan,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{UploaderConfig, default_config_path};

/// Interval between throughput log lines.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "stowage", version, about = "Upload an archive directory to Stowage")]
struct Cli {
    /// Directory to upload.
    root: PathBuf,

    /// Configuration file.
    #[arg(short, long, env = "STOWAGE_CONFIG")]
    config: Option<PathBuf>,

    /// Archive-side prefix, overriding the configured one.
    #[arg(long)]
    logical_root: Option<String>,

    /// Scan and plan without converting or uploading anything.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = UploaderConfig::load(&config_path)?;
    if let Some(root) = &cli.logical_root {
        config.logical_root = root.clone();
    }
    config.validate(!cli.dry_run)?;

    // Installed before any work so an interrupt during conversion still
    // reaches the pipeline cleanup.
    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping after in-flight requests");
                cancel.cancel();
            }
        }
    });
    let outcome = upload(&cli, &config, cancel).await;
    interrupt.abort();
    outcome
}

async fn upload(
    cli: &Cli,
    config: &UploaderConfig,
    cancel: CancellationToken,
) -> anyhow::Result<ExitCode> {
    // Scan.
    let scan_options = config.scan_options();
    let root = cli.root.clone();
    let scanned = tokio::task::spawn_blocking(move || scan(&root, &scan_options))
        .await
        .context("scan task panicked")??;
    if !scanned.skipped.is_empty() {
        info!(skipped = scanned.skipped.len(), "some entries were skipped");
    }
    if scanned.files.is_empty() {
        info!(root = %cli.root.display(), "nothing to upload");
        return Ok(ExitCode::SUCCESS);
    }
    if cancel.is_cancelled() {
        return Ok(ExitCode::from(1));
    }

    // Preprocess. A failed or cancelled run has already cleaned up.
    let pipeline_config = config.pipeline_config(cli.dry_run, cancel.clone());
    let files = scanned.files;
    let (mut pipeline, processed) = tokio::task::spawn_blocking(move || {
        let mut pipeline = Pipeline::standard();
        let output = pipeline.run(files, &pipeline_config);
        (pipeline, output)
    })
    .await
    .context("preprocessing task panicked")?;
    let files = match processed {
        Ok(output) => output.files,
        Err(e @ PreprocessError::Cancelled { .. }) => {
            warn!(error = %e, "preprocessing interrupted");
            return Ok(ExitCode::from(1));
        }
        Err(e) => return Err(e.into()),
    };

    if cli.dry_run {
        print_plan(&files, config.multipart_threshold);
        pipeline.cleanup();
        return Ok(ExitCode::SUCCESS);
    }

    let result = send_batch(cli, config, files, cancel).await;
    pipeline.cleanup();
    result
}

async fn send_batch(
    cli: &Cli,
    config: &UploaderConfig,
    files: Vec<FileRecord>,
    cancel: CancellationToken,
) -> anyhow::Result<ExitCode> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
        .context("building HTTP client")?;
    let coordinator = HttpCoordinator::new(
        client.clone(),
        config.coordinator_url.clone(),
        Some(config.api_token.clone()),
    );
    let store = HttpObjectStore::new(client);

    let mut metadata = BTreeMap::new();
    metadata.insert("startedAt".to_string(), chrono::Utc::now().to_rfc3339());
    metadata.insert("source".to_string(), cli.root.display().to_string());
    let request = BatchRequest {
        uploader: config.uploader.clone(),
        logical_root: config.logical_root.clone(),
        metadata,
    };

    let total_bytes: u64 = files.iter().map(|f| f.size()).sum();
    let mut orchestrator =
        Orchestrator::new(&coordinator, &store, config.upload_options()).with_cancel(cancel);
    let logger = orchestrator
        .take_events()
        .map(|events| tokio::spawn(log_events(events, total_bytes)));

    let result = orchestrator.run(files, &request).await;
    drop(orchestrator);
    if let Some(logger) = logger {
        let _ = logger.await;
    }

    let report = match result {
        Ok(report) => report,
        Err(e @ UploadError::Validation(_)) => return Err(e.into()),
        Err(e) => {
            error!(error = %e, "batch could not start");
            return Ok(ExitCode::from(1));
        }
    };

    for failure in &report.failed {
        error!(path = %failure.logical_path, error = %failure.error, "upload failed");
    }
    if let Some(e) = &report.finalize_error {
        error!(batch_id = %report.batch_id, error = %e, "batch not finalized");
    }
    info!(
        batch_id = %report.batch_id,
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        bytes = report.total_bytes,
        prefix = report.summary.as_ref().map(|s| s.storage_prefix.as_str()).unwrap_or("-"),
        "batch done"
    );

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn print_plan(files: &[FileRecord], threshold: u64) {
    let planned = plan(files, threshold, DEFAULT_PART_SIZE);
    for p in &planned {
        info!(path = %p.logical_path, size = p.size, kind = ?p.kind, parts = p.parts, "planned");
    }
    let multipart = planned
        .iter()
        .filter(|p| p.kind == UploadKind::Multipart)
        .count();
    info!(
        files = planned.len(),
        multipart,
        bytes = planned.iter().map(|p| p.size).sum::<u64>(),
        "dry run, nothing uploaded"
    );
}

async fn log_events(mut events: mpsc::UnboundedReceiver<UploadEvent>, total_bytes: u64) {
    let meter = ThroughputMeter::new(None);
    let mut last_report = Instant::now();

    while let Some(event) = events.recv().await {
        match event {
            UploadEvent::BatchInitialized {
                batch_id,
                file_count,
                ..
            } => {
                info!(%batch_id, files = file_count, bytes = total_bytes, "uploading");
            }
            UploadEvent::FileStarted {
                logical_path, kind, ..
            } => {
                debug!(path = %logical_path, kind = ?kind, "file started");
            }
            UploadEvent::BytesTransferred {
                logical_path,
                bytes,
            } => {
                meter.record(bytes);
                debug!(path = %logical_path, bytes, "progress");
                if last_report.elapsed() >= PROGRESS_INTERVAL {
                    let done = meter.total();
                    info!(
                        done,
                        total = total_bytes,
                        rate_bps = meter.bytes_per_second() as u64,
                        eta_secs = meter.eta(total_bytes.saturating_sub(done)).map(|d| d.as_secs()),
                        "throughput"
                    );
                    last_report = Instant::now();
                }
            }
            UploadEvent::FileCompleted { logical_path, .. } => {
                debug!(path = %logical_path, "file completed");
            }
            UploadEvent::FileFailed { logical_path, .. } => {
                debug!(path = %logical_path, "file failed");
            }
            UploadEvent::BatchFinalized { files_uploaded, .. } => {
                debug!(files = files_uploaded, "batch finalized");
            }
        }
    }
}
