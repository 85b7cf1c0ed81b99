//! Uploader configuration.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/stowage/uploader.toml`
//! - Windows: `%APPDATA%/stowage/uploader.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use stowage_preprocess::{InheritMode, PipelineConfig};
use stowage_protocol::ProcessingPolicy;
use stowage_scan::ScanOptions;
use stowage_transfer::RetryPolicy;
use stowage_uploader::UploadOptions;
use tokio_util::sync::CancellationToken;

/// Uploader configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderConfig {
    /// Base URL of the coordinator API.
    pub coordinator_url: String,
    /// Bearer token; empty means unauthenticated.
    pub api_token: String,
    /// Name reported to the coordinator (hostname by default).
    pub uploader: String,
    /// Archive-side prefix of the uploaded tree.
    pub logical_root: String,
    pub max_parallel_files: usize,
    pub max_parallel_parts: usize,
    pub request_timeout_secs: u64,
    /// Size at which dry runs predict a multipart upload. Real runs follow
    /// the coordinator.
    pub multipart_threshold: u64,
    pub retry: RetrySection,
    pub scan: ScanSection,
    pub policy: PolicySection,
    pub preprocess: PreprocessSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSection {
    /// Accepted extensions; empty accepts everything.
    pub extensions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_total_size: Option<u64>,
    pub follow_symlinks: bool,
}

/// Root processing policy, before any directory override.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySection {
    pub extract_text: bool,
    pub summarize: bool,
    pub extract_metadata: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessSection {
    pub tiff_mode: InheritMode,
    pub jpeg_quality: u8,
}

fn default_uploader() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "stowage-uploader".into())
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            coordinator_url: String::new(),
            api_token: String::new(),
            uploader: default_uploader(),
            logical_root: "/".into(),
            max_parallel_files: 4,
            max_parallel_parts: 4,
            request_timeout_secs: 60,
            multipart_threshold: 100 * 1024 * 1024,
            retry: RetrySection::default(),
            scan: ScanSection::default(),
            policy: PolicySection::default(),
            preprocess: PreprocessSection::default(),
        }
    }
}

impl Default for RetrySection {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
        }
    }
}

impl Default for PreprocessSection {
    fn default() -> Self {
        let defaults = PipelineConfig::default();
        Self {
            tiff_mode: defaults.tiff_mode,
            jpeg_quality: defaults.jpeg_quality,
        }
    }
}

impl UploaderConfig {
    /// Loads configuration from `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: UploaderConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Rejects settings no run could use. The coordinator URL is only
    /// required when uploading.
    pub fn validate(&self, needs_coordinator: bool) -> anyhow::Result<()> {
        if needs_coordinator {
            if self.coordinator_url.is_empty() {
                bail!("coordinator_url is not configured");
            }
            if !self.coordinator_url.starts_with("http://")
                && !self.coordinator_url.starts_with("https://")
            {
                bail!("coordinator_url must be an http(s) URL: {}", self.coordinator_url);
            }
        }
        if self.max_parallel_files == 0 || self.max_parallel_parts == 0 {
            bail!("max_parallel_files and max_parallel_parts must be at least 1");
        }
        if !(1..=100).contains(&self.preprocess.jpeg_quality) {
            bail!("jpeg_quality must be between 1 and 100");
        }
        if self.uploader.is_empty() {
            bail!("uploader name is empty");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            logical_root: self.logical_root.clone(),
            allowed_extensions: self.scan.extensions.clone(),
            max_file_size: self.scan.max_file_size,
            max_total_size: self.scan.max_total_size,
            follow_symlinks: self.scan.follow_symlinks,
            default_policy: ProcessingPolicy {
                extract_text: self.policy.extract_text,
                summarize: self.policy.summarize,
                extract_metadata: self.policy.extract_metadata,
            },
        }
    }

    pub fn upload_options(&self) -> UploadOptions {
        UploadOptions {
            max_parallel_files: self.max_parallel_files,
            max_parallel_parts: self.max_parallel_parts,
            retry: self.retry_policy(),
        }
    }

    pub fn pipeline_config(&self, dry_run: bool, cancel: CancellationToken) -> PipelineConfig {
        PipelineConfig {
            dry_run,
            tiff_mode: self.preprocess.tiff_mode,
            jpeg_quality: self.preprocess.jpeg_quality,
            cancel,
        }
    }
}

/// Returns the platform-specific configuration file path.
pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("stowage").join("uploader.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("stowage")
            .join("uploader.toml")
    }
}
