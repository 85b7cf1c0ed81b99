use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{PartRecord, ProcessingPolicy, UploadKind};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Opens a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    pub uploader: String,
    pub logical_root: String,
    pub file_count: u64,
    pub total_bytes: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// Requests a transfer descriptor for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartFileRequest {
    pub file_name: String,
    pub size: u64,
    pub logical_path: String,
    pub content_type: String,
    pub content_address: String,
    pub policy: ProcessingPolicy,
}

/// Reports a finished transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteFileRequest {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multipart: Option<MultipartCompletion>,
}

/// Multipart manifest sent with `complete-file`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartCompletion {
    pub upload_id: String,
    /// Sorted ascending by part number.
    pub parts: Vec<PartRecord>,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Acknowledges batch initialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResponse {
    pub batch_id: String,
    pub session_id: String,
    /// Size in bytes at or above which files are uploaded in parts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multipart_threshold: Option<u64>,
}

/// One presigned target of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartTarget {
    pub part_number: u32,
    pub url: String,
}

/// How the client must transfer a file, as decided by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "uploadType", rename_all = "lowercase")]
pub enum UploadDescriptor {
    #[serde(rename_all = "camelCase")]
    Simple { key: String, presigned_url: String },
    #[serde(rename_all = "camelCase")]
    Multipart {
        key: String,
        upload_id: String,
        part_size: u64,
        presigned_urls: Vec<PartTarget>,
        /// Parts already stored by a previous attempt.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        completed_parts: Vec<PartRecord>,
    },
}

impl UploadDescriptor {
    /// Object key to report on completion.
    pub fn key(&self) -> &str {
        match self {
            UploadDescriptor::Simple { key, .. } | UploadDescriptor::Multipart { key, .. } => key,
        }
    }

    /// Transfer path this descriptor selects.
    pub fn kind(&self) -> UploadKind {
        match self {
            UploadDescriptor::Simple { .. } => UploadKind::Simple,
            UploadDescriptor::Multipart { .. } => UploadKind::Multipart,
        }
    }
}

/// Acknowledges `complete-file`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteFileResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Batch summary returned by `finalize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    pub files_uploaded: u64,
    pub total_bytes: u64,
    pub storage_prefix: String,
}

/// Error body returned by the coordinator on non-2xx responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl std::fmt::Display for ApiErrorBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {msg}", self.error),
            None => f.write_str(&self.error),
        }
    }
}
