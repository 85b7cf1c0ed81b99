use serde::{Deserialize, Serialize};

/// Downstream processing flags attached to every uploaded file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessingPolicy {
    pub extract_text: bool,
    pub summarize: bool,
    pub extract_metadata: bool,
}

/// A directory-scoped override: any subset of the policy fields.
///
/// Unknown fields are ignored so that newer override files do not break
/// older clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract_text: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summarize: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract_metadata: Option<bool>,
}

impl ProcessingPolicy {
    /// Merges `over` on top of `self`, field by field.
    ///
    /// Fields absent from the override keep the parent's value.
    pub fn resolve(&self, over: &PolicyOverride) -> ProcessingPolicy {
        ProcessingPolicy {
            extract_text: over.extract_text.unwrap_or(self.extract_text),
            summarize: over.summarize.unwrap_or(self.summarize),
            extract_metadata: over.extract_metadata.unwrap_or(self.extract_metadata),
        }
    }
}

impl PolicyOverride {
    /// Returns `true` if the override sets no field at all.
    pub fn is_empty(&self) -> bool {
        self.extract_text.is_none() && self.summarize.is_none() && self.extract_metadata.is_none()
    }
}

/// One uploaded multipart chunk, as reported to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartRecord {
    /// 1-indexed part number.
    pub part_number: u32,
    /// Entity tag returned by the store, without surrounding quotes.
    pub etag: String,
}

/// Transfer path chosen for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadKind {
    Simple,
    Multipart,
}

impl UploadKind {
    /// Applies the coordinator's size threshold.
    ///
    /// Sizes strictly below `threshold` go single-shot; anything at or
    /// above it is multipart.
    pub fn for_size(size: u64, threshold: u64) -> UploadKind {
        if size < threshold {
            UploadKind::Simple
        } else {
            UploadKind::Multipart
        }
    }
}

/// Number of parts a file of `size` bytes splits into.
///
/// `None` for a zero part size, or one so small the count overflows a part
/// number.
pub fn part_count(size: u64, part_size: u64) -> Option<u32> {
    if part_size == 0 {
        return None;
    }
    u32::try_from(size.div_ceil(part_size)).ok()
}
