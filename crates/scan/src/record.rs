//! The unit of work produced by the scanner.

use std::path::{Path, PathBuf};

use stowage_protocol::{ProcessingPolicy, StartFileRequest};
use stowage_transfer::{TransferError, content_address_file, validate_logical_path};

/// One eligible file of a batch.
///
/// Records are immutable: a transformation produces a new record through
/// [`FileRecord::derive`] rather than editing an existing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    local_path: PathBuf,
    logical_path: String,
    file_name: String,
    size: u64,
    content_type: String,
    content_address: String,
    policy: ProcessingPolicy,
}

impl FileRecord {
    /// Builds a record from already computed attributes.
    ///
    /// The file name is the last segment of `logical_path`.
    pub fn new(
        local_path: PathBuf,
        logical_path: String,
        size: u64,
        content_type: impl Into<String>,
        content_address: String,
        policy: ProcessingPolicy,
    ) -> Result<Self, TransferError> {
        validate_logical_path(&logical_path)?;
        let file_name = logical_path
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| TransferError::InvalidPath(format!("no file name in {logical_path:?}")))?
            .to_string();
        if size == 0 {
            return Err(TransferError::Validation(format!("{logical_path} is empty")));
        }
        Ok(Self {
            local_path,
            logical_path,
            file_name,
            size,
            content_type: content_type.into(),
            content_address,
            policy,
        })
    }

    /// Builds a record for a file derived from this one.
    ///
    /// Size and content address are recomputed from the bytes at
    /// `local_path`; the processing policy is inherited.
    pub fn derive(
        &self,
        local_path: PathBuf,
        logical_path: String,
        content_type: impl Into<String>,
    ) -> Result<Self, TransferError> {
        let size = std::fs::metadata(&local_path)?.len();
        let content_address = content_address_file(&local_path)?;
        Self::new(
            local_path,
            logical_path,
            size,
            content_type,
            content_address,
            self.policy,
        )
    }

    /// Builds the coordinator request announcing this file.
    pub fn start_request(&self) -> StartFileRequest {
        StartFileRequest {
            file_name: self.file_name.clone(),
            size: self.size,
            logical_path: self.logical_path.clone(),
            content_type: self.content_type.clone(),
            content_address: self.content_address.clone(),
            policy: self.policy,
        }
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn logical_path(&self) -> &str {
        &self.logical_path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn content_address(&self) -> &str {
        &self.content_address
    }

    pub fn policy(&self) -> ProcessingPolicy {
        self.policy
    }

    /// Lower-cased extension of the file name, if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowage_transfer::content_address_bytes;

    fn policy() -> ProcessingPolicy {
        ProcessingPolicy {
            extract_text: true,
            ..Default::default()
        }
    }

    #[test]
    fn file_name_from_logical_path() {
        let rec = FileRecord::new(
            "/tmp/x".into(),
            "/box/letter.PDF".into(),
            3,
            "application/pdf",
            "sha256:00".into(),
            policy(),
        )
        .unwrap();
        assert_eq!(rec.file_name(), "letter.PDF");
        assert_eq!(rec.extension().as_deref(), Some("pdf"));
    }

    #[test]
    fn rejects_zero_size_and_bad_paths() {
        assert!(FileRecord::new("/x".into(), "/a.pdf".into(), 0, "t", "s".into(), policy()).is_err());
        assert!(FileRecord::new("/x".into(), "a.pdf".into(), 1, "t", "s".into(), policy()).is_err());
        assert!(FileRecord::new("/x".into(), "/".into(), 1, "t", "s".into(), policy()).is_err());
    }

    #[test]
    fn derive_recomputes_address_and_inherits_policy() {
        let dir = tempfile::tempdir().unwrap();
        let derived_path = dir.path().join("scan.jpg");
        std::fs::write(&derived_path, b"jpeg bytes").unwrap();

        let source = FileRecord::new(
            dir.path().join("scan.tif"),
            "/box/scan.tif".into(),
            100,
            "image/tiff",
            "sha256:source".into(),
            policy(),
        )
        .unwrap();
        let derived = source
            .derive(derived_path, "/box/scan.jpg".into(), "image/jpeg")
            .unwrap();

        assert_eq!(derived.size(), 10);
        assert_eq!(derived.content_address(), content_address_bytes(b"jpeg bytes"));
        assert_eq!(derived.policy(), source.policy());
        assert_eq!(derived.file_name(), "scan.jpg");
        // The source record is untouched.
        assert_eq!(source.content_address(), "sha256:source");
    }

    #[test]
    fn start_request_mirrors_record() {
        let rec = FileRecord::new(
            "/tmp/x".into(),
            "/a/b.txt".into(),
            42,
            "text/plain",
            "sha256:ab".into(),
            policy(),
        )
        .unwrap();
        let req = rec.start_request();
        assert_eq!(req.file_name, "b.txt");
        assert_eq!(req.size, 42);
        assert_eq!(req.logical_path, "/a/b.txt");
        assert_eq!(req.content_address, "sha256:ab");
        assert!(req.policy.extract_text);
    }
}
