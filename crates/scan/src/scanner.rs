//! Tree walk producing the batch's [`FileRecord`]s.
//!
//! The walk is depth-first. Each directory may carry a policy override file
//! that is merged on top of the policy inherited from its parent; the result
//! applies to the files directly inside it and is the starting point for its
//! subdirectories.

use std::collections::HashSet;
use std::fs::{self, ReadDir};
use std::path::{Path, PathBuf};

use stowage_protocol::ProcessingPolicy;
use stowage_protocol::constants::POLICY_OVERRIDE_FILE;
use stowage_transfer::{content_address_file, join_logical_path, validate_logical_path};
use tracing::{debug, info, warn};

use crate::content_type::detect_content_type;
use crate::error::ScanError;
use crate::policy::load_policy_override;
use crate::record::FileRecord;

/// Scanner settings.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Archive-side prefix under which the tree is placed.
    pub logical_root: String,
    /// Accepted extensions, case-insensitive, with or without a leading
    /// dot. Empty accepts everything.
    pub allowed_extensions: Vec<String>,
    pub max_file_size: Option<u64>,
    pub max_total_size: Option<u64>,
    pub follow_symlinks: bool,
    /// Policy in effect at the root before any override is applied.
    pub default_policy: ProcessingPolicy,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            logical_root: "/".into(),
            allowed_extensions: Vec::new(),
            max_file_size: None,
            max_total_size: None,
            follow_symlinks: false,
            default_policy: ProcessingPolicy::default(),
        }
    }
}

/// Why an entry was left out of the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Symlink,
    Empty,
    Extension,
    TooLarge { size: u64, limit: u64 },
    InvalidPath(String),
    Unreadable(String),
    Cycle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: SkipReason,
}

/// Aggregate figures of the eligible files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanTotals {
    pub count: usize,
    pub total_bytes: u64,
    pub min_size: u64,
    pub max_size: u64,
}

impl ScanTotals {
    fn from_files(files: &[FileRecord]) -> Self {
        Self {
            count: files.len(),
            total_bytes: files.iter().map(FileRecord::size).sum(),
            min_size: files.iter().map(FileRecord::size).min().unwrap_or(0),
            max_size: files.iter().map(FileRecord::size).max().unwrap_or(0),
        }
    }
}

#[derive(Debug)]
pub struct ScanResult {
    /// Eligible files, smallest first; equal sizes ordered by logical path.
    pub files: Vec<FileRecord>,
    pub totals: ScanTotals,
    pub skipped: Vec<SkippedFile>,
}

/// Scans `root` and returns every eligible file with its resolved policy.
///
/// Only problems with the root itself abort the scan. Unreadable
/// subdirectories and files that fail a filter are logged and reported in
/// [`ScanResult::skipped`].
pub fn scan(root: &Path, opts: &ScanOptions) -> Result<ScanResult, ScanError> {
    validate_logical_path(&opts.logical_root)
        .map_err(|e| ScanError::InvalidLogicalRoot(e.to_string()))?;

    let metadata = fs::metadata(root).map_err(|source| ScanError::Inaccessible {
        path: root.to_path_buf(),
        source,
    })?;
    if !metadata.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }
    let entries = fs::read_dir(root).map_err(|source| ScanError::Inaccessible {
        path: root.to_path_buf(),
        source,
    })?;

    let mut walker = Walker {
        root,
        opts,
        extensions: opts
            .allowed_extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect(),
        files: Vec::new(),
        skipped: Vec::new(),
        ancestors: Vec::new(),
    };
    if opts.follow_symlinks {
        if let Ok(canonical) = root.canonicalize() {
            walker.ancestors.push(canonical);
        }
    }
    walker.walk_dir(root, opts.default_policy, entries);

    let Walker { mut files, skipped, .. } = walker;
    let totals = ScanTotals::from_files(&files);
    if let Some(limit) = opts.max_total_size
        && totals.total_bytes > limit
    {
        return Err(ScanError::BatchTooLarge {
            total: totals.total_bytes,
            limit,
        });
    }

    files.sort_by(|a, b| {
        a.size()
            .cmp(&b.size())
            .then_with(|| a.logical_path().cmp(b.logical_path()))
    });

    info!(
        root = %root.display(),
        files = totals.count,
        bytes = totals.total_bytes,
        skipped = skipped.len(),
        "scan complete"
    );
    Ok(ScanResult {
        files,
        totals,
        skipped,
    })
}

struct Walker<'a> {
    root: &'a Path,
    opts: &'a ScanOptions,
    extensions: HashSet<String>,
    files: Vec<FileRecord>,
    skipped: Vec<SkippedFile>,
    /// Canonical paths of the directories on the current descent, only
    /// tracked when links are followed.
    ancestors: Vec<PathBuf>,
}

impl Walker<'_> {
    fn walk_dir(&mut self, dir: &Path, inherited: ProcessingPolicy, entries: ReadDir) {
        let policy = match load_policy_override(dir) {
            Some(over) => inherited.resolve(&over),
            None => inherited,
        };

        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "cannot read directory entry");
                    self.skip(dir.to_path_buf(), SkipReason::Unreadable(e.to_string()));
                    continue;
                }
            };
            let path = entry.path();
            if entry.file_name() == POLICY_OVERRIDE_FILE {
                continue;
            }

            let file_type = match entry.file_type() {
                Ok(t) => t,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot stat entry, skipping");
                    self.skip(path, SkipReason::Unreadable(e.to_string()));
                    continue;
                }
            };

            let metadata = if file_type.is_symlink() {
                if !self.opts.follow_symlinks {
                    debug!(path = %path.display(), "skipping symlink");
                    self.skip(path, SkipReason::Symlink);
                    continue;
                }
                match fs::metadata(&path) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "broken symlink, skipping");
                        self.skip(path, SkipReason::Unreadable(e.to_string()));
                        continue;
                    }
                }
            } else {
                match entry.metadata() {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "cannot stat entry, skipping");
                        self.skip(path, SkipReason::Unreadable(e.to_string()));
                        continue;
                    }
                }
            };

            if metadata.is_dir() {
                self.descend(path, policy);
            } else if metadata.is_file() {
                self.visit_file(path, metadata.len(), policy);
            } else {
                debug!(path = %path.display(), "not a regular file, skipping");
            }
        }
    }

    fn descend(&mut self, path: PathBuf, policy: ProcessingPolicy) {
        let canonical = if self.opts.follow_symlinks {
            match path.canonicalize() {
                Ok(c) => Some(c),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot resolve directory, skipping");
                    self.skip(path, SkipReason::Unreadable(e.to_string()));
                    return;
                }
            }
        } else {
            None
        };

        if let Some(c) = &canonical
            && self.ancestors.contains(c)
        {
            warn!(path = %path.display(), target = %c.display(), "directory cycle, skipping");
            self.skip(path, SkipReason::Cycle);
            return;
        }

        let entries = match fs::read_dir(&path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable directory, skipping");
                self.skip(path, SkipReason::Unreadable(e.to_string()));
                return;
            }
        };

        let pushed = canonical.is_some();
        if let Some(c) = canonical {
            self.ancestors.push(c);
        }
        self.walk_dir(&path, policy, entries);
        if pushed {
            self.ancestors.pop();
        }
    }

    fn visit_file(&mut self, path: PathBuf, size: u64, policy: ProcessingPolicy) {
        if size == 0 {
            debug!(path = %path.display(), "empty file, skipping");
            self.skip(path, SkipReason::Empty);
            return;
        }

        if !self.extension_allowed(&path) {
            warn!(path = %path.display(), "extension not allowed, skipping");
            self.skip(path, SkipReason::Extension);
            return;
        }

        if let Some(limit) = self.opts.max_file_size
            && size > limit
        {
            warn!(path = %path.display(), size, limit, "file too large, skipping");
            self.skip(path, SkipReason::TooLarge { size, limit });
            return;
        }

        let logical_path = match path
            .strip_prefix(self.root)
            .map_err(|e| e.to_string())
            .and_then(|rel| {
                join_logical_path(&self.opts.logical_root, rel).map_err(|e| e.to_string())
            }) {
            Ok(p) => p,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "invalid logical path, skipping");
                self.skip(path, SkipReason::InvalidPath(e));
                return;
            }
        };

        let content_address = match content_address_file(&path) {
            Ok(a) => a,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot hash file, skipping");
                self.skip(path, SkipReason::Unreadable(e.to_string()));
                return;
            }
        };

        let content_type = detect_content_type(&path);
        match FileRecord::new(
            path.clone(),
            logical_path,
            size,
            content_type,
            content_address,
            policy,
        ) {
            Ok(record) => {
                debug!(
                    path = %record.logical_path(),
                    size,
                    content_type,
                    "file accepted"
                );
                self.files.push(record);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "rejected file, skipping");
                self.skip(path, SkipReason::InvalidPath(e.to_string()));
            }
        }
    }

    fn extension_allowed(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.extensions.contains(&e.to_lowercase()))
    }

    fn skip(&mut self, path: PathBuf, reason: SkipReason) {
        self.skipped.push(SkippedFile { path, reason });
    }
}
