use std::path::{Component, Path};

use crate::TransferError;

/// Validates a logical (archive-side) path.
///
/// Accepts `/` itself and absolute, `/`-separated paths. Rejects:
/// - Paths not starting with `/`
/// - Empty segments (`//`) and trailing separators
/// - `.` and `..` segments
/// - Control characters anywhere in the path
pub fn validate_logical_path(path: &str) -> Result<(), TransferError> {
    if !path.starts_with('/') {
        return Err(TransferError::InvalidPath(format!(
            "logical path must start with '/': {path:?}"
        )));
    }

    if let Some(c) = path.chars().find(|c| c.is_control()) {
        return Err(TransferError::InvalidPath(format!(
            "control character {:?} in logical path {path:?}",
            c
        )));
    }

    if path == "/" {
        return Ok(());
    }

    for segment in path[1..].split('/') {
        match segment {
            "" => {
                return Err(TransferError::InvalidPath(format!(
                    "empty segment in logical path: {path:?}"
                )));
            }
            "." | ".." => {
                return Err(TransferError::InvalidPath(format!(
                    "relative segment {segment:?} not allowed: {path:?}"
                )));
            }
            _ => {}
        }
    }

    Ok(())
}

/// Joins a logical root with a path relative to the scan root.
///
/// The relative path is normalised to `/` separators; a trailing `/` on
/// the root is tolerated. The result is validated before being returned.
pub fn join_logical_path(root: &str, relative: &Path) -> Result<String, TransferError> {
    let mut joined = root.trim_end_matches('/').to_string();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let Some(part) = part.to_str() else {
                    return Err(TransferError::InvalidPath(format!(
                        "non UTF-8 name in {}",
                        relative.display()
                    )));
                };
                joined.push('/');
                joined.push_str(part);
            }
            Component::CurDir => {}
            other => {
                return Err(TransferError::InvalidPath(format!(
                    "unexpected component {other:?} in {}",
                    relative.display()
                )));
            }
        }
    }

    if joined.is_empty() {
        joined.push('/');
    }
    validate_logical_path(&joined)?;
    Ok(joined)
}
