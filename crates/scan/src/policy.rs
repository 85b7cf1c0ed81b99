//! Directory-scoped policy override files.

use std::path::Path;

use stowage_protocol::PolicyOverride;
use stowage_protocol::constants::POLICY_OVERRIDE_FILE;
use tracing::{debug, warn};

/// Loads the override file of `dir`, if there is a usable one.
///
/// A missing file is silent. An unreadable or malformed file is logged and
/// treated as if it were absent.
pub fn load_policy_override(dir: &Path) -> Option<PolicyOverride> {
    let path = dir.join(POLICY_OVERRIDE_FILE);
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read policy override, ignoring");
            return None;
        }
    };

    match serde_json::from_str::<PolicyOverride>(&content) {
        Ok(over) => {
            debug!(path = %path.display(), ?over, "policy override loaded");
            Some(over)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "malformed policy override, ignoring");
            None
        }
    }
}
