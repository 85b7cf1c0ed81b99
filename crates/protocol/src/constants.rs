/// API version prefix for every coordinator route.
pub const API_PREFIX: &str = "/v1";

/// Header carrying the session identifier issued by `init`.
pub const SESSION_HEADER: &str = "X-Session-Id";

/// Name of the optional per-directory policy override document.
pub const POLICY_OVERRIDE_FILE: &str = ".stowage-policy.json";

/// Route for batch initialization.
pub fn init_path() -> String {
    format!("{API_PREFIX}/batches")
}

/// Route for requesting a transfer descriptor.
pub fn start_file_path(batch_id: &str) -> String {
    format!("{API_PREFIX}/batches/{batch_id}/files")
}

/// Route for reporting a finished transfer.
pub fn complete_file_path(batch_id: &str) -> String {
    format!("{API_PREFIX}/batches/{batch_id}/files/complete")
}

/// Route for closing a batch.
pub fn finalize_path(batch_id: &str) -> String {
    format!("{API_PREFIX}/batches/{batch_id}/finalize")
}
