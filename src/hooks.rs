//! Event and background-job seams.
//!
//! Both collaborators are injected and fire-and-forget: the engine never
//! awaits a listener and never assumes a scheduler. Job bodies live in
//! [`crate::services::integrity`] as plain async functions, so a runner is
//! only needed to defer them, not to run them.

use serde_json::Value;

/// Event names emitted by the engine.
pub mod events {
    pub const OBJECT_VERSION_CREATED: &str = "object_version_created";
    pub const DELETE_MARKER_CREATED: &str = "delete_marker_created";
    pub const OBJECT_VERSION_DELETED: &str = "object_version_deleted";
    pub const MULTIPART_COMPLETED: &str = "multipart_completed";
    pub const MULTIPART_ABORTED: &str = "multipart_aborted";
    pub const FILE_DOWNLOADED: &str = "file_downloaded";
    pub const FILE_MIGRATED: &str = "file_migrated";
    pub const CHECKSUM_MISMATCH: &str = "checksum_mismatch";
}

/// Fire-and-forget event dispatch, consumed by zero or more listeners.
pub trait EventHook: Send + Sync {
    fn emit(&self, event: &str, payload: Value);
}

/// Hook that drops every event; the default when none is injected.
pub struct NullHook;

impl EventHook for NullHook {
    fn emit(&self, _event: &str, _payload: Value) {}
}

/// External runner for deferrable jobs (integrity sweeps, migrations).
///
/// The runner may retry; submitted jobs are idempotent or detect duplicate
/// completion on their own.
pub trait TaskRunner: Send + Sync {
    fn submit(&self, job: &str, payload: Value);
}
