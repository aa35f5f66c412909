//! Represents physical, checksummed file content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Write-once physical content referenced by one or more object versions.
///
/// Once `size` and `checksum` are set the content is immutable; any further
/// "update" becomes a new instance. An instance may be shared by several
/// versions after a copy or migration, so physical deletion is only allowed
/// when nothing references it anymore.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct FileInstance {
    /// Unique identifier for this instance.
    pub id: Uuid,

    /// Backend-specific content URI.
    pub uri: String,

    /// Content size in bytes.
    pub size: i64,

    /// Algorithm-prefixed digest, e.g. `md5:<hex>`. Unset while the
    /// instance is still being written.
    pub checksum: Option<String>,

    /// Whether the content may be served. Cleared when an integrity check
    /// fails.
    pub readable: bool,

    /// Whether the content may still be written (multipart staging).
    pub writable: bool,

    /// Outcome of the most recent integrity check, if any.
    pub last_check: Option<bool>,

    /// When the content was last re-verified.
    pub last_check_at: Option<DateTime<Utc>>,

    /// When this instance was created.
    pub created_at: DateTime<Utc>,

    /// When this instance was last modified.
    pub updated_at: DateTime<Utc>,
}
