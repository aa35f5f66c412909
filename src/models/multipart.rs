//! Represents in-progress chunked uploads and their parts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A multipart upload in progress for one (bucket, key).
///
/// Every part except the last is exactly `part_size` bytes; the last part
/// is `last_part_size` bytes. The record is destroyed on completion
/// (replaced by a new object version) or on abort.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct MultipartUpload {
    /// Upload identifier handed back to the client.
    pub id: Uuid,

    /// Parent bucket.
    pub bucket_id: Uuid,

    /// Object key being uploaded.
    pub key: String,

    /// Preallocated file instance parts are written into.
    pub file_id: Uuid,

    /// Declared total size in bytes.
    pub size: i64,

    /// Size of every part except the last.
    pub part_size: i64,

    /// Size of the final part.
    pub last_part_size: i64,

    /// Highest valid zero-based part number, `ceil(size / part_size) - 1`.
    pub last_part_number: i32,

    /// Set by the completion guard; exactly one of complete/abort wins.
    pub completed: bool,

    /// When the upload was initiated.
    pub created_at: DateTime<Utc>,

    /// When the upload was last touched.
    pub updated_at: DateTime<Utc>,
}

/// A single accepted chunk of a multipart upload.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Part {
    /// Parent upload.
    pub upload_id: Uuid,

    /// Zero-based part number.
    pub part_number: i32,

    /// First byte offset this part occupies in the assembled file.
    pub start_byte: i64,

    /// Exclusive end offset.
    pub end_byte: i64,

    /// Algorithm-prefixed digest of this part's bytes.
    pub checksum: String,

    /// When the part was first accepted.
    pub created_at: DateTime<Utc>,

    /// When the part was last (re-)uploaded.
    pub updated_at: DateTime<Utc>,
}
