//! Represents a logical bucket, the top-level container for objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A storage bucket.
///
/// Buckets act as namespaces for object keys. Every bucket is bound to one
/// [`super::Location`] and aggregates the size of the live versions it
/// holds.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    /// Unique identifier for this bucket.
    pub id: Uuid,

    /// Location this bucket allocates content in.
    pub location_id: Uuid,

    /// Sum of the sizes of all live object versions, in bytes. Multipart
    /// uploads reserve their declared size here while in progress.
    pub size: i64,

    /// Optional hard cap on the aggregate size.
    pub quota_size: Option<i64>,

    /// Optional per-object size cap.
    pub max_file_size: Option<i64>,

    /// When true, every mutating operation on the bucket is rejected.
    pub locked: bool,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,

    /// When this bucket was last modified.
    pub updated_at: DateTime<Utc>,
}

impl Bucket {
    /// Remaining bytes before the quota is hit, or `None` when unlimited.
    pub fn quota_left(&self) -> Option<i64> {
        self.quota_size.map(|quota| (quota - self.size).max(0))
    }
}

/// A string tag attached to a bucket, uniquely identified by its key.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct BucketTag {
    pub bucket_id: Uuid,
    pub key: String,
    pub value: String,
}
