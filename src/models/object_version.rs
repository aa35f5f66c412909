//! Represents one entry in a key's version history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One historical or current instance of an object's content or deletion
/// state.
///
/// At most one version per (bucket, key) has `is_head = true`; that version
/// is what default queries return. A delete marker is a head version with
/// no content, preserving the older history underneath it. History entries
/// are append-only and never mutated after creation, apart from tag edits.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ObjectVersion {
    /// Monotonically increasing insert sequence, used to break creation
    /// timestamp ties when ordering the chain.
    pub seq: i64,

    /// Version identifier, unique across the whole store.
    pub id: Uuid,

    /// Bucket this version lives in.
    pub bucket_id: Uuid,

    /// Logical filename inside the bucket.
    pub key: String,

    /// Physical content, or `None` for delete markers.
    pub file_id: Option<Uuid>,

    /// Whether this is the most recent version for its key.
    pub is_head: bool,

    /// Whether this version represents "the key is currently deleted".
    pub delete_marker: bool,

    /// When this version was created.
    pub created_at: DateTime<Utc>,
}

/// A key-value tag attached to a single version.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ObjectVersionTag {
    pub version_id: Uuid,
    pub key: String,
    pub value: String,
}
