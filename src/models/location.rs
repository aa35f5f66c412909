//! Represents a named storage root buckets are assigned to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A named storage root (physical medium plus URI prefix).
///
/// Locations are created administratively. At most one location carries the
/// default flag at any time; buckets created without an explicit location
/// land on the default one.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Location {
    /// Unique identifier for this location.
    pub id: Uuid,

    /// Human-readable unique name (e.g. "local", "archive-eu").
    pub name: String,

    /// Base URI under which content is allocated. A plain path is treated
    /// as a `file` URI.
    pub uri: String,

    /// Whether this location is the process-wide default.
    pub is_default: bool,

    /// When this location was created.
    pub created_at: DateTime<Utc>,
}
