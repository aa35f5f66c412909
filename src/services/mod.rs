//! Domain services over the persisted state.
//!
//! Each service is a thin `Clone`-able handle onto the shared engine
//! state. Byte streaming always happens outside metadata transactions and
//! outside the per-key serialization points, which are held only for the
//! instant of a head transition.

pub mod buckets;
pub mod files;
pub mod integrity;
pub mod locations;
pub mod multipart;
pub mod versions;

pub use buckets::BucketService;
pub use files::FileService;
pub use integrity::{IntegrityService, SweepReport};
pub use locations::LocationService;
pub use multipart::MultipartService;
pub use versions::{ListParams, ListResult, VersionService};

use crate::errors::{Error, Result};

const MAX_OBJECT_KEY_LEN: usize = 1024;

/// Basic key validation to avoid trivial path traversal vectors.
///
/// Rejects empty or oversized keys, keys that begin with `/` or contain
/// `..`, and control characters.
pub(crate) fn ensure_key_safe(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(Error::InvalidKey);
    }
    if key.starts_with('/') || key.contains("..") {
        return Err(Error::InvalidKey);
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(Error::InvalidKey);
    }
    Ok(())
}

/// Return true if a SQLx error indicates a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
