//! Error taxonomy shared by every engine operation.
//!
//! Each public operation returns either a success value or exactly one of
//! these kinds; multi-step operations roll back before surfacing an error,
//! so callers never observe partially applied state.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("bucket `{0}` is locked")]
    BucketLocked(Uuid),

    #[error("quota of {limit} bytes exceeded for bucket `{bucket}`")]
    QuotaExceeded { bucket: Uuid, limit: i64 },

    #[error("content exceeds the size limit of {limit} bytes")]
    SizeLimitExceeded { limit: u64 },

    #[error("part size {part_size} outside the allowed range [{min}, {max}]")]
    InvalidPartSize { part_size: i64, min: u64, max: u64 },

    #[error("part number {part_number} outside [0, {last_part_number}]")]
    InvalidPartNumber {
        part_number: i32,
        last_part_number: i32,
    },

    #[error("part {part_number} length differs from the expected {expected} bytes")]
    PartSizeMismatch { part_number: i32, expected: i64 },

    #[error("upload `{upload_id}` is missing parts {missing:?}")]
    IncompleteUpload { upload_id: Uuid, missing: Vec<i32> },

    #[error("upload `{0}` is not accepting parts")]
    InvalidState(Uuid),

    #[error("file instance `{file_id}` is referenced by {references} version(s)")]
    FileReferenced { file_id: Uuid, references: i64 },

    #[error("storage backend unavailable: {0}")]
    StorageUnavailable(String),

    #[error("write failed")]
    Write(#[source] std::io::Error),

    #[error("permission denied for `{action}`")]
    PermissionDenied { action: &'static str },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("no default location configured")]
    NoDefaultLocation,

    #[error("invalid object key")]
    InvalidKey,

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
