//! Permission seam.
//!
//! The engine never evaluates principals itself; it asks an injected
//! [`AccessPolicy`] for an allow/deny decision per operation and performs
//! no side effects on denial.

use crate::models::Bucket;
use std::fmt;

/// Named operations a policy can rule on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    LocationUpdate,
    BucketRead,
    BucketReadVersions,
    BucketUpdate,
    BucketListMultiparts,
    ObjectRead,
    ObjectReadVersion,
    ObjectDelete,
    ObjectDeleteVersion,
    MultipartRead,
    MultipartDelete,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LocationUpdate => "location-update",
            Self::BucketRead => "bucket-read",
            Self::BucketReadVersions => "bucket-read-versions",
            Self::BucketUpdate => "bucket-update",
            Self::BucketListMultiparts => "bucket-listmultiparts",
            Self::ObjectRead => "object-read",
            Self::ObjectReadVersion => "object-read-version",
            Self::ObjectDelete => "object-delete",
            Self::ObjectDeleteVersion => "object-delete-version",
            Self::MultipartRead => "multipart-read",
            Self::MultipartDelete => "multipart-delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque allow/deny evaluator consulted before any side effect.
pub trait AccessPolicy: Send + Sync {
    /// Rule on `action` against a bucket and, for object-level actions,
    /// the key inside it.
    fn allow(&self, action: Action, bucket: Option<&Bucket>, key: Option<&str>) -> bool;
}

/// Policy that admits everything; the default when none is injected.
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn allow(&self, _action: Action, _bucket: Option<&Bucket>, _key: Option<&str>) -> bool {
        true
    }
}
