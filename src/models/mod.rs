//! Core data models for the object storage engine.
//!
//! These entities represent the logical structure of locations, buckets,
//! versioned objects and their physical content. They map to database
//! tables via `sqlx::FromRow` and serialize naturally as JSON via `serde`.

pub mod bucket;
pub mod file_instance;
pub mod location;
pub mod multipart;
pub mod object_version;

pub use bucket::{Bucket, BucketTag};
pub use file_instance::FileInstance;
pub use location::Location;
pub use multipart::{MultipartUpload, Part};
pub use object_version::{ObjectVersion, ObjectVersionTag};
