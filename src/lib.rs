//! Object storage domain engine.
//!
//! Manages buckets, versioned objects, physical file instances and
//! multipart upload assembly on top of a SQLite metadata store and
//! pluggable storage backends. The crate is a passive library: it exposes
//! no HTTP surface and holds no scheduler, and it consumes permissions,
//! events and background execution as injected collaborators.
//!
//! ```no_run
//! use object_store_core::{run_migrations, Engine, EngineConfig};
//! use object_store_core::storage::stream_from;
//! use bytes::Bytes;
//!
//! # async fn demo(db: sqlx::SqlitePool) -> object_store_core::Result<()> {
//! run_migrations(&db).await?;
//! let engine = Engine::new(db, EngineConfig::default());
//!
//! engine.locations().create("local", "/var/data", true).await?;
//! let bucket = engine.buckets().create(None).await?;
//! let version = engine
//!     .versions()
//!     .create_version(bucket.id, "my_file.txt", stream_from(Bytes::from("hello")))
//!     .await?;
//! assert!(version.is_head);
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod config;
pub mod engine;
pub mod errors;
pub mod hooks;
pub mod models;
pub mod services;
pub mod storage;

pub use access::{AccessPolicy, Action, AllowAll};
pub use config::EngineConfig;
pub use engine::{run_migrations, Engine, EngineBuilder};
pub use errors::{Error, Result};
pub use hooks::{EventHook, NullHook, TaskRunner};
pub use models::{
    Bucket, BucketTag, FileInstance, Location, MultipartUpload, ObjectVersion, ObjectVersionTag,
    Part,
};
pub use services::{
    BucketService, FileService, IntegrityService, ListParams, ListResult, LocationService,
    MultipartService, SweepReport, VersionService,
};
pub use storage::{
    stream_from, BackendRegistry, ByteStream, ChecksumAlgorithm, FsBackend, StorageBackend,
};
