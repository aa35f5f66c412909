//! Storage backend abstraction.
//!
//! A backend is a capability set over a byte-addressable persistent medium;
//! it knows nothing about buckets or versions. Backends are registered per
//! URI scheme and selected by the scheme of the content URI being touched,
//! so new media plug in by implementing [`StorageBackend`] and registering
//! under their scheme.

pub mod checksum;
pub mod filesystem;

pub use checksum::{ChecksumAlgorithm, Hasher};
pub use filesystem::FsBackend;

use crate::errors::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

/// A boxed stream of byte chunks, the unit of all content transfer.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Wrap an in-memory buffer as a one-chunk [`ByteStream`].
pub fn stream_from(bytes: Bytes) -> ByteStream {
    Box::pin(futures::stream::once(async move { Ok(bytes) }))
}

/// Outcome of a full sequential write.
#[derive(Debug, Clone)]
pub struct SaveReport {
    /// Total bytes written.
    pub size: i64,
    /// Algorithm-prefixed digest computed while streaming.
    pub checksum: String,
}

/// Outcome of a range write.
#[derive(Debug, Clone)]
pub struct ChunkReport {
    /// Bytes written into the range.
    pub bytes_written: i64,
    /// Algorithm-prefixed digest of this chunk alone.
    pub checksum: String,
}

/// Capability set implemented per physical medium.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Preallocate storage for content of a known total size, enabling
    /// out-of-order range writes against the same URI.
    async fn initialize(&self, uri: &str, size: u64) -> Result<()>;

    /// Open content for reading, optionally restricted to the byte range
    /// `[start, end)`.
    async fn open(&self, uri: &str, range: Option<(u64, u64)>) -> Result<ByteStream>;

    /// Full sequential write with a live rolling checksum. Partial writes
    /// are cleaned up before the error surfaces; a failed save never
    /// leaves a visible artifact at `uri`.
    async fn save(
        &self,
        uri: &str,
        stream: ByteStream,
        algorithm: ChecksumAlgorithm,
        size_limit: Option<u64>,
    ) -> Result<SaveReport>;

    /// Write at most `max_len` bytes starting at `offset` into previously
    /// initialized content, digesting the chunk while it streams.
    async fn update(
        &self,
        uri: &str,
        offset: u64,
        max_len: u64,
        stream: ByteStream,
        algorithm: ChecksumAlgorithm,
    ) -> Result<ChunkReport>;

    /// Remove content. Idempotent: already-absent content is not an error.
    async fn delete(&self, uri: &str) -> Result<()>;

    /// Re-read the full content and digest it.
    async fn checksum(&self, uri: &str, algorithm: ChecksumAlgorithm) -> Result<String>;
}

/// Streaming cross-backend copy.
///
/// Reads from `src` and writes through `dst.save`, so destination cleanup
/// on failure matches a plain save: no partial artifact survives.
pub async fn copy_between(
    src: &dyn StorageBackend,
    src_uri: &str,
    dst: &dyn StorageBackend,
    dst_uri: &str,
    algorithm: ChecksumAlgorithm,
) -> Result<SaveReport> {
    let stream = src.open(src_uri, None).await?;
    dst.save(dst_uri, stream, algorithm, None).await
}

/// The URI scheme a backend is selected by. URIs without a scheme are
/// treated as local filesystem paths.
pub fn scheme_of(uri: &str) -> &str {
    uri.split_once("://").map(|(scheme, _)| scheme).unwrap_or("file")
}

/// Maps URI schemes to backend implementations.
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn StorageBackend>>,
}

impl BackendRegistry {
    /// A registry with the local filesystem backend preinstalled.
    pub fn new() -> Self {
        let mut registry = Self {
            backends: HashMap::new(),
        };
        registry.register("file", Arc::new(FsBackend::new()));
        registry
    }

    pub fn register(&mut self, scheme: impl Into<String>, backend: Arc<dyn StorageBackend>) {
        self.backends.insert(scheme.into(), backend);
    }

    /// Resolve the backend responsible for `uri`.
    pub fn resolve(&self, uri: &str) -> Result<Arc<dyn StorageBackend>> {
        let scheme = scheme_of(uri);
        self.backends.get(scheme).cloned().ok_or_else(|| {
            Error::StorageUnavailable(format!("no backend registered for scheme `{scheme}`"))
        })
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
