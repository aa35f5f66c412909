//! Local filesystem storage backend.
//!
//! Content URIs are absolute paths, optionally prefixed with `file://`.
//! Sequential saves stream into a temporary sibling file and rename into
//! place after fsync, so a failed or abandoned save never leaves a partial
//! artifact at the final path.

use crate::errors::{Error, Result};
use crate::storage::{
    ByteStream, ChecksumAlgorithm, ChunkReport, Hasher, SaveReport, StorageBackend,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

/// Read buffer size for checksum re-reads (64 KiB).
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Storage backend writing to the local filesystem.
pub struct FsBackend;

impl FsBackend {
    pub fn new() -> Self {
        Self
    }

    fn path_of(uri: &str) -> PathBuf {
        PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri))
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| Error::StorageUnavailable(err.to_string()))?;
        }
        Ok(())
    }

    async fn open_existing(path: &Path, uri: &str) -> Result<File> {
        File::open(path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                Error::NotFound(format!("content at `{uri}`"))
            } else {
                Error::StorageUnavailable(err.to_string())
            }
        })
    }
}

impl Default for FsBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for FsBackend {
    async fn initialize(&self, uri: &str, size: u64) -> Result<()> {
        let path = Self::path_of(uri);
        Self::ensure_parent(&path).await?;
        let file = File::create(&path)
            .await
            .map_err(|err| Error::StorageUnavailable(err.to_string()))?;
        file.set_len(size).await.map_err(Error::Write)?;
        file.sync_all().await.map_err(Error::Write)?;
        Ok(())
    }

    async fn open(&self, uri: &str, range: Option<(u64, u64)>) -> Result<ByteStream> {
        let path = Self::path_of(uri);
        let mut file = Self::open_existing(&path, uri).await?;
        match range {
            Some((start, end)) => {
                file.seek(SeekFrom::Start(start)).await?;
                let len = end.saturating_sub(start);
                Ok(Box::pin(ReaderStream::new(file.take(len))))
            }
            None => Ok(Box::pin(ReaderStream::new(file))),
        }
    }

    async fn save(
        &self,
        uri: &str,
        mut stream: ByteStream,
        algorithm: ChecksumAlgorithm,
        size_limit: Option<u64>,
    ) -> Result<SaveReport> {
        let path = Self::path_of(uri);
        Self::ensure_parent(&path).await?;
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::StorageUnavailable("content path has no parent".into()))?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path)
            .await
            .map_err(|err| Error::StorageUnavailable(err.to_string()))?;

        // Stream chunks into the temp file, digesting as they pass. On any
        // failure the temp file is removed before the error surfaces.
        let mut size: u64 = 0;
        let mut hasher = Hasher::new(algorithm);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(Error::Write(err));
                }
            };
            size += chunk.len() as u64;
            if let Some(limit) = size_limit
                && size > limit
            {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(Error::SizeLimitExceeded { limit });
            }
            hasher.update(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(Error::Write(err));
            }
        }

        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(Error::Write(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(Error::Write(err));
        }
        if let Err(err) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(Error::Write(err));
        }

        debug!(uri, size, "saved content");
        Ok(SaveReport {
            size: size as i64,
            checksum: hasher.finish(),
        })
    }

    async fn update(
        &self,
        uri: &str,
        offset: u64,
        max_len: u64,
        mut stream: ByteStream,
        algorithm: ChecksumAlgorithm,
    ) -> Result<ChunkReport> {
        let path = Self::path_of(uri);
        let mut file = OpenOptions::new()
            .write(true)
            .open(&path)
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    Error::NotFound(format!("content at `{uri}`"))
                } else {
                    Error::StorageUnavailable(err.to_string())
                }
            })?;
        file.seek(SeekFrom::Start(offset)).await.map_err(Error::Write)?;

        // The range is bounded so a stray oversized stream cannot spill
        // into bytes owned by neighbouring ranges. Written bytes stay in
        // the preallocated region; a retry simply overwrites them.
        let mut written: u64 = 0;
        let mut hasher = Hasher::new(algorithm);
        while let Some(chunk_res) = stream.next().await {
            let chunk = chunk_res.map_err(Error::Write)?;
            if written + chunk.len() as u64 > max_len {
                return Err(Error::SizeLimitExceeded { limit: max_len });
            }
            written += chunk.len() as u64;
            hasher.update(&chunk);
            file.write_all(&chunk).await.map_err(Error::Write)?;
        }
        file.flush().await.map_err(Error::Write)?;
        file.sync_all().await.map_err(Error::Write)?;

        Ok(ChunkReport {
            bytes_written: written as i64,
            checksum: hasher.finish(),
        })
    }

    async fn delete(&self, uri: &str) -> Result<()> {
        let path = Self::path_of(uri);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(uri, "content already absent");
                Ok(())
            }
            Err(err) => Err(Error::Io(err)),
        }
    }

    async fn checksum(&self, uri: &str, algorithm: ChecksumAlgorithm) -> Result<String> {
        let path = Self::path_of(uri);
        let mut file = Self::open_existing(&path, uri).await?;
        let mut hasher = Hasher::new(algorithm);
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf).await.map_err(Error::Io)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finish())
    }
}
