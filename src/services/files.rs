//! Physical content management.
//!
//! A `FileInstance` row is only ever persisted for fully written content;
//! on any backend failure the partial bytes are deleted before the error
//! surfaces, so metadata never points at half-written content. Physical
//! deletion happens strictly after the row delete commits: a crash in
//! between leaves an orphan file a sweep can find, never a live pointer
//! to missing bytes.

use crate::engine::EngineInner;
use crate::errors::{Error, Result};
use crate::hooks::events;
use crate::models::{FileInstance, Location};
use crate::services::LocationService;
use crate::storage::{copy_between, ByteStream, ChecksumAlgorithm};
use chrono::Utc;
use serde_json::json;
use sqlx::SqliteConnection;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

const SELECT_FILE: &str = "SELECT id, uri, size, checksum, readable, writable, last_check, \
     last_check_at, created_at, updated_at FROM file_instances";

pub(crate) async fn fetch_file<'e, E>(executor: E, id: Uuid) -> Result<FileInstance>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query_as::<_, FileInstance>(&format!("{SELECT_FILE} WHERE id = ?"))
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| Error::NotFound(format!("file instance `{id}`")))
}

pub(crate) async fn insert_file<'e, E>(executor: E, file: &FileInstance) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        "INSERT INTO file_instances (id, uri, size, checksum, readable, writable, last_check, \
         last_check_at, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(file.id)
    .bind(&file.uri)
    .bind(file.size)
    .bind(&file.checksum)
    .bind(file.readable)
    .bind(file.writable)
    .bind(file.last_check)
    .bind(file.last_check_at)
    .bind(file.created_at)
    .bind(file.updated_at)
    .execute(executor)
    .await?;
    Ok(())
}

/// Count the versions and in-flight uploads pointing at an instance.
///
/// Read inside the same transaction as a deletion so version creation
/// cannot race the reference check.
pub(crate) async fn reference_count(conn: &mut SqliteConnection, id: Uuid) -> Result<i64> {
    let versions: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM object_versions WHERE file_id = ?")
            .bind(id)
            .fetch_one(&mut *conn)
            .await?;
    let uploads: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM multipart_uploads WHERE file_id = ?")
            .bind(id)
            .fetch_one(&mut *conn)
            .await?;
    Ok(versions + uploads)
}

/// File instance manager: allocation, verification, deletion, migration.
#[derive(Clone)]
pub struct FileService {
    inner: Arc<EngineInner>,
}

impl FileService {
    pub(crate) fn new(inner: Arc<EngineInner>) -> Self {
        Self { inner }
    }

    /// Shard a content URI beneath a location root. Two hex levels keep
    /// directory fan-out bounded on filesystem media.
    pub(crate) fn allocate_uri(location: &Location, file_id: Uuid) -> String {
        let hex = file_id.simple().to_string();
        format!("{}/{}/{}/{}", location.uri, &hex[0..2], &hex[2..4], hex)
    }

    pub async fn get(&self, id: Uuid) -> Result<FileInstance> {
        fetch_file(&self.inner.db, id).await
    }

    /// Stream content into a new instance in `location`.
    ///
    /// The row is inserted only after the backend reports a complete save;
    /// if the insert itself fails the bytes are deleted again.
    pub async fn create_from_stream(
        &self,
        location: &Location,
        stream: ByteStream,
        size_limit: Option<u64>,
    ) -> Result<FileInstance> {
        let id = Uuid::new_v4();
        let uri = Self::allocate_uri(location, id);
        let backend = self.inner.backends.resolve(&uri)?;
        let report = backend
            .save(
                &uri,
                stream,
                self.inner.config.default_checksum_algorithm,
                size_limit,
            )
            .await?;

        let now = Utc::now();
        let file = FileInstance {
            id,
            uri,
            size: report.size,
            checksum: Some(report.checksum),
            readable: true,
            writable: false,
            last_check: None,
            last_check_at: None,
            created_at: now,
            updated_at: now,
        };
        if let Err(err) = insert_file(&self.inner.db, &file).await {
            let _ = backend.delete(&file.uri).await;
            return Err(err);
        }
        debug!(file_id = %file.id, size = file.size, "created file instance");
        Ok(file)
    }

    /// Preallocate an instance of known total size for out-of-order range
    /// writes. The instance stays writable and unreadable until finalized.
    pub(crate) async fn create_placeholder(
        &self,
        location: &Location,
        size: i64,
    ) -> Result<FileInstance> {
        let id = Uuid::new_v4();
        let uri = Self::allocate_uri(location, id);
        let backend = self.inner.backends.resolve(&uri)?;
        backend.initialize(&uri, size as u64).await?;

        let now = Utc::now();
        let file = FileInstance {
            id,
            uri,
            size,
            checksum: None,
            readable: false,
            writable: true,
            last_check: None,
            last_check_at: None,
            created_at: now,
            updated_at: now,
        };
        if let Err(err) = insert_file(&self.inner.db, &file).await {
            let _ = backend.delete(&file.uri).await;
            return Err(err);
        }
        Ok(file)
    }

    /// Seal a writable instance: digest the assembled content in full and
    /// flip it readable. The digest is always recomputed over the final
    /// bytes rather than derived from per-range digests, so placement
    /// errors surface here.
    pub(crate) async fn finalize(&self, file: &FileInstance) -> Result<FileInstance> {
        let backend = self.inner.backends.resolve(&file.uri)?;
        let checksum = backend
            .checksum(&file.uri, self.inner.config.default_checksum_algorithm)
            .await?;
        sqlx::query(
            "UPDATE file_instances SET checksum = ?, readable = 1, writable = 0, updated_at = ? \
             WHERE id = ?",
        )
        .bind(&checksum)
        .bind(Utc::now())
        .bind(file.id)
        .execute(&self.inner.db)
        .await?;
        fetch_file(&self.inner.db, file.id).await
    }

    /// Open content for reading, optionally a `[start, end)` byte range.
    pub async fn open(
        &self,
        file: &FileInstance,
        range: Option<(u64, u64)>,
    ) -> Result<ByteStream> {
        if !file.readable {
            return Err(Error::StorageUnavailable(format!(
                "file instance `{}` is flagged unreadable",
                file.id
            )));
        }
        let backend = self.inner.backends.resolve(&file.uri)?;
        let stream = backend.open(&file.uri, range).await?;
        self.inner
            .events
            .emit(events::FILE_DOWNLOADED, json!({ "file_id": file.id }));
        Ok(stream)
    }

    /// Recompute the checksum and compare it to the recorded digest.
    ///
    /// A mismatch flags the instance unreadable and reports it; nothing is
    /// deleted, repair needs an explicit migration or re-upload.
    pub async fn verify(&self, id: Uuid) -> Result<bool> {
        let file = fetch_file(&self.inner.db, id).await?;
        let stored = file
            .checksum
            .clone()
            .ok_or_else(|| Error::NotFound(format!("checksum for file instance `{id}`")))?;
        let algorithm = ChecksumAlgorithm::of_digest(&stored)?;
        let backend = self.inner.backends.resolve(&file.uri)?;
        let actual = backend.checksum(&file.uri, algorithm).await?;

        let passed = actual == stored;
        let now = Utc::now();
        if passed {
            sqlx::query(
                "UPDATE file_instances SET last_check = 1, last_check_at = ?, updated_at = ? \
                 WHERE id = ?",
            )
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&self.inner.db)
            .await?;
        } else {
            sqlx::query(
                "UPDATE file_instances SET last_check = 0, last_check_at = ?, readable = 0, \
                 updated_at = ? WHERE id = ?",
            )
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&self.inner.db)
            .await?;
            warn!(file_id = %id, expected = %stored, actual = %actual, "checksum mismatch");
            self.inner.events.emit(
                events::CHECKSUM_MISMATCH,
                json!({ "file_id": id, "expected": stored, "actual": actual }),
            );
        }
        Ok(passed)
    }

    /// Delete an unreferenced instance, metadata first.
    pub async fn remove(&self, id: Uuid) -> Result<()> {
        let mut tx = self.inner.db.begin().await?;
        let file = fetch_file(&mut *tx, id).await?;
        let references = reference_count(&mut *tx, id).await?;
        if references > 0 {
            return Err(Error::FileReferenced {
                file_id: id,
                references,
            });
        }
        sqlx::query("DELETE FROM file_instances WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let backend = self.inner.backends.resolve(&file.uri)?;
        if let Err(err) = backend.delete(&file.uri).await {
            warn!(file_id = %id, uri = %file.uri, %err, "row deleted but physical delete failed");
        }
        Ok(())
    }

    /// Copy an instance to another location and atomically re-point every
    /// referencing version at the copy.
    ///
    /// All-or-nothing and repeatable: on any failure the destination bytes
    /// and row are discarded and the source is untouched. The source
    /// instance itself is left in place, unreferenced, for a sweep to
    /// collect.
    pub async fn migrate(
        &self,
        id: Uuid,
        destination: &str,
        verify_after: bool,
    ) -> Result<FileInstance> {
        let src = fetch_file(&self.inner.db, id).await?;
        let src_checksum = src
            .checksum
            .clone()
            .ok_or_else(|| Error::NotFound(format!("checksum for file instance `{id}`")))?;
        let location = LocationService::new(self.inner.clone())
            .get(destination)
            .await?;

        let dst_id = Uuid::new_v4();
        let dst_uri = Self::allocate_uri(&location, dst_id);
        let src_backend = self.inner.backends.resolve(&src.uri)?;
        let dst_backend = self.inner.backends.resolve(&dst_uri)?;
        let algorithm = ChecksumAlgorithm::of_digest(&src_checksum)?;

        let report = copy_between(
            src_backend.as_ref(),
            &src.uri,
            dst_backend.as_ref(),
            &dst_uri,
            algorithm,
        )
        .await?;
        if report.size != src.size || report.checksum != src_checksum {
            let _ = dst_backend.delete(&dst_uri).await;
            return Err(Error::ChecksumMismatch {
                expected: src_checksum,
                actual: report.checksum,
            });
        }
        if verify_after {
            let reread = match dst_backend.checksum(&dst_uri, algorithm).await {
                Ok(digest) => digest,
                Err(err) => {
                    let _ = dst_backend.delete(&dst_uri).await;
                    return Err(err);
                }
            };
            if reread != src_checksum {
                let _ = dst_backend.delete(&dst_uri).await;
                return Err(Error::ChecksumMismatch {
                    expected: src_checksum,
                    actual: reread,
                });
            }
        }

        let now = Utc::now();
        let dst = FileInstance {
            id: dst_id,
            uri: dst_uri,
            size: src.size,
            checksum: Some(src_checksum),
            readable: true,
            writable: false,
            last_check: None,
            last_check_at: None,
            created_at: now,
            updated_at: now,
        };

        // Persist the copy and re-point every referencing version in one
        // transaction; a failure here discards the copy entirely.
        let mut tx = self.inner.db.begin().await?;
        let repoint = async {
            insert_file(&mut *tx, &dst).await?;
            sqlx::query("UPDATE object_versions SET file_id = ? WHERE file_id = ?")
                .bind(dst.id)
                .bind(src.id)
                .execute(&mut *tx)
                .await?;
            Ok::<_, Error>(tx)
        }
        .await;
        let commit = match repoint {
            Ok(tx) => tx.commit().await.map_err(Error::from),
            Err(err) => Err(err),
        };
        if let Err(err) = commit {
            let _ = dst_backend.delete(&dst.uri).await;
            return Err(err);
        }

        debug!(src = %src.id, dst = %dst.id, location = %location.name, "migrated file instance");
        self.inner.events.emit(
            events::FILE_MIGRATED,
            json!({ "src": src.id, "dst": dst.id, "location": location.name }),
        );
        Ok(dst)
    }
}
