//! Multipart upload engine.
//!
//! Lifecycle: a row in `multipart_uploads` means the upload is accepting
//! parts; the `completed` flag is the terminal-transition guard and the
//! row disappears on completion or abort. Parts land directly at their
//! final offset in a preallocated file instance, so completion needs no
//! merge pass. Different part numbers of the same upload may stream fully
//! in parallel since each writes a disjoint byte range; complete and abort
//! race through a guarded single-row update and exactly one wins.

use crate::access::Action;
use crate::engine::EngineInner;
use crate::errors::{Error, Result};
use crate::hooks::events;
use crate::models::{MultipartUpload, ObjectVersion, Part};
use crate::services::buckets::{
    apply_size_delta, ensure_unlocked, fetch_bucket, quota_error,
};
use crate::services::files::{fetch_file, FileService};
use crate::services::versions::insert_head;
use crate::services::{ensure_key_safe, LocationService};
use crate::storage::ByteStream;
use chrono::Utc;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

const SELECT_UPLOAD: &str = "SELECT id, bucket_id, key, file_id, size, part_size, \
     last_part_size, last_part_number, completed, created_at, updated_at FROM multipart_uploads";

const SELECT_PART: &str =
    "SELECT upload_id, part_number, start_byte, end_byte, checksum, created_at, updated_at \
     FROM parts";

/// Zero-based number of the final part and its size, for a declared total
/// size split into `part_size` chunks.
pub(crate) fn part_layout(size: i64, part_size: i64) -> (i32, i64) {
    let part_count = (size + part_size - 1) / part_size;
    let last_part_number = (part_count - 1) as i32;
    let last_part_size = size - part_size * (part_count - 1);
    (last_part_number, last_part_size)
}

pub(crate) async fn fetch_upload<'e, E>(executor: E, id: Uuid) -> Result<MultipartUpload>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query_as::<_, MultipartUpload>(&format!("{SELECT_UPLOAD} WHERE id = ?"))
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| Error::NotFound(format!("upload `{id}`")))
}

/// Multipart upload operations.
#[derive(Clone)]
pub struct MultipartService {
    inner: Arc<EngineInner>,
}

impl MultipartService {
    pub(crate) fn new(inner: Arc<EngineInner>) -> Self {
        Self { inner }
    }

    /// Start an upload of `size` bytes split into `part_size` chunks.
    ///
    /// The declared size is validated against the bucket caps and reserved
    /// against the quota up front, and backend storage is preallocated so
    /// parts can land out of order.
    pub async fn initiate(
        &self,
        bucket_id: Uuid,
        key: &str,
        size: i64,
        part_size: i64,
    ) -> Result<MultipartUpload> {
        ensure_key_safe(key)?;
        let bucket = fetch_bucket(&self.inner.db, bucket_id).await?;
        self.inner
            .check_access(Action::BucketUpdate, Some(&bucket), Some(key))?;
        ensure_unlocked(&bucket)?;

        let min = self.inner.config.multipart_chunksize_min;
        let max = self.inner.config.multipart_chunksize_max;
        if size <= 0 || part_size <= 0 || (part_size as u64) < min || (part_size as u64) > max {
            return Err(Error::InvalidPartSize {
                part_size,
                min,
                max,
            });
        }
        if let Some(cap) = bucket.max_file_size
            && size > cap
        {
            return Err(Error::SizeLimitExceeded { limit: cap as u64 });
        }
        if let Some(quota) = bucket.quota_size
            && bucket.size + size > quota
        {
            return Err(quota_error(&bucket));
        }

        let (last_part_number, last_part_size) = part_layout(size, part_size);
        let location = LocationService::new(self.inner.clone())
            .by_id(bucket.location_id)
            .await?;
        let files = FileService::new(self.inner.clone());
        let file = files.create_placeholder(&location, size).await?;

        let now = Utc::now();
        let upload = MultipartUpload {
            id: Uuid::new_v4(),
            bucket_id,
            key: key.to_string(),
            file_id: file.id,
            size,
            part_size,
            last_part_size,
            last_part_number,
            completed: false,
            created_at: now,
            updated_at: now,
        };

        // reserve the declared size against the quota atomically
        let result: Result<()> = async {
            let mut tx = self.inner.db.begin().await?;
            let current = fetch_bucket(&mut *tx, bucket_id).await?;
            ensure_unlocked(&current)?;
            if let Some(quota) = current.quota_size
                && current.size + size > quota
            {
                return Err(quota_error(&current));
            }
            sqlx::query(
                "INSERT INTO multipart_uploads (id, bucket_id, key, file_id, size, part_size, \
                 last_part_size, last_part_number, completed, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)",
            )
            .bind(upload.id)
            .bind(upload.bucket_id)
            .bind(&upload.key)
            .bind(upload.file_id)
            .bind(upload.size)
            .bind(upload.part_size)
            .bind(upload.last_part_size)
            .bind(upload.last_part_number)
            .bind(upload.created_at)
            .bind(upload.updated_at)
            .execute(&mut *tx)
            .await?;
            apply_size_delta(&mut tx, bucket_id, size).await?;
            tx.commit().await?;
            Ok(())
        }
        .await;
        if let Err(err) = result {
            let _ = files.remove(file.id).await;
            return Err(err);
        }

        debug!(upload = %upload.id, key, size, part_size, "initiated multipart upload");
        Ok(upload)
    }

    pub async fn get(&self, upload_id: Uuid) -> Result<MultipartUpload> {
        let upload = fetch_upload(&self.inner.db, upload_id).await?;
        let bucket = fetch_bucket(&self.inner.db, upload.bucket_id).await?;
        self.inner
            .check_access(Action::MultipartRead, Some(&bucket), Some(&upload.key))?;
        Ok(upload)
    }

    /// Accept one part, writing it at its final offset.
    ///
    /// Re-uploading an existing part number overwrites it, so retries are
    /// idempotent while the upload is still accepting parts. A length
    /// mismatch discards the write by never recording the part; the bytes
    /// stay inside the preallocated region and a retry overwrites them.
    pub async fn upload_part(
        &self,
        upload_id: Uuid,
        part_number: i32,
        stream: ByteStream,
    ) -> Result<Part> {
        let upload = fetch_upload(&self.inner.db, upload_id).await?;
        if upload.completed {
            return Err(Error::InvalidState(upload_id));
        }
        let bucket = fetch_bucket(&self.inner.db, upload.bucket_id).await?;
        self.inner
            .check_access(Action::BucketUpdate, Some(&bucket), Some(&upload.key))?;
        ensure_unlocked(&bucket)?;

        if part_number < 0 || part_number > upload.last_part_number {
            return Err(Error::InvalidPartNumber {
                part_number,
                last_part_number: upload.last_part_number,
            });
        }
        let expected = if part_number == upload.last_part_number {
            upload.last_part_size
        } else {
            upload.part_size
        };

        let file = fetch_file(&self.inner.db, upload.file_id).await?;
        let backend = self.inner.backends.resolve(&file.uri)?;
        let offset = part_number as u64 * upload.part_size as u64;
        let report = backend
            .update(
                &file.uri,
                offset,
                expected as u64,
                stream,
                self.inner.config.default_checksum_algorithm,
            )
            .await
            .map_err(|err| match err {
                Error::SizeLimitExceeded { .. } => Error::PartSizeMismatch {
                    part_number,
                    expected,
                },
                other => other,
            })?;
        if report.bytes_written != expected {
            return Err(Error::PartSizeMismatch {
                part_number,
                expected,
            });
        }

        // record the part only if the upload is still accepting; an abort
        // racing the byte stream must not resurrect part rows
        let mut tx = self.inner.db.begin().await?;
        let still_open: Option<bool> =
            sqlx::query_scalar("SELECT completed FROM multipart_uploads WHERE id = ?")
                .bind(upload_id)
                .fetch_optional(&mut *tx)
                .await?;
        match still_open {
            Some(false) => {}
            _ => return Err(Error::InvalidState(upload_id)),
        }
        let now = Utc::now();
        let part = sqlx::query_as::<_, Part>(
            "INSERT INTO parts (upload_id, part_number, start_byte, end_byte, checksum, \
             created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(upload_id, part_number) DO UPDATE SET \
                 checksum = excluded.checksum, updated_at = excluded.updated_at
             RETURNING upload_id, part_number, start_byte, end_byte, checksum, created_at, \
                 updated_at",
        )
        .bind(upload_id)
        .bind(part_number)
        .bind(offset as i64)
        .bind(offset as i64 + expected)
        .bind(&report.checksum)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(part)
    }

    /// Assemble the upload into a new head version.
    ///
    /// Fails with the missing part numbers while any are absent. The
    /// transition out of the accepting state is a guarded single-row
    /// update: whichever of complete/abort lands first wins and the loser
    /// observes an invalid state.
    pub async fn complete(&self, upload_id: Uuid) -> Result<ObjectVersion> {
        let upload = fetch_upload(&self.inner.db, upload_id).await?;
        let bucket = fetch_bucket(&self.inner.db, upload.bucket_id).await?;
        self.inner
            .check_access(Action::BucketUpdate, Some(&bucket), Some(&upload.key))?;
        ensure_unlocked(&bucket)?;

        {
            let mut tx = self.inner.db.begin().await?;
            let present: Vec<i32> =
                sqlx::query_scalar("SELECT part_number FROM parts WHERE upload_id = ?")
                    .bind(upload_id)
                    .fetch_all(&mut *tx)
                    .await?;
            let present: BTreeSet<i32> = present.into_iter().collect();
            let missing: Vec<i32> = (0..=upload.last_part_number)
                .filter(|n| !present.contains(n))
                .collect();
            if !missing.is_empty() {
                return Err(Error::IncompleteUpload { upload_id, missing });
            }
            let transitioned = sqlx::query(
                "UPDATE multipart_uploads SET completed = 1, updated_at = ? \
                 WHERE id = ? AND completed = 0",
            )
            .bind(Utc::now())
            .bind(upload_id)
            .execute(&mut *tx)
            .await?;
            if transitioned.rows_affected() == 0 {
                return Err(Error::InvalidState(upload_id));
            }
            tx.commit().await?;
        }

        // seal the assembled content; the digest is recomputed over the
        // whole file, per-part digests are never trusted for it
        let files = FileService::new(self.inner.clone());
        let file = files.get(upload.file_id).await?;
        let file = files.finalize(&file).await?;

        // publish the head version and retire the upload record; the
        // declared size was already reserved at initiation
        let guard = self
            .inner
            .key_locks
            .lock(upload.bucket_id, &upload.key)
            .await;
        let result: Result<ObjectVersion> = async {
            let mut tx = self.inner.db.begin().await?;
            let version =
                insert_head(&mut tx, upload.bucket_id, &upload.key, Some(file.id), false).await?;
            sqlx::query("DELETE FROM parts WHERE upload_id = ?")
                .bind(upload_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM multipart_uploads WHERE id = ?")
                .bind(upload_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(version)
        }
        .await;
        drop(guard);
        let version: ObjectVersion = result?;

        debug!(upload = %upload_id, version = %version.id, "completed multipart upload");
        self.inner.events.emit(
            events::MULTIPART_COMPLETED,
            json!({
                "upload_id": upload_id,
                "bucket_id": upload.bucket_id,
                "key": upload.key,
                "version_id": version.id,
            }),
        );
        Ok(version)
    }

    /// Drop an in-progress upload: all parts, the preallocated content and
    /// the upload record are removed and the quota reservation released.
    pub async fn abort(&self, upload_id: Uuid) -> Result<()> {
        let upload = fetch_upload(&self.inner.db, upload_id).await?;
        let bucket = fetch_bucket(&self.inner.db, upload.bucket_id).await?;
        self.inner
            .check_access(Action::MultipartDelete, Some(&bucket), Some(&upload.key))?;
        ensure_unlocked(&bucket)?;

        let mut tx = self.inner.db.begin().await?;
        let file = fetch_file(&mut *tx, upload.file_id).await?;
        sqlx::query("DELETE FROM parts WHERE upload_id = ?")
            .bind(upload_id)
            .execute(&mut *tx)
            .await?;
        let removed = sqlx::query("DELETE FROM multipart_uploads WHERE id = ? AND completed = 0")
            .bind(upload_id)
            .execute(&mut *tx)
            .await?;
        if removed.rows_affected() == 0 {
            // completion won the race; the rollback restores the part rows
            return Err(Error::InvalidState(upload_id));
        }
        apply_size_delta(&mut tx, upload.bucket_id, -upload.size).await?;
        sqlx::query("DELETE FROM file_instances WHERE id = ?")
            .bind(upload.file_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let backend = self.inner.backends.resolve(&file.uri)?;
        if let Err(err) = backend.delete(&file.uri).await {
            warn!(upload = %upload_id, uri = %file.uri, %err, "aborted but physical delete failed");
        }
        debug!(upload = %upload_id, "aborted multipart upload");
        self.inner.events.emit(
            events::MULTIPART_ABORTED,
            json!({
                "upload_id": upload_id,
                "bucket_id": upload.bucket_id,
                "key": upload.key,
            }),
        );
        Ok(())
    }

    /// Accepted parts of an upload, ordered by part number.
    pub async fn list_parts(&self, upload_id: Uuid) -> Result<Vec<Part>> {
        let upload = fetch_upload(&self.inner.db, upload_id).await?;
        let bucket = fetch_bucket(&self.inner.db, upload.bucket_id).await?;
        self.inner
            .check_access(Action::MultipartRead, Some(&bucket), Some(&upload.key))?;
        Ok(sqlx::query_as::<_, Part>(&format!(
            "{SELECT_PART} WHERE upload_id = ? ORDER BY part_number ASC"
        ))
        .bind(upload_id)
        .fetch_all(&self.inner.db)
        .await?)
    }

    /// In-progress uploads for a bucket, oldest first.
    pub async fn list_uploads(&self, bucket_id: Uuid) -> Result<Vec<MultipartUpload>> {
        let bucket = fetch_bucket(&self.inner.db, bucket_id).await?;
        self.inner
            .check_access(Action::BucketListMultiparts, Some(&bucket), None)?;
        Ok(sqlx::query_as::<_, MultipartUpload>(&format!(
            "{SELECT_UPLOAD} WHERE bucket_id = ? ORDER BY created_at ASC"
        ))
        .bind(bucket_id)
        .fetch_all(&self.inner.db)
        .await?)
    }
}
