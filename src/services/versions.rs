//! Object version chains.
//!
//! All head transitions for a (bucket, key) pass through one serialization
//! point: an in-process keyed mutex held for the duration of the metadata
//! transaction only, never across byte streaming. Inside that transaction
//! the previous head is flipped off and the new head inserted, which
//! together with the partial unique index keeps at most one head per key
//! at any observable instant.

use crate::access::Action;
use crate::engine::EngineInner;
use crate::errors::{Error, Result};
use crate::hooks::events;
use crate::models::{Bucket, FileInstance, ObjectVersion, ObjectVersionTag};
use crate::services::buckets::{
    apply_size_delta, ensure_unlocked, fetch_bucket, quota_error, upload_limit, LimitBound,
};
use crate::services::files::{fetch_file, FileService};
use crate::services::{ensure_key_safe, LocationService};
use crate::storage::ByteStream;
use chrono::Utc;
use serde_json::json;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const SELECT_VERSION: &str = "SELECT seq, id, bucket_id, key, file_id, is_head, delete_marker, \
     created_at FROM object_versions";

#[derive(Clone, Debug)]
pub struct ListParams {
    pub prefix: Option<String>,
    pub continuation_token: Option<String>,
    pub max_keys: usize,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            prefix: None,
            continuation_token: None,
            max_keys: 1000,
        }
    }
}

#[derive(Debug)]
pub struct ListResult {
    pub versions: Vec<ObjectVersion>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
    pub key_count: usize,
}

/// Flip the current head off and insert the replacement, all through the
/// caller's transaction.
pub(crate) async fn insert_head(
    conn: &mut SqliteConnection,
    bucket_id: Uuid,
    key: &str,
    file_id: Option<Uuid>,
    delete_marker: bool,
) -> Result<ObjectVersion> {
    sqlx::query(
        "UPDATE object_versions SET is_head = 0 WHERE bucket_id = ? AND key = ? AND is_head = 1",
    )
    .bind(bucket_id)
    .bind(key)
    .execute(&mut *conn)
    .await?;

    let version = sqlx::query_as::<_, ObjectVersion>(
        "INSERT INTO object_versions (id, bucket_id, key, file_id, is_head, delete_marker, \
         created_at) VALUES (?, ?, ?, ?, 1, ?, ?) RETURNING seq, id, bucket_id, key, file_id, \
         is_head, delete_marker, created_at",
    )
    .bind(Uuid::new_v4())
    .bind(bucket_id)
    .bind(key)
    .bind(file_id)
    .bind(delete_marker)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await?;
    Ok(version)
}

/// Per-key version history: creation, delete markers, resolution, listing
/// and tags.
#[derive(Clone)]
pub struct VersionService {
    inner: Arc<EngineInner>,
}

impl VersionService {
    pub(crate) fn new(inner: Arc<EngineInner>) -> Self {
        Self { inner }
    }

    /// Stream content into a new head version for `key`.
    ///
    /// The bytes land in the bucket's location first, outside any lock;
    /// only the head flip itself runs under the per-key serialization
    /// point. If the metadata step fails the freshly written content is
    /// rolled back out, so no orphan survives.
    pub async fn create_version(
        &self,
        bucket_id: Uuid,
        key: &str,
        stream: ByteStream,
    ) -> Result<ObjectVersion> {
        ensure_key_safe(key)?;
        let bucket = fetch_bucket(&self.inner.db, bucket_id).await?;
        self.inner
            .check_access(Action::BucketUpdate, Some(&bucket), Some(key))?;
        ensure_unlocked(&bucket)?;

        // The content length is unknown until the stream ends, so the
        // quota is enforced as a streaming byte cap instead of an upfront
        // comparison.
        let limit = upload_limit(&bucket);
        if let Some((0, LimitBound::Quota)) = limit {
            return Err(quota_error(&bucket));
        }
        let location = LocationService::new(self.inner.clone())
            .by_id(bucket.location_id)
            .await?;
        let files = FileService::new(self.inner.clone());
        let file = files
            .create_from_stream(&location, stream, limit.map(|(cap, _)| cap))
            .await
            .map_err(|err| match (&err, limit) {
                (Error::SizeLimitExceeded { .. }, Some((_, LimitBound::Quota))) => {
                    quota_error(&bucket)
                }
                _ => err,
            })?;

        let guard = self.inner.key_locks.lock(bucket_id, key).await;
        let result = self.publish_version(&bucket, key, &file).await;
        drop(guard);

        match result {
            Ok(version) => {
                debug!(bucket = %bucket_id, key, version = %version.id, "created version");
                self.inner.events.emit(
                    events::OBJECT_VERSION_CREATED,
                    json!({
                        "bucket_id": bucket_id,
                        "key": key,
                        "version_id": version.id,
                        "size": file.size,
                    }),
                );
                Ok(version)
            }
            Err(err) => {
                // the version never became visible; take the content back out
                let _ = files.remove(file.id).await;
                Err(err)
            }
        }
    }

    async fn publish_version(
        &self,
        bucket: &Bucket,
        key: &str,
        file: &FileInstance,
    ) -> Result<ObjectVersion> {
        let mut tx = self.inner.db.begin().await?;
        // re-read the bucket: its size or lock state may have moved while
        // the bytes were streaming
        let current = fetch_bucket(&mut *tx, bucket.id).await?;
        ensure_unlocked(&current)?;
        if let Some(quota) = current.quota_size
            && current.size + file.size > quota
        {
            return Err(quota_error(&current));
        }
        let version = insert_head(&mut tx, bucket.id, key, Some(file.id), false).await?;
        apply_size_delta(&mut tx, bucket.id, file.size).await?;
        tx.commit().await?;
        Ok(version)
    }

    /// Insert a head version marking the key as logically deleted. The
    /// prior content stays referenced by the history beneath the marker.
    pub async fn create_delete_marker(&self, bucket_id: Uuid, key: &str) -> Result<ObjectVersion> {
        ensure_key_safe(key)?;
        let bucket = fetch_bucket(&self.inner.db, bucket_id).await?;
        self.inner
            .check_access(Action::ObjectDelete, Some(&bucket), Some(key))?;
        ensure_unlocked(&bucket)?;

        let guard = self.inner.key_locks.lock(bucket_id, key).await;
        let result: Result<ObjectVersion> = async {
            let mut tx = self.inner.db.begin().await?;
            match head_of(&mut *tx, bucket_id, key).await? {
                None => return Err(Error::NotFound(format!("object `{key}`"))),
                Some(head) if head.delete_marker => {
                    return Err(Error::NotFound(format!("object `{key}`")));
                }
                Some(_) => {}
            }
            let marker = insert_head(&mut tx, bucket_id, key, None, true).await?;
            tx.commit().await?;
            Ok(marker)
        }
        .await;
        drop(guard);

        let marker = result?;
        self.inner.events.emit(
            events::DELETE_MARKER_CREATED,
            json!({ "bucket_id": bucket_id, "key": key, "version_id": marker.id }),
        );
        Ok(marker)
    }

    /// Remove one version from the chain.
    ///
    /// If the removed version was head, the next most recent entry (by
    /// creation time, insert order breaking ties) becomes head. With
    /// `permanent` the backing content is removed too, provided no other
    /// version shares it.
    pub async fn delete_version(
        &self,
        bucket_id: Uuid,
        key: &str,
        version_id: Uuid,
        permanent: bool,
    ) -> Result<()> {
        ensure_key_safe(key)?;
        let bucket = fetch_bucket(&self.inner.db, bucket_id).await?;
        self.inner
            .check_access(Action::ObjectDeleteVersion, Some(&bucket), Some(key))?;
        ensure_unlocked(&bucket)?;

        let guard = self.inner.key_locks.lock(bucket_id, key).await;
        let result: Result<ObjectVersion> = async {
            let mut tx = self.inner.db.begin().await?;
            let version = sqlx::query_as::<_, ObjectVersion>(&format!(
                "{SELECT_VERSION} WHERE bucket_id = ? AND key = ? AND id = ?"
            ))
            .bind(bucket_id)
            .bind(key)
            .bind(version_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::NotFound(format!("version `{version_id}`")))?;

            sqlx::query("DELETE FROM object_versions WHERE seq = ?")
                .bind(version.seq)
                .execute(&mut *tx)
                .await?;

            if version.is_head {
                let successor = sqlx::query_as::<_, ObjectVersion>(&format!(
                    "{SELECT_VERSION} WHERE bucket_id = ? AND key = ? \
                     ORDER BY created_at DESC, seq DESC LIMIT 1"
                ))
                .bind(bucket_id)
                .bind(key)
                .fetch_optional(&mut *tx)
                .await?;
                if let Some(next) = successor {
                    sqlx::query("UPDATE object_versions SET is_head = 1 WHERE seq = ?")
                        .bind(next.seq)
                        .execute(&mut *tx)
                        .await?;
                }
            }

            if let Some(file_id) = version.file_id {
                let size = fetch_file(&mut *tx, file_id).await?.size;
                apply_size_delta(&mut tx, bucket_id, -size).await?;
            }
            tx.commit().await?;
            Ok(version)
        }
        .await;
        drop(guard);
        let version = result?;

        if permanent && let Some(file_id) = version.file_id {
            match FileService::new(self.inner.clone()).remove(file_id).await {
                Ok(()) => {}
                // other versions still share the content; leave it
                Err(Error::FileReferenced { .. }) => {}
                Err(err) => return Err(err),
            }
        }

        self.inner.events.emit(
            events::OBJECT_VERSION_DELETED,
            json!({
                "bucket_id": bucket_id,
                "key": key,
                "version_id": version_id,
                "permanent": permanent,
            }),
        );
        Ok(())
    }

    /// Resolve a version: the current head when `version_id` is omitted.
    ///
    /// A resolved delete-marker head is returned as a value; callers
    /// inspect `delete_marker` to learn the key is logically deleted.
    pub async fn resolve(
        &self,
        bucket_id: Uuid,
        key: &str,
        version_id: Option<Uuid>,
    ) -> Result<ObjectVersion> {
        ensure_key_safe(key)?;
        let bucket = fetch_bucket(&self.inner.db, bucket_id).await?;
        let action = match version_id {
            Some(_) => Action::ObjectReadVersion,
            None => Action::ObjectRead,
        };
        self.inner.check_access(action, Some(&bucket), Some(key))?;

        match version_id {
            None => head_of(&self.inner.db, bucket_id, key)
                .await?
                .ok_or_else(|| Error::NotFound(format!("object `{key}`"))),
            Some(id) => sqlx::query_as::<_, ObjectVersion>(&format!(
                "{SELECT_VERSION} WHERE bucket_id = ? AND key = ? AND id = ?"
            ))
            .bind(bucket_id)
            .bind(key)
            .bind(id)
            .fetch_optional(&self.inner.db)
            .await?
            .ok_or_else(|| Error::NotFound(format!("version `{id}`"))),
        }
    }

    /// Resolve a version and open its content for reading.
    ///
    /// Delete markers have no content and report the object as absent.
    pub async fn download(
        &self,
        bucket_id: Uuid,
        key: &str,
        version_id: Option<Uuid>,
    ) -> Result<(ObjectVersion, FileInstance, ByteStream)> {
        let version = self.resolve(bucket_id, key, version_id).await?;
        let file_id = match (version.delete_marker, version.file_id) {
            (false, Some(file_id)) => file_id,
            _ => return Err(Error::NotFound(format!("object `{key}`"))),
        };
        let files = FileService::new(self.inner.clone());
        let file = files.get(file_id).await?;
        let stream = files.open(&file, None).await?;
        Ok((version, file, stream))
    }

    /// List current heads in a bucket, excluding delete markers.
    ///
    /// Supports prefix filtering, continuation tokens and lexicographic
    /// ordering; `max_keys` is clamped to 1..=1000.
    pub async fn list(&self, bucket_id: Uuid, params: ListParams) -> Result<ListResult> {
        let bucket = fetch_bucket(&self.inner.db, bucket_id).await?;
        self.inner
            .check_access(Action::BucketRead, Some(&bucket), None)?;

        let max_keys = params.max_keys.clamp(1, 1000);
        let fetch_limit = max_keys + 1;

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "{SELECT_VERSION} WHERE is_head = 1 AND delete_marker = 0 AND bucket_id = "
        ));
        builder.push_bind(bucket_id);
        if let Some(prefix) = &params.prefix {
            builder.push(" AND key LIKE ");
            builder.push_bind(format!("{prefix}%"));
        }
        if let Some(token) = &params.continuation_token {
            builder.push(" AND key > ");
            builder.push_bind(token);
        }
        builder.push(" ORDER BY key ASC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut rows: Vec<ObjectVersion> =
            builder.build_query_as().fetch_all(&self.inner.db).await?;

        let mut is_truncated = false;
        let mut next_continuation_token = None;
        if rows.len() == fetch_limit {
            if let Some(last) = rows.pop() {
                next_continuation_token = Some(last.key.clone());
            }
            is_truncated = true;
        }

        let key_count = rows.iter().map(|v| &v.key).collect::<BTreeSet<_>>().len();
        Ok(ListResult {
            versions: rows,
            is_truncated,
            next_continuation_token,
            key_count,
        })
    }

    /// Full history for one key, newest first.
    pub async fn list_versions(&self, bucket_id: Uuid, key: &str) -> Result<Vec<ObjectVersion>> {
        ensure_key_safe(key)?;
        let bucket = fetch_bucket(&self.inner.db, bucket_id).await?;
        self.inner
            .check_access(Action::BucketReadVersions, Some(&bucket), Some(key))?;
        Ok(sqlx::query_as::<_, ObjectVersion>(&format!(
            "{SELECT_VERSION} WHERE bucket_id = ? AND key = ? ORDER BY created_at DESC, seq DESC"
        ))
        .bind(bucket_id)
        .bind(key)
        .fetch_all(&self.inner.db)
        .await?)
    }

    /// Attach or overwrite a tag on a version.
    pub async fn set_tag(&self, version_id: Uuid, key: &str, value: &str) -> Result<()> {
        let version = self.by_id(version_id).await?;
        let bucket = fetch_bucket(&self.inner.db, version.bucket_id).await?;
        self.inner
            .check_access(Action::BucketUpdate, Some(&bucket), Some(&version.key))?;
        ensure_unlocked(&bucket)?;
        sqlx::query(
            "INSERT INTO object_version_tags (version_id, key, value) VALUES (?, ?, ?)
             ON CONFLICT(version_id, key) DO UPDATE SET value = excluded.value",
        )
        .bind(version_id)
        .bind(key)
        .bind(value)
        .execute(&self.inner.db)
        .await?;
        Ok(())
    }

    pub async fn delete_tag(&self, version_id: Uuid, key: &str) -> Result<()> {
        let version = self.by_id(version_id).await?;
        let bucket = fetch_bucket(&self.inner.db, version.bucket_id).await?;
        self.inner
            .check_access(Action::BucketUpdate, Some(&bucket), Some(&version.key))?;
        ensure_unlocked(&bucket)?;
        let deleted =
            sqlx::query("DELETE FROM object_version_tags WHERE version_id = ? AND key = ?")
                .bind(version_id)
                .bind(key)
                .execute(&self.inner.db)
                .await?;
        if deleted.rows_affected() == 0 {
            return Err(Error::NotFound(format!("tag `{key}`")));
        }
        Ok(())
    }

    pub async fn tags(&self, version_id: Uuid) -> Result<Vec<ObjectVersionTag>> {
        let version = self.by_id(version_id).await?;
        let bucket = fetch_bucket(&self.inner.db, version.bucket_id).await?;
        self.inner
            .check_access(Action::ObjectRead, Some(&bucket), Some(&version.key))?;
        Ok(sqlx::query_as::<_, ObjectVersionTag>(
            "SELECT version_id, key, value FROM object_version_tags WHERE version_id = ? \
             ORDER BY key ASC",
        )
        .bind(version_id)
        .fetch_all(&self.inner.db)
        .await?)
    }

    async fn by_id(&self, version_id: Uuid) -> Result<ObjectVersion> {
        sqlx::query_as::<_, ObjectVersion>(&format!("{SELECT_VERSION} WHERE id = ?"))
            .bind(version_id)
            .fetch_optional(&self.inner.db)
            .await?
            .ok_or_else(|| Error::NotFound(format!("version `{version_id}`")))
    }
}

async fn head_of<'e, E>(executor: E, bucket_id: Uuid, key: &str) -> Result<Option<ObjectVersion>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    Ok(sqlx::query_as::<_, ObjectVersion>(&format!(
        "{SELECT_VERSION} WHERE bucket_id = ? AND key = ? AND is_head = 1"
    ))
    .bind(bucket_id)
    .bind(key)
    .fetch_optional(executor)
    .await?)
}
