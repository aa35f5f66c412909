//! Bucket lifecycle, quota accounting and locking.

use crate::access::Action;
use crate::engine::EngineInner;
use crate::errors::{Error, Result};
use crate::models::{Bucket, BucketTag};
use crate::services::LocationService;
use chrono::Utc;
use sqlx::SqliteConnection;
use std::sync::Arc;
use uuid::Uuid;

const SELECT_BUCKET: &str = "SELECT id, location_id, size, quota_size, max_file_size, locked, \
     created_at, updated_at FROM buckets";

/// Which bound produced a streaming size limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LimitBound {
    Quota,
    MaxFileSize,
}

/// The tightest per-upload byte cap for a bucket, with the bound that
/// produced it, or `None` when the bucket is unlimited.
pub(crate) fn upload_limit(bucket: &Bucket) -> Option<(u64, LimitBound)> {
    let quota = bucket
        .quota_left()
        .map(|left| (left as u64, LimitBound::Quota));
    let max_file = bucket
        .max_file_size
        .map(|cap| (cap.max(0) as u64, LimitBound::MaxFileSize));
    match (quota, max_file) {
        (Some(q), Some(m)) => Some(if m.0 <= q.0 { m } else { q }),
        (Some(q), None) => Some(q),
        (None, Some(m)) => Some(m),
        (None, None) => None,
    }
}

pub(crate) fn ensure_unlocked(bucket: &Bucket) -> Result<()> {
    if bucket.locked {
        Err(Error::BucketLocked(bucket.id))
    } else {
        Ok(())
    }
}

pub(crate) fn quota_error(bucket: &Bucket) -> Error {
    Error::QuotaExceeded {
        bucket: bucket.id,
        limit: bucket.quota_size.unwrap_or(0),
    }
}

/// Fetch a bucket row through any executor, so callers inside transactions
/// see their own uncommitted state.
pub(crate) async fn fetch_bucket<'e, E>(executor: E, id: Uuid) -> Result<Bucket>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query_as::<_, Bucket>(&format!("{SELECT_BUCKET} WHERE id = ?"))
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| Error::NotFound(format!("bucket `{id}`")))
}

/// Apply an aggregate-size delta inside the caller's transaction.
pub(crate) async fn apply_size_delta(
    conn: &mut SqliteConnection,
    bucket_id: Uuid,
    delta: i64,
) -> Result<()> {
    sqlx::query("UPDATE buckets SET size = size + ?, updated_at = ? WHERE id = ?")
        .bind(delta)
        .bind(Utc::now())
        .bind(bucket_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Bucket operations.
#[derive(Clone)]
pub struct BucketService {
    inner: Arc<EngineInner>,
}

impl BucketService {
    pub(crate) fn new(inner: Arc<EngineInner>) -> Self {
        Self { inner }
    }

    /// Create a bucket in the named location, or in the process-wide
    /// default location when none is given.
    pub async fn create(&self, location_name: Option<&str>) -> Result<Bucket> {
        self.inner.check_access(Action::BucketUpdate, None, None)?;
        let locations = LocationService::new(self.inner.clone());
        let location = match location_name {
            Some(name) => locations.get(name).await?,
            None => locations.get_default().await?,
        };

        let now = Utc::now();
        let bucket = Bucket {
            id: Uuid::new_v4(),
            location_id: location.id,
            size: 0,
            quota_size: None,
            max_file_size: None,
            locked: false,
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            "INSERT INTO buckets (id, location_id, size, quota_size, max_file_size, locked, \
             created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(bucket.id)
        .bind(bucket.location_id)
        .bind(bucket.size)
        .bind(bucket.quota_size)
        .bind(bucket.max_file_size)
        .bind(bucket.locked)
        .bind(bucket.created_at)
        .bind(bucket.updated_at)
        .execute(&self.inner.db)
        .await?;
        Ok(bucket)
    }

    pub async fn get(&self, id: Uuid) -> Result<Bucket> {
        let bucket = fetch_bucket(&self.inner.db, id).await?;
        self.inner
            .check_access(Action::BucketRead, Some(&bucket), None)?;
        Ok(bucket)
    }

    /// Adjust the quota and per-object caps.
    pub async fn set_limits(
        &self,
        id: Uuid,
        quota_size: Option<i64>,
        max_file_size: Option<i64>,
    ) -> Result<Bucket> {
        let bucket = fetch_bucket(&self.inner.db, id).await?;
        self.inner
            .check_access(Action::BucketUpdate, Some(&bucket), None)?;
        ensure_unlocked(&bucket)?;
        sqlx::query(
            "UPDATE buckets SET quota_size = ?, max_file_size = ?, updated_at = ? WHERE id = ?",
        )
        .bind(quota_size)
        .bind(max_file_size)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.inner.db)
        .await?;
        fetch_bucket(&self.inner.db, id).await
    }

    /// Block every mutating operation on the bucket.
    pub async fn lock(&self, id: Uuid) -> Result<Bucket> {
        self.set_locked(id, true).await
    }

    pub async fn unlock(&self, id: Uuid) -> Result<Bucket> {
        self.set_locked(id, false).await
    }

    async fn set_locked(&self, id: Uuid, locked: bool) -> Result<Bucket> {
        let bucket = fetch_bucket(&self.inner.db, id).await?;
        self.inner
            .check_access(Action::BucketUpdate, Some(&bucket), None)?;
        sqlx::query("UPDATE buckets SET locked = ?, updated_at = ? WHERE id = ?")
            .bind(locked)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.inner.db)
            .await?;
        fetch_bucket(&self.inner.db, id).await
    }

    /// Attach or overwrite a string tag on the bucket.
    pub async fn set_tag(&self, id: Uuid, key: &str, value: &str) -> Result<()> {
        let bucket = fetch_bucket(&self.inner.db, id).await?;
        self.inner
            .check_access(Action::BucketUpdate, Some(&bucket), None)?;
        ensure_unlocked(&bucket)?;
        sqlx::query(
            "INSERT INTO bucket_tags (bucket_id, key, value) VALUES (?, ?, ?)
             ON CONFLICT(bucket_id, key) DO UPDATE SET value = excluded.value",
        )
        .bind(id)
        .bind(key)
        .bind(value)
        .execute(&self.inner.db)
        .await?;
        Ok(())
    }

    pub async fn delete_tag(&self, id: Uuid, key: &str) -> Result<()> {
        let bucket = fetch_bucket(&self.inner.db, id).await?;
        self.inner
            .check_access(Action::BucketUpdate, Some(&bucket), None)?;
        ensure_unlocked(&bucket)?;
        let deleted = sqlx::query("DELETE FROM bucket_tags WHERE bucket_id = ? AND key = ?")
            .bind(id)
            .bind(key)
            .execute(&self.inner.db)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(Error::NotFound(format!("tag `{key}`")));
        }
        Ok(())
    }

    pub async fn tags(&self, id: Uuid) -> Result<Vec<BucketTag>> {
        let bucket = fetch_bucket(&self.inner.db, id).await?;
        self.inner
            .check_access(Action::BucketRead, Some(&bucket), None)?;
        Ok(sqlx::query_as::<_, BucketTag>(
            "SELECT bucket_id, key, value FROM bucket_tags WHERE bucket_id = ? ORDER BY key ASC",
        )
        .bind(id)
        .fetch_all(&self.inner.db)
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket_with(size: i64, quota: Option<i64>, max_file: Option<i64>) -> Bucket {
        let now = Utc::now();
        Bucket {
            id: Uuid::new_v4(),
            location_id: Uuid::new_v4(),
            size,
            quota_size: quota,
            max_file_size: max_file,
            locked: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn upload_limit_picks_the_tightest_bound() {
        assert_eq!(upload_limit(&bucket_with(0, None, None)), None);
        assert_eq!(
            upload_limit(&bucket_with(40, Some(100), None)),
            Some((60, LimitBound::Quota))
        );
        assert_eq!(
            upload_limit(&bucket_with(0, None, Some(25))),
            Some((25, LimitBound::MaxFileSize))
        );
        assert_eq!(
            upload_limit(&bucket_with(90, Some(100), Some(25))),
            Some((10, LimitBound::Quota))
        );
        assert_eq!(
            upload_limit(&bucket_with(0, Some(100), Some(25))),
            Some((25, LimitBound::MaxFileSize))
        );
    }

    #[test]
    fn exhausted_quota_reports_zero_left() {
        assert_eq!(
            upload_limit(&bucket_with(120, Some(100), None)),
            Some((0, LimitBound::Quota))
        );
    }
}
