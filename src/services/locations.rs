//! Administrative management of storage locations.

use crate::access::Action;
use crate::engine::EngineInner;
use crate::errors::{Error, Result};
use crate::models::Location;
use crate::services::is_unique_violation;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

const SELECT_LOCATION: &str = "SELECT id, name, uri, is_default, created_at FROM locations";

/// Location lifecycle: creation and default-flag handling.
///
/// Locations are immutable once buckets reference them, except for the
/// default flag, which is flipped transactionally so exactly one location
/// is the default at any time.
#[derive(Clone)]
pub struct LocationService {
    inner: Arc<EngineInner>,
}

impl LocationService {
    pub(crate) fn new(inner: Arc<EngineInner>) -> Self {
        Self { inner }
    }

    /// Create a location. With `default = true` the default flag moves to
    /// the new location in the same transaction.
    pub async fn create(&self, name: &str, uri: &str, default: bool) -> Result<Location> {
        self.inner.check_access(Action::LocationUpdate, None, None)?;
        let location = Location {
            id: Uuid::new_v4(),
            name: name.to_string(),
            uri: uri.trim_end_matches('/').to_string(),
            is_default: default,
            created_at: Utc::now(),
        };

        let mut tx = self.inner.db.begin().await?;
        if default {
            sqlx::query("UPDATE locations SET is_default = 0 WHERE is_default = 1")
                .execute(&mut *tx)
                .await?;
        }
        let inserted = sqlx::query(
            "INSERT INTO locations (id, name, uri, is_default, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(location.id)
        .bind(&location.name)
        .bind(&location.uri)
        .bind(location.is_default)
        .bind(location.created_at)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {
                tx.commit().await?;
                Ok(location)
            }
            Err(err) if is_unique_violation(&err) => {
                Err(Error::AlreadyExists(format!("location `{name}`")))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get(&self, name: &str) -> Result<Location> {
        sqlx::query_as::<_, Location>(&format!("{SELECT_LOCATION} WHERE name = ?"))
            .bind(name)
            .fetch_optional(&self.inner.db)
            .await?
            .ok_or_else(|| Error::NotFound(format!("location `{name}`")))
    }

    /// The process-wide default location.
    pub async fn get_default(&self) -> Result<Location> {
        sqlx::query_as::<_, Location>(&format!("{SELECT_LOCATION} WHERE is_default = 1"))
            .fetch_optional(&self.inner.db)
            .await?
            .ok_or(Error::NoDefaultLocation)
    }

    /// Move the default flag onto an existing location.
    pub async fn set_default(&self, name: &str) -> Result<Location> {
        self.inner.check_access(Action::LocationUpdate, None, None)?;
        let mut tx = self.inner.db.begin().await?;
        sqlx::query("UPDATE locations SET is_default = 0 WHERE is_default = 1")
            .execute(&mut *tx)
            .await?;
        let updated = sqlx::query("UPDATE locations SET is_default = 1 WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(Error::NotFound(format!("location `{name}`")));
        }
        tx.commit().await?;
        self.get(name).await
    }

    pub async fn list(&self) -> Result<Vec<Location>> {
        Ok(
            sqlx::query_as::<_, Location>(&format!("{SELECT_LOCATION} ORDER BY name ASC"))
                .fetch_all(&self.inner.db)
                .await?,
        )
    }

    pub(crate) async fn by_id(&self, id: Uuid) -> Result<Location> {
        sqlx::query_as::<_, Location>(&format!("{SELECT_LOCATION} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.inner.db)
            .await?
            .ok_or_else(|| Error::NotFound(format!("location `{id}`")))
    }
}
