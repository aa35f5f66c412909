//! Engine façade.
//!
//! Wires the persistence pool, configuration, backend registry and the
//! injected collaborators together, and hands out the per-area services.
//! The engine is a passive library: it holds no scheduler loop and every
//! operation runs on the caller's task.

use crate::access::{AccessPolicy, Action, AllowAll};
use crate::config::EngineConfig;
use crate::errors::{Error, Result};
use crate::hooks::{EventHook, NullHook};
use crate::models::Bucket;
use crate::services::{
    BucketService, FileService, IntegrityService, LocationService, MultipartService,
    VersionService,
};
use crate::storage::{BackendRegistry, StorageBackend};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

const MIGRATION_SQL: &str = include_str!("../migrations/0001_init.sql");

/// Apply the embedded schema statements to a fresh or existing database.
pub async fn run_migrations(db: &SqlitePool) -> Result<()> {
    let statements = MIGRATION_SQL
        .split(';')
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty());
    for stmt in statements {
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(())
}

/// Per-(bucket, key) serialization points for head transitions.
///
/// A guard is held only across the metadata transaction of a head flip,
/// never across a byte-streaming phase.
#[derive(Default)]
pub(crate) struct KeyLocks {
    inner: Mutex<HashMap<(Uuid, String), Arc<Mutex<()>>>>,
}

impl KeyLocks {
    pub(crate) async fn lock(&self, bucket_id: Uuid, key: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut map = self.inner.lock().await;
            map.entry((bucket_id, key.to_string()))
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        entry.lock_owned().await
    }
}

pub(crate) struct EngineInner {
    pub(crate) db: SqlitePool,
    pub(crate) config: EngineConfig,
    pub(crate) backends: BackendRegistry,
    pub(crate) events: Arc<dyn EventHook>,
    pub(crate) access: Arc<dyn AccessPolicy>,
    pub(crate) key_locks: KeyLocks,
}

impl EngineInner {
    /// Consult the injected policy; denial short-circuits before any side
    /// effect.
    pub(crate) fn check_access(
        &self,
        action: Action,
        bucket: Option<&Bucket>,
        key: Option<&str>,
    ) -> Result<()> {
        if self.access.allow(action, bucket, key) {
            Ok(())
        } else {
            Err(Error::PermissionDenied {
                action: action.as_str(),
            })
        }
    }
}

/// Builder for [`Engine`] collaborators.
pub struct EngineBuilder {
    db: SqlitePool,
    config: EngineConfig,
    backends: BackendRegistry,
    events: Arc<dyn EventHook>,
    access: Arc<dyn AccessPolicy>,
}

impl EngineBuilder {
    pub fn new(db: SqlitePool, config: EngineConfig) -> Self {
        Self {
            db,
            config,
            backends: BackendRegistry::new(),
            events: Arc::new(NullHook),
            access: Arc::new(AllowAll),
        }
    }

    /// Install an event listener hook.
    pub fn events(mut self, hook: Arc<dyn EventHook>) -> Self {
        self.events = hook;
        self
    }

    /// Install a permission evaluator.
    pub fn access(mut self, policy: Arc<dyn AccessPolicy>) -> Self {
        self.access = policy;
        self
    }

    /// Register an extra storage backend under a URI scheme.
    pub fn backend(mut self, scheme: impl Into<String>, backend: Arc<dyn StorageBackend>) -> Self {
        self.backends.register(scheme, backend);
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            inner: Arc::new(EngineInner {
                db: self.db,
                config: self.config,
                backends: self.backends,
                events: self.events,
                access: self.access,
                key_locks: KeyLocks::default(),
            }),
        }
    }
}

/// Entry point to the storage engine.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// An engine with default collaborators (filesystem backend only,
    /// allow-all policy, silent events).
    pub fn new(db: SqlitePool, config: EngineConfig) -> Self {
        EngineBuilder::new(db, config).build()
    }

    pub fn builder(db: SqlitePool, config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(db, config)
    }

    pub fn db(&self) -> &SqlitePool {
        &self.inner.db
    }

    pub fn locations(&self) -> LocationService {
        LocationService::new(self.inner.clone())
    }

    pub fn buckets(&self) -> BucketService {
        BucketService::new(self.inner.clone())
    }

    pub fn files(&self) -> FileService {
        FileService::new(self.inner.clone())
    }

    pub fn versions(&self) -> VersionService {
        VersionService::new(self.inner.clone())
    }

    pub fn multipart(&self) -> MultipartService {
        MultipartService::new(self.inner.clone())
    }

    pub fn integrity(&self) -> IntegrityService {
        IntegrityService::new(self.inner.clone())
    }
}
