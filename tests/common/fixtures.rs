//! Shared test setup: a file-backed SQLite database and a filesystem
//! location inside a scratch directory, so concurrent connections observe
//! each other's commits.

use crate::common::mocks::{FlakyBackend, RecordingHook};
use bytes::Bytes;
use object_store_core::storage::{ByteStream, ChecksumAlgorithm, Hasher};
use object_store_core::{run_migrations, Bucket, Engine, EngineConfig};
use futures::TryStreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub struct TestContext {
    pub engine: Engine,
    pub hook: Arc<RecordingHook>,
    pub root: TempDir,
}

/// Engine with a permissive multipart lower bound so tests can use tiny
/// parts.
pub async fn setup() -> TestContext {
    setup_with(EngineConfig {
        multipart_chunksize_min: 1,
        ..EngineConfig::default()
    })
    .await
}

pub async fn setup_with(config: EngineConfig) -> TestContext {
    let root = tempfile::tempdir().expect("create scratch dir");
    let options = SqliteConnectOptions::new()
        .filename(root.path().join("meta.db"))
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));
    // a single connection sidesteps SQLite write-upgrade contention; the
    // engine never holds a transaction while re-acquiring from the pool
    let db = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("connect metadata db");
    run_migrations(&db).await.expect("run migrations");

    let hook = Arc::new(RecordingHook::default());
    let engine = Engine::builder(db, config)
        .events(hook.clone())
        .backend("flaky", Arc::new(FlakyBackend))
        .build();
    engine
        .locations()
        .create("local", root.path().join("data").to_str().unwrap(), true)
        .await
        .expect("create default location");

    TestContext { engine, hook, root }
}

/// Engine without any location configured.
pub async fn setup_bare() -> TestContext {
    let root = tempfile::tempdir().expect("create scratch dir");
    let options = SqliteConnectOptions::new()
        .filename(root.path().join("meta.db"))
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));
    // a single connection sidesteps SQLite write-upgrade contention; the
    // engine never holds a transaction while re-acquiring from the pool
    let db = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("connect metadata db");
    run_migrations(&db).await.expect("run migrations");

    let hook = Arc::new(RecordingHook::default());
    let engine = Engine::builder(db, EngineConfig::default())
        .events(hook.clone())
        .build();
    TestContext { engine, hook, root }
}

pub async fn bucket(ctx: &TestContext) -> Bucket {
    ctx.engine.buckets().create(None).await.expect("create bucket")
}

pub fn payload(byte: u8, len: usize) -> Bytes {
    Bytes::from(vec![byte; len])
}

pub fn md5_digest(data: &[u8]) -> String {
    let mut hasher = Hasher::new(ChecksumAlgorithm::Md5);
    hasher.update(data);
    hasher.finish()
}

pub async fn collect(stream: ByteStream) -> Vec<u8> {
    stream
        .try_fold(Vec::new(), |mut acc, chunk| async move {
            acc.extend_from_slice(&chunk);
            Ok(acc)
        })
        .await
        .expect("drain stream")
}
