//! Fixity checking and migration job bodies.
//!
//! These are plain async functions, safe to invoke directly in tests; an
//! external task runner only defers them. Sweeps are idempotent: a
//! re-verified file just refreshes its `last_check` bookkeeping, so a
//! retried or duplicated job is harmless.

use crate::engine::EngineInner;
use crate::errors::Result;
use crate::hooks::TaskRunner;
use crate::models::FileInstance;
use crate::services::files::FileService;
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Outcome of one checksum sweep batch.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Files re-verified in this batch.
    pub checked: usize,
    /// Files whose digest still matched.
    pub passed: usize,
    /// Files flagged unreadable by this sweep.
    pub failed: Vec<Uuid>,
}

/// Periodic and ad-hoc re-verification of stored content.
#[derive(Clone)]
pub struct IntegrityService {
    inner: Arc<EngineInner>,
}

impl IntegrityService {
    pub(crate) fn new(inner: Arc<EngineInner>) -> Self {
        Self { inner }
    }

    /// Re-verify one file. Job body for the `verify_file` task.
    pub async fn verify_file(&self, file_id: Uuid) -> Result<bool> {
        FileService::new(self.inner.clone()).verify(file_id).await
    }

    /// Re-verify up to `batch` readable files not checked within
    /// `max_age`, never-checked files first.
    pub async fn checksum_sweep(&self, max_age: Duration, batch: usize) -> Result<SweepReport> {
        let files = FileService::new(self.inner.clone());
        let mut report = SweepReport::default();
        for file in self.due_files(max_age, batch).await? {
            report.checked += 1;
            if files.verify(file.id).await? {
                report.passed += 1;
            } else {
                report.failed.push(file.id);
            }
        }
        info!(
            checked = report.checked,
            failed = report.failed.len(),
            "checksum sweep finished"
        );
        Ok(report)
    }

    /// Submit one `verify_file` job per due file instead of sweeping
    /// inline. Returns the number of jobs submitted.
    pub async fn enqueue_due(
        &self,
        runner: &dyn TaskRunner,
        max_age: Duration,
        batch: usize,
    ) -> Result<usize> {
        let due = self.due_files(max_age, batch).await?;
        for file in &due {
            runner.submit("verify_file", json!({ "file_id": file.id }));
        }
        Ok(due.len())
    }

    /// Move one file to another location. Job body for the `migrate_file`
    /// task; repeatable, since a failed run leaves no destination state.
    pub async fn migrate_file(
        &self,
        file_id: Uuid,
        location: &str,
        post_fixity_check: bool,
    ) -> Result<FileInstance> {
        FileService::new(self.inner.clone())
            .migrate(file_id, location, post_fixity_check)
            .await
    }

    async fn due_files(&self, max_age: Duration, batch: usize) -> Result<Vec<FileInstance>> {
        let cutoff = Utc::now() - max_age;
        Ok(sqlx::query_as::<_, FileInstance>(
            "SELECT id, uri, size, checksum, readable, writable, last_check, last_check_at, \
             created_at, updated_at FROM file_instances \
             WHERE readable = 1 AND checksum IS NOT NULL \
               AND (last_check_at IS NULL OR last_check_at < ?) \
             ORDER BY last_check_at ASC LIMIT ?",
        )
        .bind(cutoff)
        .bind(batch as i64)
        .fetch_all(&self.inner.db)
        .await?)
    }
}
