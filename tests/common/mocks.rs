//! Test doubles: a backend that fails mid-save, an event recorder, a
//! job-collecting runner and a deny-everything policy.

use async_trait::async_trait;
use futures::StreamExt;
use object_store_core::storage::{
    ByteStream, ChecksumAlgorithm, ChunkReport, SaveReport, StorageBackend,
};
use object_store_core::{AccessPolicy, Action, Bucket, Error, EventHook, Result, TaskRunner};
use serde_json::Value;
use std::sync::Mutex;

/// Backend whose saves make partial progress and then fail, for
/// exercising migration rollback. Deletes succeed so cleanup paths work.
pub struct FlakyBackend;

#[async_trait]
impl StorageBackend for FlakyBackend {
    async fn initialize(&self, _uri: &str, _size: u64) -> Result<()> {
        Err(Error::StorageUnavailable("flaky backend".into()))
    }

    async fn open(&self, _uri: &str, _range: Option<(u64, u64)>) -> Result<ByteStream> {
        Err(Error::StorageUnavailable("flaky backend".into()))
    }

    async fn save(
        &self,
        _uri: &str,
        mut stream: ByteStream,
        _algorithm: ChecksumAlgorithm,
        _size_limit: Option<u64>,
    ) -> Result<SaveReport> {
        // consume one chunk to simulate a copy failing partway through
        let _ = stream.next().await;
        Err(Error::StorageUnavailable("flaky backend".into()))
    }

    async fn update(
        &self,
        _uri: &str,
        _offset: u64,
        _max_len: u64,
        _stream: ByteStream,
        _algorithm: ChecksumAlgorithm,
    ) -> Result<ChunkReport> {
        Err(Error::StorageUnavailable("flaky backend".into()))
    }

    async fn delete(&self, _uri: &str) -> Result<()> {
        Ok(())
    }

    async fn checksum(&self, _uri: &str, _algorithm: ChecksumAlgorithm) -> Result<String> {
        Err(Error::StorageUnavailable("flaky backend".into()))
    }
}

/// Event hook collecting every emission for later assertions.
#[derive(Default)]
pub struct RecordingHook {
    events: Mutex<Vec<(String, Value)>>,
}

impl RecordingHook {
    pub fn names(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn payloads_of(&self, event: &str) -> Vec<Value> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == event)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

impl EventHook for RecordingHook {
    fn emit(&self, event: &str, payload: Value) {
        self.events.lock().unwrap().push((event.to_string(), payload));
    }
}

/// Task runner collecting submitted jobs instead of running them.
#[derive(Default)]
pub struct RecordingRunner {
    pub jobs: Mutex<Vec<(String, Value)>>,
}

impl TaskRunner for RecordingRunner {
    fn submit(&self, job: &str, payload: Value) {
        self.jobs.lock().unwrap().push((job.to_string(), payload));
    }
}

/// Policy that denies everything.
pub struct DenyAll;

impl AccessPolicy for DenyAll {
    fn allow(&self, _action: Action, _bucket: Option<&Bucket>, _key: Option<&str>) -> bool {
        false
    }
}
