//! Test doubles for the ingest integration tests
//!
//! - [`ScriptedLoader`]: returns a fixed sequence of results and records calls
//! - [`MemoryObjects`]: in-process bucket contents with injectable failures
//! - [`RecordingSink`]: captures applied payloads, rejects on demand
//! - [`FlakyStore`]: wraps the in-memory fetch log and fails selected calls

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aq_ingest::category::Category;
use aq_ingest::error::{IngestError, Result};
use aq_ingest::fetchlog::{FetchLogEntry, FetchLogStore, MemoryFetchLogStore};
use aq_ingest::loader::{Loader, RecordSink};
use aq_ingest::storage::{ObjectHead, ObjectStore};

pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

/// Upsert `count` pending keys built from `prefix`.
pub async fn seed(store: &dyn FetchLogStore, prefix: &str, count: usize) {
    for i in 0..count {
        store
            .upsert_pending(&format!("{prefix}/{i}.csv.gz"), at(i as i64))
            .await
            .unwrap();
    }
}

// ============================================================================
// Loaders
// ============================================================================

#[derive(Debug, Clone)]
pub enum Step {
    Load(u64),
    Fail(&'static str),
}

/// Shared record of which category's loader ran, in call order
pub type CallLog = Arc<Mutex<Vec<Category>>>;

pub struct ScriptedLoader {
    category: Category,
    steps: Mutex<Vec<Step>>,
    /// Used once the script runs out
    fallback: Step,
    /// Virtual time each call takes (requires paused time)
    cost: Option<Duration>,
    calls: Mutex<Vec<(u32, bool)>>,
    log: Option<CallLog>,
}

impl ScriptedLoader {
    pub fn new(category: Category, steps: Vec<Step>) -> Self {
        Self {
            category,
            steps: Mutex::new(steps.into_iter().rev().collect()),
            fallback: Step::Load(0),
            cost: None,
            calls: Mutex::new(Vec::new()),
            log: None,
        }
    }

    /// Every call returns `n`.
    pub fn constant(category: Category, n: u64) -> Self {
        let mut loader = Self::new(category, Vec::new());
        loader.fallback = Step::Load(n);
        loader
    }

    pub fn with_cost(mut self, cost: Duration) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn calls(&self) -> Vec<(u32, bool)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Loader for ScriptedLoader {
    async fn load(&self, limit: u32, ascending: bool) -> Result<u64> {
        self.calls.lock().unwrap().push((limit, ascending));
        if let Some(log) = &self.log {
            log.lock().unwrap().push(self.category);
        }
        if let Some(cost) = self.cost {
            tokio::time::advance(cost).await;
        }

        let step = self.steps.lock().unwrap().pop().unwrap_or_else(|| self.fallback.clone());
        match step {
            Step::Load(n) => Ok(n),
            Step::Fail(message) => Err(IngestError::Storage(message.to_string())),
        }
    }
}

// ============================================================================
// Object store
// ============================================================================

#[derive(Default)]
pub struct MemoryObjects {
    objects: Mutex<HashMap<(String, String), (Vec<u8>, DateTime<Utc>)>>,
    failing_lookups: bool,
    failing_gets: Mutex<HashSet<String>>,
    gets: Mutex<Vec<(String, String)>>,
}

impl MemoryObjects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `head` call errors.
    pub fn with_failing_lookups() -> Self {
        Self {
            failing_lookups: true,
            ..Self::default()
        }
    }

    pub fn put(&self, bucket: &str, key: &str, body: &[u8], modified: DateTime<Utc>) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), (body.to_vec(), modified));
    }

    /// `get` on this key fails with a transient storage error.
    pub fn fail_get(&self, key: &str) {
        self.failing_gets.lock().unwrap().insert(key.to_string());
    }

    pub fn gets(&self) -> Vec<(String, String)> {
        self.gets.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjects {
    async fn head(&self, bucket: &str, key: &str) -> Result<Option<ObjectHead>> {
        if self.failing_lookups {
            return Err(IngestError::Storage("ListObjectsV2 access denied".to_string()));
        }
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|(body, modified)| ObjectHead {
                key: key.to_string(),
                last_modified: Some(*modified),
                size: body.len() as i64,
            }))
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.gets
            .lock()
            .unwrap()
            .push((bucket.to_string(), key.to_string()));
        if self.failing_gets.lock().unwrap().contains(key) {
            return Err(IngestError::Storage("connection reset".to_string()));
        }
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|(body, _)| body.clone())
            .ok_or_else(|| IngestError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectHead>> {
        let objects = self.objects.lock().unwrap();
        let mut listed: Vec<ObjectHead> = objects
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .map(|((_, k), (body, modified))| ObjectHead {
                key: k.clone(),
                last_modified: Some(*modified),
                size: body.len() as i64,
            })
            .collect();
        listed.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(listed)
    }
}

// ============================================================================
// Sink
// ============================================================================

#[derive(Default)]
pub struct RecordingSink {
    applied: Mutex<Vec<(Category, String, Vec<u8>)>>,
    /// Payloads containing this marker are rejected
    reject_marker: Option<&'static str>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(marker: &'static str) -> Self {
        Self {
            reject_marker: Some(marker),
            ..Self::default()
        }
    }

    pub fn applied(&self) -> Vec<(Category, String, Vec<u8>)> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordSink for RecordingSink {
    async fn apply(&self, category: Category, key: &str, payload: &[u8]) -> Result<u64> {
        if let Some(marker) = self.reject_marker {
            if String::from_utf8_lossy(payload).contains(marker) {
                return Err(IngestError::Sink {
                    key: key.to_string(),
                    message: format!("unparseable record: {marker}"),
                });
            }
        }
        self.applied
            .lock()
            .unwrap()
            .push((category, key.to_string(), payload.to_vec()));
        Ok(String::from_utf8_lossy(payload).lines().count() as u64)
    }
}

// ============================================================================
// Fetch log
// ============================================================================

/// In-memory fetch log with injectable failures
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryFetchLogStore,
    /// `upsert_pending` succeeds this many times, then fails
    pub upserts_before_failure: Option<usize>,
    /// `count_pending` fails for this pattern
    pub failing_count_pattern: Option<&'static str>,
    upserts: Mutex<usize>,
}

impl FlakyStore {
    pub fn failing_upserts_after(n: usize) -> Self {
        Self {
            upserts_before_failure: Some(n),
            ..Self::default()
        }
    }

    pub fn failing_count(pattern: &'static str) -> Self {
        Self {
            failing_count_pattern: Some(pattern),
            ..Self::default()
        }
    }
}

#[async_trait]
impl FetchLogStore for FlakyStore {
    async fn upsert_pending(&self, key: &str, last_modified: DateTime<Utc>) -> Result<FetchLogEntry> {
        {
            let mut upserts = self.upserts.lock().unwrap();
            if self.upserts_before_failure.is_some_and(|limit| *upserts >= limit) {
                return Err(IngestError::Database(sqlx::Error::PoolTimedOut));
            }
            *upserts += 1;
        }
        self.inner.upsert_pending(key, last_modified).await
    }

    async fn count_pending(&self, pattern: &str) -> Result<u64> {
        if self.failing_count_pattern == Some(pattern) {
            return Err(IngestError::Database(sqlx::Error::PoolClosed));
        }
        self.inner.count_pending(pattern).await
    }

    async fn claim_batch(&self, pattern: &str, limit: u32, ascending: bool) -> Result<Vec<FetchLogEntry>> {
        self.inner.claim_batch(pattern, limit, ascending).await
    }

    async fn mark_completed(&self, entries: &[FetchLogEntry], message: &str) -> Result<u64> {
        self.inner.mark_completed(entries, message).await
    }

    async fn mark_failed(&self, key: &str, message: &str) -> Result<()> {
        self.inner.mark_failed(key, message).await
    }

    async fn mark_rejected(&self, entry: &FetchLogEntry, message: &str) -> Result<bool> {
        self.inner.mark_rejected(entry, message).await
    }

    async fn register_existing(&self, objects: &[(String, DateTime<Utc>)]) -> Result<u64> {
        self.inner.register_existing(objects).await
    }
}
