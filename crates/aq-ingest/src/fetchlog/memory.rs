//! In-process fetch log
//!
//! Same semantics as [`super::PgFetchLogStore`], held in a mutex-guarded map.
//! Used by the test suites and for dry runs against a local bucket.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{pattern_matches, FetchLogEntry, FetchLogStore, DEFAULT_CLAIM_LEASE_SECS, MESSAGE_CLAIMED};
use crate::error::Result;

pub struct MemoryFetchLogStore {
    rows: Mutex<BTreeMap<String, FetchLogEntry>>,
    lease: Duration,
}

impl Default for MemoryFetchLogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFetchLogStore {
    pub fn new() -> Self {
        Self::with_lease(Duration::from_secs(DEFAULT_CLAIM_LEASE_SECS))
    }

    pub fn with_lease(lease: Duration) -> Self {
        Self {
            rows: Mutex::new(BTreeMap::new()),
            lease,
        }
    }

    /// Snapshot of a single row
    pub fn get(&self, key: &str) -> Option<FetchLogEntry> {
        self.rows().get(key).cloned()
    }

    /// Snapshot of every row, ordered by key
    pub fn entries(&self) -> Vec<FetchLogEntry> {
        self.rows().values().cloned().collect()
    }

    fn rows(&self) -> MutexGuard<'_, BTreeMap<String, FetchLogEntry>> {
        // A panic while holding the lock cannot leave a row half-written.
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_claimable(&self, entry: &FetchLogEntry, now: DateTime<Utc>) -> bool {
        if !entry.is_pending() {
            return false;
        }
        match entry.loaded_datetime {
            None => true,
            Some(claimed_at) => (now - claimed_at)
                .to_std()
                .map(|age| age >= self.lease)
                .unwrap_or(false),
        }
    }
}


#[async_trait]
impl FetchLogStore for MemoryFetchLogStore {
    async fn upsert_pending(&self, key: &str, last_modified: DateTime<Utc>) -> Result<FetchLogEntry> {
        let mut rows = self.rows();
        let entry = rows
            .entry(key.to_string())
            .and_modify(|row| {
                row.last_modified = last_modified;
                row.completed_datetime = None;
                row.loaded_datetime = None;
            })
            .or_insert_with(|| FetchLogEntry {
                key: key.to_string(),
                last_modified,
                completed_datetime: None,
                loaded_datetime: None,
                last_message: None,
            });
        Ok(entry.clone())
    }

    async fn count_pending(&self, pattern: &str) -> Result<u64> {
        let count = self
            .rows()
            .values()
            .filter(|row| row.is_pending() && pattern_matches(pattern, &row.key))
            .count();
        Ok(count as u64)
    }

    async fn claim_batch(
        &self,
        pattern: &str,
        limit: u32,
        ascending: bool,
    ) -> Result<Vec<FetchLogEntry>> {
        let now = Utc::now();
        let mut rows = self.rows();

        let mut candidates: Vec<(DateTime<Utc>, String)> = rows
            .values()
            .filter(|row| pattern_matches(pattern, &row.key) && self.is_claimable(row, now))
            .map(|row| (row.last_modified, row.key.clone()))
            .collect();
        candidates.sort();
        if !ascending {
            candidates.reverse();
        }

        let mut claimed = Vec::new();
        for (_, key) in candidates.into_iter().take(limit as usize) {
            if let Some(row) = rows.get_mut(&key) {
                row.loaded_datetime = Some(now);
                row.last_message = Some(MESSAGE_CLAIMED.to_string());
                claimed.push(row.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_completed(&self, entries: &[FetchLogEntry], message: &str) -> Result<u64> {
        let now = Utc::now();
        let mut rows = self.rows();
        let mut completed = 0;

        for seen in entries {
            if let Some(row) = rows.get_mut(&seen.key) {
                if row.is_pending() && row.last_modified == seen.last_modified {
                    row.completed_datetime = Some(now);
                    row.last_message = Some(message.to_string());
                    completed += 1;
                }
            }
        }
        Ok(completed)
    }

    async fn mark_failed(&self, key: &str, message: &str) -> Result<()> {
        if let Some(row) = self.rows().get_mut(key) {
            row.last_message = Some(message.to_string());
        }
        Ok(())
    }

    async fn mark_rejected(&self, entry: &FetchLogEntry, message: &str) -> Result<bool> {
        match self.rows().get_mut(&entry.key) {
            Some(row) if row.is_pending() && row.last_modified == entry.last_modified => {
                row.completed_datetime = Some(Utc::now());
                row.last_message = Some(message.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn register_existing(&self, objects: &[(String, DateTime<Utc>)]) -> Result<u64> {
        let mut rows = self.rows();
        for (key, last_modified) in objects {
            rows.entry(key.clone())
                .and_modify(|row| row.last_modified = *last_modified)
                .or_insert_with(|| FetchLogEntry {
                    key: key.clone(),
                    last_modified: *last_modified,
                    completed_datetime: None,
                    loaded_datetime: None,
                    last_message: None,
                });
        }
        Ok(objects.len() as u64)
    }
}
