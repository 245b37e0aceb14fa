//! Fetch log: the durable work queue of object-storage keys
//!
//! One row per key. `completed_datetime IS NULL` means the key still has to
//! be loaded. Ingress revives rows by clearing that column; loaders claim
//! pending rows and complete them after a successful load.
//!
//! Claims are at-least-once. A loader that dies between applying a file and
//! completing its row leaves the row pending, and the next drain loads it
//! again, so every loader must be idempotent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;

pub mod memory;
pub mod postgres;

pub use memory::MemoryFetchLogStore;
pub use postgres::PgFetchLogStore;

/// Status text written when a claim is taken.
pub const MESSAGE_CLAIMED: &str = "load_data";

/// Status text written when a loader completes a row.
pub const MESSAGE_SUCCESS: &str = "success";

/// Default claim lease; matches the serverless function timeout.
pub const DEFAULT_CLAIM_LEASE_SECS: u64 = 900;

/// Case-insensitive substring match, the in-process form of `key ~* pattern`.
pub fn pattern_matches(pattern: &str, key: &str) -> bool {
    key.to_lowercase().contains(&pattern.to_lowercase())
}

/// A fetch log row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct FetchLogEntry {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    pub completed_datetime: Option<DateTime<Utc>>,
    /// When the row was last claimed by a loader
    pub loaded_datetime: Option<DateTime<Utc>>,
    pub last_message: Option<String>,
}

impl FetchLogEntry {
    pub fn is_pending(&self) -> bool {
        self.completed_datetime.is_none()
    }
}

/// Storage contract for the fetch log.
///
/// Implementations must make `upsert_pending` and `claim_batch` atomic with
/// respect to concurrent invocations; the ingest core holds no in-process
/// locks of its own.
#[async_trait]
pub trait FetchLogStore: Send + Sync {
    /// Insert a pending row, or on key conflict update `last_modified` and
    /// clear `completed_datetime`.
    async fn upsert_pending(&self, key: &str, last_modified: DateTime<Utc>) -> Result<FetchLogEntry>;

    /// Count pending rows whose key matches `pattern` (case-insensitive).
    async fn count_pending(&self, pattern: &str) -> Result<u64>;

    /// Claim up to `limit` pending, unleased rows matching `pattern`,
    /// ordered by `last_modified` oldest-first when `ascending`.
    async fn claim_batch(
        &self,
        pattern: &str,
        limit: u32,
        ascending: bool,
    ) -> Result<Vec<FetchLogEntry>>;

    /// Complete claimed rows.
    ///
    /// A row is only completed if its `last_modified` still equals the value
    /// seen at claim time, so a notification that revived the key while it
    /// was loading is not lost. Returns the number of rows completed.
    async fn mark_completed(&self, entries: &[FetchLogEntry], message: &str) -> Result<u64>;

    /// Record a retryable failure; the row stays pending.
    async fn mark_failed(&self, key: &str, message: &str) -> Result<()>;

    /// Record a permanent failure and complete the claimed row so it is not
    /// retried.
    ///
    /// Guarded like [`FetchLogStore::mark_completed`]: a row revived since the
    /// claim stays pending. Returns whether the row was completed.
    async fn mark_rejected(&self, entry: &FetchLogEntry, message: &str) -> Result<bool>;

    /// Register keys discovered by a bucket crawl. New keys are pending;
    /// existing rows get the new `last_modified` but keep their completion
    /// state. Returns the number of rows written.
    async fn register_existing(&self, objects: &[(String, DateTime<Utc>)]) -> Result<u64>;
}
