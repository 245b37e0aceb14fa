//! PostgreSQL-backed fetch log
//!
//! Every operation is a single statement, so concurrent ingress and cron
//! invocations coordinate purely through row locks. Claims use
//! `FOR UPDATE SKIP LOCKED` plus a lease on `loaded_datetime`: a row claimed
//! less than `lease` ago is invisible to other drains, and a row whose claimer
//! crashed becomes claimable again once the lease runs out.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{FetchLogEntry, FetchLogStore, DEFAULT_CLAIM_LEASE_SECS, MESSAGE_CLAIMED};
use crate::error::Result;

const RETURNING: &str = "key, last_modified, completed_datetime, loaded_datetime, last_message";

/// Upper bound on rows per bulk statement
const BULK_CHUNK_SIZE: usize = 1000;

#[derive(Clone)]
pub struct PgFetchLogStore {
    pool: PgPool,
    lease: Duration,
}

/// Full fetch log row, as listed by the operator commands
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct FetchLogRecord {
    pub fetchlogs_id: i64,
    pub key: String,
    pub init_datetime: Option<DateTime<Utc>>,
    pub loaded_datetime: Option<DateTime<Utc>>,
    pub completed_datetime: Option<DateTime<Utc>>,
    pub last_message: Option<String>,
    pub last_modified: DateTime<Utc>,
}

/// Rows an operator command selects
#[derive(Debug, Clone)]
pub enum KeySelector {
    Keys(Vec<String>),
    /// Case-insensitive regular expression over the key
    Pattern(String),
}

impl PgFetchLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self::with_lease(pool, Duration::from_secs(DEFAULT_CLAIM_LEASE_SECS))
    }

    pub fn with_lease(pool: PgPool, lease: Duration) -> Self {
        Self { pool, lease }
    }

    /// Operator override: complete the selected rows, or reset them to
    /// pending when `reset` is set. Returns the number of rows touched.
    #[instrument(skip(self))]
    pub async fn mark(&self, selector: &KeySelector, message: &str, reset: bool) -> Result<u64> {
        let completed = if reset { "NULL" } else { "now()" };
        let (predicate, result) = match selector {
            KeySelector::Keys(keys) => {
                let sql = format!(
                    "UPDATE fetchlogs SET last_message = $1, completed_datetime = {completed}, \
                     loaded_datetime = NULL WHERE key = ANY($2)"
                );
                (
                    "keys",
                    sqlx::query(&sql)
                        .bind(message)
                        .bind(keys)
                        .execute(&self.pool)
                        .await?,
                )
            },
            KeySelector::Pattern(pattern) => {
                let sql = format!(
                    "UPDATE fetchlogs SET last_message = $1, completed_datetime = {completed}, \
                     loaded_datetime = NULL WHERE key ~* $2"
                );
                (
                    "pattern",
                    sqlx::query(&sql)
                        .bind(message)
                        .bind(pattern)
                        .execute(&self.pool)
                        .await?,
                )
            },
        };

        debug!(predicate, rows = result.rows_affected(), reset, "Marked fetch logs");
        Ok(result.rows_affected())
    }

    /// Rows whose last message records an error, newest first
    pub async fn recent_errors(&self, limit: i64) -> Result<Vec<FetchLogRecord>> {
        let rows = sqlx::query_as::<_, FetchLogRecord>(
            r#"
            SELECT fetchlogs_id, key, init_datetime, loaded_datetime,
                   completed_datetime, last_message, last_modified
            FROM fetchlogs
            WHERE last_message ~* '^error'
            ORDER BY fetchlogs_id DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Rows whose key matches a case-insensitive regular expression
    pub async fn find_by_pattern(&self, pattern: &str, limit: i64) -> Result<Vec<FetchLogRecord>> {
        let rows = sqlx::query_as::<_, FetchLogRecord>(
            r#"
            SELECT fetchlogs_id, key, init_datetime, loaded_datetime,
                   completed_datetime, last_message, last_modified
            FROM fetchlogs
            WHERE key ~* $1
            ORDER BY last_modified DESC
            LIMIT $2
            "#,
        )
        .bind(pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[async_trait]
impl FetchLogStore for PgFetchLogStore {
    #[instrument(skip(self))]
    async fn upsert_pending(&self, key: &str, last_modified: DateTime<Utc>) -> Result<FetchLogEntry> {
        let sql = format!(
            r#"
            INSERT INTO fetchlogs (key, last_modified, init_datetime)
            VALUES ($1, $2, now())
            ON CONFLICT (key) DO UPDATE
            SET last_modified = EXCLUDED.last_modified,
                completed_datetime = NULL,
                loaded_datetime = NULL
            RETURNING {RETURNING}
            "#
        );

        let entry = sqlx::query_as::<_, FetchLogEntry>(&sql)
            .bind(key)
            .bind(last_modified)
            .fetch_one(&self.pool)
            .await?;

        Ok(entry)
    }

    async fn count_pending(&self, pattern: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM fetchlogs
            WHERE completed_datetime IS NULL
              AND key ~* $1
            "#,
        )
        .bind(pattern)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    #[instrument(skip(self))]
    async fn claim_batch(
        &self,
        pattern: &str,
        limit: u32,
        ascending: bool,
    ) -> Result<Vec<FetchLogEntry>> {
        let order = if ascending { "ASC" } else { "DESC" };
        let sql = format!(
            r#"
            UPDATE fetchlogs
            SET loaded_datetime = now(),
                last_message = $4
            WHERE key IN (
                SELECT key
                FROM fetchlogs
                WHERE completed_datetime IS NULL
                  AND key ~* $1
                  AND (loaded_datetime IS NULL
                       OR loaded_datetime < now() - make_interval(secs => $2))
                ORDER BY last_modified {order} NULLS LAST
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {RETURNING}
            "#
        );

        let mut claimed = sqlx::query_as::<_, FetchLogEntry>(&sql)
            .bind(pattern)
            .bind(self.lease.as_secs_f64())
            .bind(i64::from(limit))
            .bind(MESSAGE_CLAIMED)
            .fetch_all(&self.pool)
            .await?;

        // RETURNING does not preserve the subquery order.
        claimed.sort_by(|a, b| a.last_modified.cmp(&b.last_modified));
        if !ascending {
            claimed.reverse();
        }

        debug!(claimed = claimed.len(), "Claimed fetch logs");
        Ok(claimed)
    }

    async fn mark_completed(&self, entries: &[FetchLogEntry], message: &str) -> Result<u64> {
        if entries.is_empty() {
            return Ok(0);
        }

        let keys: Vec<String> = entries.iter().map(|e| e.key.clone()).collect();
        let modified: Vec<DateTime<Utc>> = entries.iter().map(|e| e.last_modified).collect();

        let result = sqlx::query(
            r#"
            UPDATE fetchlogs AS f
            SET completed_datetime = now(),
                last_message = $3
            FROM UNNEST($1::text[], $2::timestamptz[]) AS c(key, last_modified)
            WHERE f.key = c.key
              AND f.last_modified = c.last_modified
              AND f.completed_datetime IS NULL
            "#,
        )
        .bind(&keys)
        .bind(&modified)
        .bind(message)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn mark_failed(&self, key: &str, message: &str) -> Result<()> {
        sqlx::query("UPDATE fetchlogs SET last_message = $2 WHERE key = $1")
            .bind(key)
            .bind(message)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn mark_rejected(&self, entry: &FetchLogEntry, message: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE fetchlogs
            SET completed_datetime = now(),
                last_message = $2
            WHERE key = $1
              AND last_modified = $3
              AND completed_datetime IS NULL
            "#,
        )
        .bind(&entry.key)
        .bind(message)
        .bind(entry.last_modified)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn register_existing(&self, objects: &[(String, DateTime<Utc>)]) -> Result<u64> {
        let mut written = 0;

        for chunk in objects.chunks(BULK_CHUNK_SIZE) {
            let keys: Vec<String> = chunk.iter().map(|(key, _)| key.clone()).collect();
            let modified: Vec<DateTime<Utc>> = chunk.iter().map(|(_, at)| *at).collect();

            let result = sqlx::query(
                r#"
                INSERT INTO fetchlogs (key, last_modified, init_datetime)
                SELECT key, last_modified, now()
                FROM UNNEST($1::text[], $2::timestamptz[]) AS s(key, last_modified)
                ON CONFLICT (key) DO UPDATE
                SET last_modified = EXCLUDED.last_modified
                "#,
            )
            .bind(&keys)
            .bind(&modified)
            .execute(&self.pool)
            .await?;

            written += result.rows_affected();
        }

        Ok(written)
    }
}
