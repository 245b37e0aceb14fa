//! Record sinks
//!
//! The sink is where a category's file format gets interpreted. The staging
//! sink below is format-agnostic: it lands raw lines in `staged_lines` and
//! leaves parsing to an optional SQL script per category.

use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, instrument};

use crate::category::Category;
use crate::error::{IngestError, Result};

#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Apply one decompressed object. Returns the number of records written.
    ///
    /// Must be idempotent per key. Return [`IngestError::Sink`] for content
    /// that can never be applied.
    async fn apply(&self, category: Category, key: &str, payload: &[u8]) -> Result<u64>;
}

pub struct StagingSink {
    pool: PgPool,
    scripts: HashMap<Category, String>,
}

impl StagingSink {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            scripts: HashMap::new(),
        }
    }

    /// Load `<category>.sql` from `dir` for every category that has one.
    pub fn with_scripts_from_dir(pool: PgPool, dir: &Path) -> Result<Self> {
        let mut scripts = HashMap::new();
        for category in Category::DRAIN_ORDER {
            let path = dir.join(format!("{}.sql", category.as_str()));
            if path.is_file() {
                let sql = std::fs::read_to_string(&path)?;
                info!(category = %category, path = %path.display(), "Loaded post-load script");
                scripts.insert(category, sql);
            }
        }
        Ok(Self { pool, scripts })
    }

    pub fn has_script(&self, category: Category) -> bool {
        self.scripts.contains_key(&category)
    }
}

/// Non-empty lines with their 1-based line numbers.
pub fn split_lines(key: &str, payload: &[u8]) -> Result<Vec<(i32, String)>> {
    let text = std::str::from_utf8(payload).map_err(|e| IngestError::Sink {
        key: key.to_string(),
        message: format!("payload is not UTF-8: {e}"),
    })?;

    let mut lines = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let number = i32::try_from(index + 1).map_err(|_| IngestError::Sink {
            key: key.to_string(),
            message: "too many lines".to_string(),
        })?;
        lines.push((number, line.to_string()));
    }
    Ok(lines)
}

#[async_trait]
impl RecordSink for StagingSink {
    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    async fn apply(&self, category: Category, key: &str, payload: &[u8]) -> Result<u64> {
        let lines = split_lines(key, payload)?;
        let (numbers, texts): (Vec<i32>, Vec<String>) = lines.into_iter().unzip();

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM staged_lines WHERE key = $1")
            .bind(key)
            .execute(&mut *tx)
            .await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO staged_lines (key, line_number, line)
            SELECT $1, n, l
            FROM UNNEST($2::int[], $3::text[]) AS s(n, l)
            ON CONFLICT (key, line_number) DO UPDATE
            SET line = EXCLUDED.line,
                staged_at = now()
            "#,
        )
        .bind(key)
        .bind(&numbers)
        .bind(&texts)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if let Some(script) = self.scripts.get(&category) {
            sqlx::query(script)
                .bind(key)
                .execute(&mut *tx)
                .await
                .map_err(|e| match e {
                    sqlx::Error::Database(db) => IngestError::Sink {
                        key: key.to_string(),
                        message: format!("{category} script: {db}"),
                    },
                    other => IngestError::Database(other),
                })?;
        }

        tx.commit().await?;

        debug!(key, inserted, "Staged lines");
        Ok(inserted)
    }
}
