//! Configuration management

use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::path::PathBuf;
use std::time::Duration;

use aq_common::{env, AqError};

use crate::category::Category;
use crate::storage::StorageConfig;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/openaq";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default drain time budget in seconds.
pub const DEFAULT_INGEST_TIMEOUT_SECS: u64 = 900;

/// Default per-call batch size for every category.
pub const DEFAULT_CATEGORY_LIMIT: u32 = 10;

/// Default interval between drains in `run` mode (every 15 minutes).
pub const DEFAULT_SCHEDULE_INTERVAL_SECS: u64 = 900;

/// Default bucket for realtime fetches.
pub const DEFAULT_FETCH_BUCKET: &str = "openaq-fetches";

/// Default bucket for pipeline output (stations, measures, versions).
pub const DEFAULT_ETL_BUCKET: &str = "openaq-etl";

/// Ingest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub database: DatabaseConfig,
    pub drain: DrainConfig,
    pub buckets: BucketConfig,
    pub claim_lease_secs: u64,
    pub schedule_interval_secs: u64,
    /// Directory holding `<category>.sql` post-load scripts
    pub sql_dir: Option<PathBuf>,
    pub storage: StorageConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(skip_serializing)]
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Per-invocation drain parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainConfig {
    pub timeout_secs: u64,
    pub ascending: bool,
    pub limits: CategoryLimits,
}

/// Batch size per category; 0 disables the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryLimits {
    pub metadata: u32,
    pub realtime: u32,
    pub versions: u32,
    pub pipeline: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketConfig {
    pub fetch_bucket: String,
    pub etl_bucket: String,
}

impl CategoryLimits {
    pub fn uniform(limit: u32) -> Self {
        Self {
            metadata: limit,
            realtime: limit,
            versions: limit,
            pipeline: limit,
        }
    }

    pub fn get(&self, category: Category) -> u32 {
        match category {
            Category::Metadata => self.metadata,
            Category::Realtime => self.realtime,
            Category::Versions => self.versions,
            Category::Pipeline => self.pipeline,
        }
    }

    pub fn set(&mut self, category: Category, limit: u32) {
        match category {
            Category::Metadata => self.metadata = limit,
            Category::Realtime => self.realtime = limit,
            Category::Versions => self.versions = limit,
            Category::Pipeline => self.pipeline = limit,
        }
    }
}

impl Default for CategoryLimits {
    fn default() -> Self {
        Self::uniform(DEFAULT_CATEGORY_LIMIT)
    }
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_INGEST_TIMEOUT_SECS,
            ascending: false,
            limits: CategoryLimits::default(),
        }
    }
}

impl DrainConfig {
    pub fn from_env() -> aq_common::Result<Self> {
        Ok(Self {
            timeout_secs: env::parse_or("INGEST_TIMEOUT", DEFAULT_INGEST_TIMEOUT_SECS)?,
            ascending: env::bool_or("FETCH_ASCENDING", false)?,
            limits: CategoryLimits {
                metadata: env::parse_or("METADATA_LIMIT", DEFAULT_CATEGORY_LIMIT)?,
                realtime: env::parse_or("REALTIME_LIMIT", DEFAULT_CATEGORY_LIMIT)?,
                versions: env::parse_or("VERSIONS_LIMIT", DEFAULT_CATEGORY_LIMIT)?,
                pipeline: env::parse_or("PIPELINE_LIMIT", DEFAULT_CATEGORY_LIMIT)?,
            },
        })
    }
}

impl DatabaseConfig {
    pub fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(Duration::from_secs(self.connect_timeout_secs))
    }

    /// Pool that opens connections on first use. Only a malformed URL fails
    /// here; an unreachable server surfaces as errors from the queries.
    pub fn connect_lazy(&self) -> crate::error::Result<PgPool> {
        Ok(self.pool_options().connect_lazy(&self.url)?)
    }
}

impl BucketConfig {
    /// Bucket holding the objects of `category`.
    pub fn bucket_for(&self, category: Category) -> &str {
        match category {
            Category::Realtime => &self.fetch_bucket,
            Category::Metadata | Category::Versions | Category::Pipeline => &self.etl_bucket,
        }
    }
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            fetch_bucket: DEFAULT_FETCH_BUCKET.to_string(),
            etl_bucket: DEFAULT_ETL_BUCKET.to_string(),
        }
    }
}

impl IngestConfig {
    /// Load configuration from environment and defaults
    pub fn from_env() -> aq_common::Result<Self> {
        let config = IngestConfig {
            database: DatabaseConfig {
                url: env::var("DATABASE_WRITE_URL")
                    .or_else(|| env::var("DATABASE_URL"))
                    .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env::parse_or(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                )?,
                connect_timeout_secs: env::parse_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                )?,
            },
            drain: DrainConfig::from_env()?,
            buckets: BucketConfig {
                fetch_bucket: env::var_or("OPENAQ_FETCH_BUCKET", DEFAULT_FETCH_BUCKET),
                etl_bucket: env::var_or("OPENAQ_ETL_BUCKET", DEFAULT_ETL_BUCKET),
            },
            claim_lease_secs: env::parse_or(
                "INGEST_CLAIM_LEASE",
                crate::fetchlog::DEFAULT_CLAIM_LEASE_SECS,
            )?,
            schedule_interval_secs: env::parse_or(
                "INGEST_SCHEDULE_INTERVAL",
                DEFAULT_SCHEDULE_INTERVAL_SECS,
            )?,
            sql_dir: env::var("INGEST_SQL_DIR").map(PathBuf::from),
            storage: StorageConfig::from_env()?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> aq_common::Result<()> {
        if self.database.url.is_empty() {
            return Err(AqError::Config("Database URL cannot be empty".to_string()));
        }

        if self.database.max_connections == 0 {
            return Err(AqError::Config(
                "Database max_connections must be greater than 0".to_string(),
            ));
        }

        if self.drain.timeout_secs == 0 {
            return Err(AqError::Config("INGEST_TIMEOUT must be greater than 0".to_string()));
        }

        if self.schedule_interval_secs == 0 {
            return Err(AqError::Config(
                "INGEST_SCHEDULE_INTERVAL must be greater than 0".to_string(),
            ));
        }

        if self.buckets.fetch_bucket.is_empty() || self.buckets.etl_bucket.is_empty() {
            return Err(AqError::Config("Bucket names cannot be empty".to_string()));
        }

        // A lease shorter than the drain budget lets a second drain claim rows
        // the first is still loading.
        if self.claim_lease_secs < self.drain.timeout_secs {
            tracing::warn!(
                lease = self.claim_lease_secs,
                timeout = self.drain.timeout_secs,
                "Claim lease is shorter than the drain timeout"
            );
        }

        let disabled: Vec<&str> = Category::DRAIN_ORDER
            .into_iter()
            .filter(|c| self.drain.limits.get(*c) == 0)
            .map(Category::as_str)
            .collect();
        if !disabled.is_empty() {
            tracing::info!(categories = ?disabled, "Categories disabled by a zero limit");
        }

        Ok(())
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            },
            drain: DrainConfig::default(),
            buckets: BucketConfig::default(),
            claim_lease_secs: crate::fetchlog::DEFAULT_CLAIM_LEASE_SECS,
            schedule_interval_secs: DEFAULT_SCHEDULE_INTERVAL_SECS,
            sql_dir: None,
            storage: StorageConfig::default(),
        }
    }
}
