//! Bucket crawl backfill
//!
//! Registers objects that never produced a notification. Existing rows keep
//! their completion state; only `last_modified` is refreshed.

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::error::Result;
use crate::fetchlog::FetchLogStore;
use crate::storage::ObjectStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlReport {
    pub listed: usize,
    pub registered: u64,
}

/// List `prefix` in `bucket` and register every `.gz` object, optionally
/// only those modified after `since`.
#[instrument(skip(objects, store))]
pub async fn crawl(
    objects: &dyn ObjectStore,
    store: &dyn FetchLogStore,
    bucket: &str,
    prefix: &str,
    since: Option<DateTime<Utc>>,
) -> Result<CrawlReport> {
    let listed = objects.list(bucket, prefix).await?;
    let total = listed.len();

    let mut missing_timestamp = 0usize;
    let keys: Vec<(String, DateTime<Utc>)> = listed
        .into_iter()
        .filter(|object| object.key.ends_with(".gz"))
        .filter_map(|object| match object.last_modified {
            Some(modified) => Some((object.key, modified)),
            None => {
                missing_timestamp += 1;
                None
            },
        })
        .filter(|(_, modified)| since.is_none_or(|cutoff| *modified > cutoff))
        .collect();

    if missing_timestamp > 0 {
        warn!(missing_timestamp, "Skipped objects without a modification time");
    }

    let registered = store.register_existing(&keys).await?;
    info!(listed = total, registered, "Crawl finished");

    Ok(CrawlReport {
        listed: total,
        registered,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::IngestError;
    use crate::fetchlog::MemoryFetchLogStore;
    use crate::storage::ObjectHead;
    use async_trait::async_trait;

    struct Listing(Vec<ObjectHead>);

    #[async_trait]
    impl ObjectStore for Listing {
        async fn head(&self, _bucket: &str, _key: &str) -> Result<Option<ObjectHead>> {
            Ok(None)
        }

        async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
            Err(IngestError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
        }

        async fn list(&self, _bucket: &str, prefix: &str) -> Result<Vec<ObjectHead>> {
            Ok(self
                .0
                .iter()
                .filter(|o| o.key.starts_with(prefix))
                .cloned()
                .collect())
        }
    }

    fn object(key: &str, secs: i64) -> ObjectHead {
        ObjectHead {
            key: key.to_string(),
            last_modified: DateTime::from_timestamp(secs, 0),
            size: 10,
        }
    }

    #[tokio::test]
    async fn test_crawl_registers_gz_objects_after_cutoff() {
        let objects = Listing(vec![
            object("realtime-gzipped/2024/a.ndjson.gz", 1_700_000_100),
            object("realtime-gzipped/2024/b.ndjson.gz", 1_700_000_000),
            object("realtime-gzipped/2024/readme.txt", 1_700_000_500),
            object("other/c.ndjson.gz", 1_700_000_500),
        ]);
        let store = MemoryFetchLogStore::new();
        let cutoff = DateTime::from_timestamp(1_700_000_050, 0);

        let report = crawl(&objects, &store, "openaq-fetches", "realtime-gzipped/", cutoff)
            .await
            .unwrap();

        assert_eq!(report.listed, 3);
        assert_eq!(report.registered, 1);
        let keys: Vec<_> = store.entries().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["realtime-gzipped/2024/a.ndjson.gz"]);
    }
}
