//! Claiming loader against the in-memory fetch log and object store

mod common;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::sync::Arc;

use aq_ingest::category::Category;
use aq_ingest::error::{IngestError, Result};
use aq_ingest::fetchlog::{FetchLogStore, MemoryFetchLogStore};
use aq_ingest::loader::{ClaimingLoader, Loader, RecordSink};

use common::{at, MemoryObjects, RecordingSink};

const ETL: &str = "openaq-etl";

struct Fixture {
    store: Arc<MemoryFetchLogStore>,
    objects: Arc<MemoryObjects>,
    sink: Arc<RecordingSink>,
}

impl Fixture {
    fn new(sink: RecordingSink) -> Self {
        Self {
            store: Arc::new(MemoryFetchLogStore::new()),
            objects: Arc::new(MemoryObjects::new()),
            sink: Arc::new(sink),
        }
    }

    fn loader(&self, category: Category, bucket: &str) -> ClaimingLoader {
        ClaimingLoader::new(
            category,
            bucket,
            self.store.clone(),
            self.objects.clone(),
            self.sink.clone(),
        )
    }

    async fn pending(&self, key: &str, body: &[u8]) {
        self.store.upsert_pending(key, at(0)).await.unwrap();
        self.objects.put(ETL, key, body, at(0));
    }
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

#[tokio::test]
async fn test_gz_object_is_decompressed_and_completed() {
    let fx = Fixture::new(RecordingSink::new());
    let key = "lcs-etl-pipeline/measures/purpleair/1.csv.gz";
    fx.pending(key, &gzip(b"sensor,value\nabc,1.5\n")).await;

    let loaded = fx.loader(Category::Pipeline, ETL).load(10, false).await.unwrap();

    assert_eq!(loaded, 1);
    let applied = fx.sink.applied();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].0, Category::Pipeline);
    assert_eq!(applied[0].2, b"sensor,value\nabc,1.5\n");

    let row = fx.store.get(key).unwrap();
    assert!(!row.is_pending());
    assert_eq!(row.last_message.as_deref(), Some("success"));
}

#[tokio::test]
async fn test_missing_object_is_rejected() {
    let fx = Fixture::new(RecordingSink::new());
    let key = "lcs-etl-pipeline/stations/gone.json";
    fx.store.upsert_pending(key, at(0)).await.unwrap();

    let loaded = fx.loader(Category::Metadata, ETL).load(10, false).await.unwrap();

    // Rejections leave the queue, so they count as progress.
    assert_eq!(loaded, 1);
    let row = fx.store.get(key).unwrap();
    assert!(!row.is_pending());
    assert!(row.last_message.unwrap().starts_with("ERROR: Object not found"));
}

#[tokio::test]
async fn test_corrupt_gzip_is_rejected() {
    let fx = Fixture::new(RecordingSink::new());
    let key = "lcs-etl-pipeline/versions/v1.csv.gz";
    fx.pending(key, b"plain text, not gzip").await;

    assert_eq!(fx.loader(Category::Versions, ETL).load(10, false).await.unwrap(), 1);
    assert!(fx.sink.applied().is_empty());
    assert!(fx.store.get(key).unwrap().last_message.unwrap().starts_with("ERROR:"));
}

#[tokio::test]
async fn test_sink_rejection_completes_row_with_error() {
    let fx = Fixture::new(RecordingSink::rejecting("NaN"));
    fx.pending("lcs-etl-pipeline/measures/bad.csv", b"v\nNaN\n").await;
    fx.pending("lcs-etl-pipeline/measures/good.csv", b"v\n1\n").await;

    let loaded = fx.loader(Category::Pipeline, ETL).load(10, true).await.unwrap();

    assert_eq!(loaded, 2);
    assert_eq!(fx.sink.applied().len(), 1);
    let bad = fx.store.get("lcs-etl-pipeline/measures/bad.csv").unwrap();
    assert!(!bad.is_pending());
    assert!(bad.last_message.unwrap().starts_with("ERROR: Rejected"));
}

/// Sink that sees the object overwritten mid-load, then rejects the old copy.
struct RevivingSink {
    store: Arc<MemoryFetchLogStore>,
}

#[async_trait]
impl RecordSink for RevivingSink {
    async fn apply(&self, _category: Category, key: &str, _payload: &[u8]) -> Result<u64> {
        self.store.upsert_pending(key, at(500)).await?;
        Err(IngestError::Sink {
            key: key.to_string(),
            message: "bad old version".to_string(),
        })
    }
}

#[tokio::test]
async fn test_rejection_does_not_complete_revived_row() {
    let store = Arc::new(MemoryFetchLogStore::new());
    let objects = Arc::new(MemoryObjects::new());
    let key = "lcs-etl-pipeline/measures/1.csv";
    store.upsert_pending(key, at(0)).await.unwrap();
    objects.put(ETL, key, b"v\n1\n", at(0));

    let loader = ClaimingLoader::new(
        Category::Pipeline,
        ETL,
        store.clone(),
        objects,
        Arc::new(RevivingSink { store: store.clone() }),
    );
    loader.load(10, true).await.unwrap();

    let row = store.get(key).unwrap();
    assert!(row.is_pending());
    assert_eq!(row.last_modified, at(500));
    assert_eq!(store.claim_batch("measures", 10, true).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_transient_failure_leaves_row_pending() {
    let fx = Fixture::new(RecordingSink::new());
    let key = "lcs-etl-pipeline/stations/flaky.json";
    fx.pending(key, b"{}").await;
    fx.objects.fail_get(key);

    let loaded = fx.loader(Category::Metadata, ETL).load(10, false).await.unwrap();

    assert_eq!(loaded, 0);
    let row = fx.store.get(key).unwrap();
    assert!(row.is_pending());
    assert!(row.last_message.unwrap().starts_with("error: "));
}

#[tokio::test]
async fn test_form_encoded_key_is_decoded_for_download() {
    let fx = Fixture::new(RecordingSink::new());
    let stored = "realtime-gzipped/2024-01-01/air+now%3A1.ndjson";
    fx.store.upsert_pending(stored, at(0)).await.unwrap();
    fx.objects
        .put("openaq-fetches", "realtime-gzipped/2024-01-01/air now:1.ndjson", b"{}\n", at(0));

    let loaded = fx
        .loader(Category::Realtime, "openaq-fetches")
        .load(10, false)
        .await
        .unwrap();

    assert_eq!(loaded, 1);
    // The fetch log keeps the key as delivered.
    assert!(!fx.store.get(stored).unwrap().is_pending());
    assert_eq!(fx.sink.applied()[0].1, stored);
}

#[tokio::test]
async fn test_only_claims_its_category_and_limit() {
    let fx = Fixture::new(RecordingSink::new());
    for i in 0..3 {
        fx.pending(&format!("lcs-etl-pipeline/measures/{i}.csv"), b"v\n1\n").await;
    }
    fx.pending("lcs-etl-pipeline/stations/s.json", b"{}").await;

    let loaded = fx.loader(Category::Pipeline, ETL).load(2, true).await.unwrap();

    assert_eq!(loaded, 2);
    assert_eq!(fx.store.count_pending("measures").await.unwrap(), 1);
    assert_eq!(fx.store.count_pending("stations").await.unwrap(), 1);
    assert!(fx.objects.gets().iter().all(|(bucket, _)| bucket == ETL));
}

#[tokio::test]
async fn test_empty_queue_returns_zero() {
    let fx = Fixture::new(RecordingSink::new());
    assert_eq!(fx.loader(Category::Versions, ETL).load(10, false).await.unwrap(), 0);
    assert!(fx.objects.gets().is_empty());
}
