use async_trait::async_trait;
use flate2::read::GzDecoder;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::{Loader, RecordSink};
use crate::category::Category;
use crate::error::{IngestError, Result};
use crate::fetchlog::{FetchLogEntry, FetchLogStore, MESSAGE_SUCCESS};
use crate::storage::ObjectStore;

/// Generic loader: claim, download, decompress, hand to a [`RecordSink`].
///
/// The count returned covers rows taken off the queue in this call, which is
/// successful loads plus permanent rejections. Rows that failed transiently
/// stay pending and are not counted.
pub struct ClaimingLoader {
    category: Category,
    bucket: String,
    store: Arc<dyn FetchLogStore>,
    objects: Arc<dyn ObjectStore>,
    sink: Arc<dyn RecordSink>,
}

impl ClaimingLoader {
    pub fn new(
        category: Category,
        bucket: impl Into<String>,
        store: Arc<dyn FetchLogStore>,
        objects: Arc<dyn ObjectStore>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            category,
            bucket: bucket.into(),
            store,
            objects,
            sink,
        }
    }

    async fn apply(&self, entry: &FetchLogEntry) -> Result<u64> {
        let object_key = decode_key(&entry.key)?;
        let raw = self.objects.get(&self.bucket, &object_key).await?;
        let payload = if object_key.ends_with(".gz") {
            gunzip(&entry.key, &raw)?
        } else {
            raw
        };
        self.sink.apply(self.category, &entry.key, &payload).await
    }
}

/// Notification keys are form-encoded: `+` is a space.
pub fn decode_key(key: &str) -> Result<String> {
    let spaced = key.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| IngestError::Decode {
            key: key.to_string(),
            message: format!("invalid key encoding: {e}"),
        })
}

fn gunzip(key: &str, compressed: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(compressed);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| IngestError::Decode {
            key: key.to_string(),
            message: format!("gzip: {e}"),
        })?;
    Ok(decompressed)
}

#[async_trait]
impl Loader for ClaimingLoader {
    #[instrument(skip(self), fields(category = %self.category))]
    async fn load(&self, limit: u32, ascending: bool) -> Result<u64> {
        let claimed = self
            .store
            .claim_batch(self.category.pattern(), limit, ascending)
            .await?;
        if claimed.is_empty() {
            debug!("Nothing to claim");
            return Ok(0);
        }

        let mut loaded = Vec::with_capacity(claimed.len());
        let mut rejected = 0u64;

        for entry in claimed {
            match self.apply(&entry).await {
                Ok(records) => {
                    debug!(key = %entry.key, records, "Applied object");
                    loaded.push(entry);
                },
                Err(e) if e.is_permanent() => {
                    error!(key = %entry.key, error = %e, "Rejecting object");
                    if !self.store.mark_rejected(&entry, &format!("ERROR: {e}")).await? {
                        info!(key = %entry.key, "Object was revived while loading and stays pending");
                    }
                    rejected += 1;
                },
                Err(e) => {
                    warn!(key = %entry.key, error = %e, "Load failed, leaving pending");
                    self.store.mark_failed(&entry.key, &format!("error: {e}")).await?;
                },
            }
        }

        let completed = self.store.mark_completed(&loaded, MESSAGE_SUCCESS).await?;
        if completed < loaded.len() as u64 {
            info!(
                revived = loaded.len() as u64 - completed,
                "Some objects were revived while loading and stay pending"
            );
        }

        Ok(loaded.len() as u64 + rejected)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_decode_key() {
        assert_eq!(
            decode_key("realtime/2023-01-01/air+now%3A1.ndjson").unwrap(),
            "realtime/2023-01-01/air now:1.ndjson"
        );
        assert_eq!(decode_key("plain/key.csv").unwrap(), "plain/key.csv");
    }

    #[test]
    fn test_gunzip() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"a,b\n1,2\n").unwrap();
        let compressed = encoder.finish().unwrap();

        assert_eq!(gunzip("k.gz", &compressed).unwrap(), b"a,b\n1,2\n");
    }

    #[test]
    fn test_gunzip_rejects_garbage() {
        let err = gunzip("k.gz", b"not gzip").unwrap_err();
        assert!(err.is_permanent());
    }
}
