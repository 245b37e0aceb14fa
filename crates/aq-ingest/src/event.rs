//! Trigger payloads
//!
//! The entry point receives either an S3 "object created" notification or a
//! scheduler tick. Anything else is carried through as
//! [`TriggerEvent::Unrecognized`] so the handler can log and ignore it.

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::category::Category;
use crate::config::DrainConfig;

/// `source` values that identify a scheduler tick.
pub const SCHEDULER_SOURCES: [&str; 2] = ["aws.events", "scheduler"];

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerEvent {
    ObjectCreated(Vec<ObjectNotification>),
    Scheduled(CronOverrides),
    Unrecognized(Value),
}

/// One `{bucket, key}` pair from a notification batch.
///
/// The key is kept exactly as delivered (form-encoded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectNotification {
    pub bucket: String,
    pub key: String,
}

/// Per-invocation overrides carried by a scheduler payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct CronOverrides {
    pub ascending: Option<bool>,
    pub pipeline_limit: Option<u32>,
    pub realtime_limit: Option<u32>,
    pub metadata_limit: Option<u32>,
    pub versions_limit: Option<u32>,
}

#[derive(Deserialize)]
struct S3Record {
    s3: S3Entity,
}

#[derive(Deserialize)]
struct S3Entity {
    bucket: S3Bucket,
    object: S3Object,
}

#[derive(Deserialize)]
struct S3Bucket {
    name: String,
}

#[derive(Deserialize)]
struct S3Object {
    key: String,
}

impl TriggerEvent {
    pub fn from_value(event: Value) -> Self {
        if let Some(records) = event.get("Records").and_then(Value::as_array) {
            let notifications = records
                .iter()
                .enumerate()
                .filter_map(|(index, record)| {
                    match serde_json::from_value::<S3Record>(record.clone()) {
                        Ok(record) => Some(ObjectNotification {
                            bucket: record.s3.bucket.name,
                            key: record.s3.object.key,
                        }),
                        Err(e) => {
                            warn!(index, error = %e, "Skipping malformed notification record");
                            None
                        },
                    }
                })
                .collect();
            return TriggerEvent::ObjectCreated(notifications);
        }

        let scheduled = event
            .get("source")
            .and_then(Value::as_str)
            .is_some_and(|source| SCHEDULER_SOURCES.contains(&source));
        if scheduled {
            match CronOverrides::deserialize(&event) {
                Ok(overrides) => return TriggerEvent::Scheduled(overrides),
                Err(e) => warn!(error = %e, "Scheduler payload has invalid overrides"),
            }
        }

        TriggerEvent::Unrecognized(event)
    }
}

impl CronOverrides {
    fn limit(&self, category: Category) -> Option<u32> {
        match category {
            Category::Metadata => self.metadata_limit,
            Category::Realtime => self.realtime_limit,
            Category::Versions => self.versions_limit,
            Category::Pipeline => self.pipeline_limit,
        }
    }

    /// Overlay the payload values on the configured defaults.
    pub fn apply(&self, drain: &mut DrainConfig) {
        if let Some(ascending) = self.ascending {
            drain.ascending = ascending;
        }
        for category in Category::DRAIN_ORDER {
            if let Some(limit) = self.limit(category) {
                drain.limits.set(category, limit);
            }
        }
    }
}
