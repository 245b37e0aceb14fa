//! Object-created ingress
//!
//! Turns a batch of bucket notifications into pending fetch log rows. The
//! object lookup is informational only: the row's `last_modified` is the
//! ingest clock, whatever the lookup returned.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::category::classify;
use crate::error::Result;
use crate::event::ObjectNotification;
use crate::fetchlog::FetchLogStore;
use crate::storage::ObjectStore;

/// Outcome of one notification batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngressReport {
    /// Rows upserted as pending
    pub registered: usize,
    /// Notifications whose object lookup failed or found nothing
    pub lookup_failures: usize,
    /// Error that aborted the rest of the batch, if any
    pub error: Option<String>,
}

pub struct IngressHandler {
    store: Arc<dyn FetchLogStore>,
    objects: Arc<dyn ObjectStore>,
}

impl IngressHandler {
    pub fn new(store: Arc<dyn FetchLogStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self { store, objects }
    }

    /// Register every notification. Never fails; a store error stops the
    /// batch and is logged as a warning.
    #[instrument(skip_all, fields(records = notifications.len()))]
    pub async fn handle(&self, notifications: &[ObjectNotification]) -> IngressReport {
        let mut report = IngressReport::default();

        if let Err(e) = self.register_all(notifications, &mut report).await {
            warn!(error = %e, registered = report.registered, "Ingress batch aborted");
            report.error = Some(e.to_string());
        }

        info!(
            registered = report.registered,
            lookup_failures = report.lookup_failures,
            "Ingress batch finished"
        );
        report
    }

    async fn register_all(
        &self,
        notifications: &[ObjectNotification],
        report: &mut IngressReport,
    ) -> Result<()> {
        for notification in notifications {
            let ObjectNotification { bucket, key } = notification;

            match self.objects.head(bucket, key).await {
                Ok(Some(head)) => {
                    debug!(key = %key, object_modified = ?head.last_modified, size = head.size, "Object found");
                },
                Ok(None) => {
                    error!(bucket = %bucket, key = %key, "Could not get last modified time: object not listed");
                    report.lookup_failures += 1;
                },
                Err(e) => {
                    error!(bucket = %bucket, key = %key, error = %e, "Could not get last modified time");
                    report.lookup_failures += 1;
                },
            }

            let row = self.store.upsert_pending(key, Utc::now()).await?;
            report.registered += 1;

            let categories = classify(key);
            if categories.is_empty() {
                warn!(key = %key, "Key matches no category and will not be drained");
            }
            info!(
                key = %row.key,
                last_modified = %row.last_modified,
                categories = ?categories,
                "Registered pending fetch log"
            );
        }

        Ok(())
    }
}
