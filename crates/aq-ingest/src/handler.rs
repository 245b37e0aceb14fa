//! Trigger dispatch
//!
//! Single entry point for whatever invokes the ingest core: an object-created
//! batch goes to ingress, a scheduler tick runs a drain with the payload's
//! overrides on top of the configured defaults.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::DrainConfig;
use crate::event::TriggerEvent;
use crate::ingress::{IngressHandler, IngressReport};
use crate::scheduler::{DrainReport, DrainScheduler};

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HandlerOutcome {
    Ingested(IngressReport),
    Drained(DrainReport),
    Ignored,
}

pub struct IngestHandler {
    ingress: IngressHandler,
    scheduler: DrainScheduler,
    drain_config: DrainConfig,
}

impl IngestHandler {
    pub fn new(ingress: IngressHandler, scheduler: DrainScheduler, drain_config: DrainConfig) -> Self {
        Self {
            ingress,
            scheduler,
            drain_config,
        }
    }

    pub fn scheduler(&self) -> &DrainScheduler {
        &self.scheduler
    }

    pub fn drain_config(&self) -> &DrainConfig {
        &self.drain_config
    }

    /// Dispatch a trigger document as text. Invalid JSON is logged and
    /// ignored like any other unrecognized payload.
    pub async fn handle_raw(&self, raw: &str) -> HandlerOutcome {
        match serde_json::from_str::<Value>(raw) {
            Ok(event) => self.handle(event).await,
            Err(e) => {
                warn!(error = %e, "Trigger payload is not valid JSON");
                HandlerOutcome::Ignored
            },
        }
    }

    /// Dispatch one raw trigger payload. Never fails.
    pub async fn handle(&self, event: Value) -> HandlerOutcome {
        debug!(event = %event, "Received trigger");

        match TriggerEvent::from_value(event) {
            TriggerEvent::ObjectCreated(notifications) => {
                HandlerOutcome::Ingested(self.ingress.handle(&notifications).await)
            },
            TriggerEvent::Scheduled(overrides) => {
                let mut config = self.drain_config;
                overrides.apply(&mut config);
                info!(ascending = config.ascending, limits = ?config.limits, "Running cron drain");
                HandlerOutcome::Drained(self.scheduler.run(&config).await)
            },
            TriggerEvent::Unrecognized(event) => {
                warn!(event = %event, "Nothing to do");
                HandlerOutcome::Ignored
            },
        }
    }
}
