//! Cron drain scheduler
//!
//! One drain snapshots the pending count of every category, then works the
//! categories in [`Category::DRAIN_ORDER`], calling each loader until it has
//! processed the snapshot count or the shared time budget runs out. The
//! budget is checked before each call; a call in flight is never cut short.
//!
//! A loader call that returns 0 stalls its category. Stalls and loader errors
//! end that category only; the next one still runs.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, info_span, Instrument};

use crate::category::Category;
use crate::config::DrainConfig;
use crate::error::{IngestError, Result};
use crate::fetchlog::FetchLogStore;
use crate::loader::LoaderSet;

/// Budget for one drain invocation. Never persisted.
#[derive(Debug, Clone)]
pub struct WorkBudget {
    pub start: Instant,
    pub timeout: Duration,
    pub ascending: bool,
    pub categories: Vec<CategoryBudget>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryBudget {
    pub category: Category,
    pub limit: u32,
    /// Pending rows at the start of the invocation
    pub target_count: u64,
}

impl WorkBudget {
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn is_exhausted(&self) -> bool {
        self.elapsed() >= self.timeout
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum DrainStatus {
    /// Nothing pending, or the category is disabled
    Skipped,
    /// Snapshot count reached
    Drained,
    /// Budget ran out first
    TimedOut,
    /// A loader call made no progress
    Stalled,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryOutcome {
    pub category: Category,
    pub target: u64,
    pub processed: u64,
    pub calls: u32,
    pub status: DrainStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct DrainReport {
    pub outcomes: Vec<CategoryOutcome>,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

impl DrainReport {
    pub fn outcome(&self, category: Category) -> Option<&CategoryOutcome> {
        self.outcomes.iter().find(|o| o.category == category)
    }

    pub fn total_processed(&self) -> u64 {
        self.outcomes.iter().map(|o| o.processed).sum()
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}

/// Per-category bookkeeping while a drain runs
struct Progress {
    processed: u64,
    calls: u32,
}

pub struct DrainScheduler {
    store: Arc<dyn FetchLogStore>,
    loaders: LoaderSet,
}

impl DrainScheduler {
    pub fn new(store: Arc<dyn FetchLogStore>, loaders: LoaderSet) -> Self {
        Self { store, loaders }
    }

    /// Run one drain. Never fails; per-category problems end up in the report.
    pub async fn run(&self, config: &DrainConfig) -> DrainReport {
        let start = Instant::now();
        let span = info_span!("drain", ascending = config.ascending);

        async move {
            let mut outcomes = Vec::with_capacity(Category::DRAIN_ORDER.len());
            let mut categories = Vec::with_capacity(Category::DRAIN_ORDER.len());

            for category in Category::DRAIN_ORDER {
                let limit = config.limits.get(category);
                match self.store.count_pending(category.pattern()).await {
                    Ok(target_count) => categories.push(CategoryBudget {
                        category,
                        limit,
                        target_count,
                    }),
                    Err(e) => {
                        error!(category = %category, error = %e, "Counting pending {} records failed", category);
                        outcomes.push(CategoryOutcome {
                            category,
                            target: 0,
                            processed: 0,
                            calls: 0,
                            status: DrainStatus::Failed(e.to_string()),
                        });
                    },
                }
            }

            let pending = categories
                .iter()
                .map(|c| format!("{}/{} {}", c.limit, c.target_count, c.category))
                .collect::<Vec<_>>()
                .join(", ");
            info!("{} records pending", pending);

            let budget = WorkBudget {
                start,
                timeout: Duration::from_secs(config.timeout_secs),
                ascending: config.ascending,
                categories,
            };

            for slot in &budget.categories {
                outcomes.push(self.drain_category(&budget, slot).await);
            }

            outcomes.sort_by_key(|o| {
                Category::DRAIN_ORDER
                    .iter()
                    .position(|c| *c == o.category)
                    .unwrap_or(usize::MAX)
            });

            let elapsed = budget.elapsed();
            info!("done processing: {:.4} seconds", elapsed.as_secs_f64());

            DrainReport { outcomes, elapsed }
        }
        .instrument(span)
        .await
    }

    async fn drain_category(&self, budget: &WorkBudget, slot: &CategoryBudget) -> CategoryOutcome {
        let CategoryBudget {
            category,
            limit,
            target_count,
        } = *slot;

        let outcome = |progress: &Progress, status| CategoryOutcome {
            category,
            target: target_count,
            processed: progress.processed,
            calls: progress.calls,
            status,
        };

        let mut progress = Progress { processed: 0, calls: 0 };

        if target_count == 0 || limit == 0 {
            return outcome(&progress, DrainStatus::Skipped);
        }

        let span = info_span!("drain_category", category = %category, target = target_count, limit);
        match self
            .drain_loop(budget, slot, &mut progress)
            .instrument(span)
            .await
        {
            Ok(()) if progress.processed >= target_count => outcome(&progress, DrainStatus::Drained),
            Ok(()) => {
                info!(
                    category = %category,
                    processed = progress.processed,
                    target = target_count,
                    "Time budget exhausted"
                );
                outcome(&progress, DrainStatus::TimedOut)
            },
            Err(e @ IngestError::Stalled { .. }) => {
                error!(category = %category, "load {} failed: {}", category, e);
                outcome(&progress, DrainStatus::Stalled)
            },
            Err(e) => {
                error!(category = %category, "load {} failed: {}", category, e);
                outcome(&progress, DrainStatus::Failed(e.to_string()))
            },
        }
    }

    async fn drain_loop(
        &self,
        budget: &WorkBudget,
        slot: &CategoryBudget,
        progress: &mut Progress,
    ) -> Result<()> {
        let loader = self
            .loaders
            .get(slot.category)
            .ok_or(IngestError::MissingLoader(slot.category))?;

        while progress.processed < slot.target_count && !budget.is_exhausted() {
            let loaded = loader.load(slot.limit, budget.ascending).await?;
            progress.calls += 1;
            progress.processed += loaded;

            info!(
                "loaded {} of {} {} records, timer: {:.4}",
                progress.processed,
                slot.target_count,
                slot.category,
                budget.elapsed().as_secs_f64()
            );

            if loaded == 0 {
                return Err(IngestError::Stalled {
                    category: slot.category,
                    processed: progress.processed,
                    target: slot.target_count,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion() {
        let budget = WorkBudget {
            start: Instant::now(),
            timeout: Duration::from_secs(60),
            ascending: false,
            categories: Vec::new(),
        };
        assert!(!budget.is_exhausted());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(budget.is_exhausted());
    }

    #[test]
    fn test_status_serialization() {
        let outcome = CategoryOutcome {
            category: Category::Realtime,
            target: 3,
            processed: 3,
            calls: 2,
            status: DrainStatus::Drained,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["category"], "realtime");
        assert_eq!(json["status"]["kind"], "drained");

        let failed = serde_json::to_value(DrainStatus::Failed("boom".to_string())).unwrap();
        assert_eq!(failed["kind"], "failed");
        assert_eq!(failed["reason"], "boom");
    }
}
