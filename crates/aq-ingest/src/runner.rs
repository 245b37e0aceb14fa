//! Long-running drain loop
//!
//! Replaces the external 15-minute cron rule when the binary runs as a
//! service. Drains run one at a time on the calling task.

use std::future::Future;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use crate::config::DrainConfig;
use crate::scheduler::DrainScheduler;

/// Drain every `every` until `shutdown` resolves. The first drain runs
/// immediately. Returns the number of drains run.
///
/// Shutdown is only observed between drains.
pub async fn run_periodic<F>(
    scheduler: &DrainScheduler,
    config: &DrainConfig,
    every: Duration,
    shutdown: F,
) -> u64
where
    F: Future<Output = ()>,
{
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    let mut runs = 0u64;
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!(runs, "Shutdown requested, stopping drain loop");
                break;
            }
            _ = ticker.tick() => {
                let report = scheduler.run(config).await;
                runs += 1;
                info!(
                    run = runs,
                    processed = report.total_processed(),
                    elapsed_secs = report.elapsed.as_secs_f64(),
                    "Scheduled drain finished"
                );
            }
        }
    }

    runs
}
