//! Memory Pressure Task
//!
//! Background task that periodically keeps all registered caches within a
//! global byte budget.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::CacheRegistry;

/// Spawns a background task that enforces `budget_bytes` across `registry`.
///
/// The task sleeps for the given interval, then asks the registry to shrink
/// its caches if their combined size exceeds the budget. Pruning takes
/// blocking locks and may evict many entries, so each pass runs on the
/// blocking thread pool.
///
/// # Arguments
/// * `registry` - Shared registry of caches to police
/// * `budget_bytes` - Combined byte budget for all registered caches
/// * `interval_secs` - Interval in seconds between checks
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
///
/// # Example
/// ```ignore
/// let registry = Arc::new(CacheRegistry::new());
/// let handle = spawn_pressure_task(registry.clone(), 256 * 1024 * 1024, 5);
/// // Later, during shutdown:
/// handle.abort();
/// ```
pub fn spawn_pressure_task(
    registry: Arc<CacheRegistry>,
    budget_bytes: u64,
    interval_secs: u64,
) -> JoinHandle<()> {
    let interval = Duration::from_secs(interval_secs);

    tokio::spawn(async move {
        info!(
            "Starting memory pressure task with budget of {} bytes every {} seconds",
            budget_bytes, interval_secs
        );

        loop {
            tokio::time::sleep(interval).await;

            let pass = Arc::clone(&registry);
            let job = tokio::task::spawn_blocking(move || pass.enforce_budget(budget_bytes));
            let freed = match job.await {
                Ok(freed) => freed,
                Err(e) => {
                    warn!("Memory pressure pass failed: {}", e);
                    continue;
                }
            };

            if freed > 0 {
                info!(
                    "Memory pressure: freed {} bytes, {} bytes now cached",
                    freed,
                    registry.total_size()
                );
            } else {
                debug!("Memory pressure: caches within budget");
            }
        }
    })
}
