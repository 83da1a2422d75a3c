//! Background eviction of idle-expired and unhealthy workers

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::debug;

use crate::pool::Shared;
use crate::worker::{Worker, WorkerId};

/// Start the reaper loop for a workshop.
///
/// Sweeps once per idle timeout, starting one full period after
/// construction, until the shutdown signal fires. The handle is joined by
/// `Workshop::close`, so no sweep outlives the pool.
pub(crate) fn spawn<W: Worker>(
    shared: Arc<Shared<W>>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = shared.config.max_idle_duration;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let doomed = sweep(&shared);
                    if !doomed.is_empty() {
                        debug!(evicted = doomed.len(), "evicted idle workers");
                    }
                    for worker in &doomed {
                        shared.destroy(worker);
                    }
                }
                _ = shutdown_rx.changed() => {
                    debug!("reaper: shutdown requested");
                    break;
                }
            }
        }
        debug!("reaper exited");
    })
}

/// One eviction cycle under the pool lock.
///
/// Removes every jobless worker that is unhealthy or past its idle expiry,
/// refreshes the most/least-used gauges from the survivors, and publishes
/// the snapshot. Evicted workers are returned for destruction outside the
/// lock.
fn sweep<W: Worker>(shared: &Shared<W>) -> Vec<Arc<W>> {
    let now = Instant::now();
    let mut core = shared.core.lock();

    let expired: Vec<WorkerId> = core
        .registry
        .iter()
        .filter(|(_, slot)| {
            slot.job_num == 0 && (!slot.worker.health() || now > slot.idle_expire)
        })
        .map(|(&id, _)| id)
        .collect();

    let mut doomed = Vec::with_capacity(expired.len());
    for id in expired {
        // Eviction candidates are jobless, so each one was counted idle.
        core.stats.idle_count -= 1;
        if let Some(worker) = core.remove(id) {
            doomed.push(worker);
        }
    }

    let mut most_used = 0u32;
    let mut least_used = u32::MAX;
    for slot in core.registry.values() {
        most_used = most_used.max(slot.job_num);
        least_used = least_used.min(slot.job_num);
    }
    if least_used == u32::MAX {
        least_used = 0;
    }
    core.stats.most_used_load = most_used;
    core.stats.least_used_load = least_used;

    shared.publisher.publish(core.stats);
    doomed
}
