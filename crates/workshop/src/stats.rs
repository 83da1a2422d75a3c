//! Usage statistics and their lock-free publication

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Point-in-time usage snapshot
///
/// Cumulative fields (`created_total`, `hire_total`, `fire_total`) advance
/// monotonically across snapshots; `most_used_load` and `least_used_load`
/// are only as fresh as the last reaper cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkshopStats {
    /// Live workers currently registered
    pub worker_count: u32,

    /// Registered workers with no in-flight job
    pub idle_count: u32,

    /// Workers ever built by the factory
    pub created_total: u64,

    /// Successful hires over the pool lifetime
    pub hire_total: u64,

    /// Fires of known workers over the pool lifetime
    pub fire_total: u64,

    /// In-flight jobs; always `hire_total - fire_total`
    pub doing_count: u64,

    /// Highest per-worker load as of the last reaper cycle
    pub most_used_load: u32,

    /// Lowest per-worker load as of the last reaper cycle
    pub least_used_load: u32,
}

impl WorkshopStats {
    pub(crate) fn record_hire(&mut self) {
        self.hire_total += 1;
        self.doing_count = self.hire_total - self.fire_total;
    }

    pub(crate) fn record_fire(&mut self) {
        self.fire_total += 1;
        self.doing_count = self.hire_total - self.fire_total;
    }
}

/// Publishes snapshots written under the pool lock into a slot that
/// readers watch without ever taking that lock.
pub(crate) struct StatsPublisher {
    tx: watch::Sender<WorkshopStats>,
}

impl StatsPublisher {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(WorkshopStats::default());
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<WorkshopStats> {
        self.tx.subscribe()
    }

    pub(crate) fn publish(&self, stats: WorkshopStats) {
        self.tx.send_replace(stats);
    }
}
