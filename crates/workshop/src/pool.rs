//! The workshop: a capacity-bounded registry of reusable workers
//!
//! Manages worker selection, lazy growth, health-driven replacement and
//! graceful shutdown. One mutex guards the registry, the per-slot load
//! bookkeeping and the least-loaded hint; critical sections are short and
//! never `await`. The caller's job in [`Workshop::callback`] always runs
//! outside the lock.

use std::collections::HashMap;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::WorkshopConfig;
use crate::error::{CallbackError, WorkshopError};
use crate::reaper;
use crate::stats::{StatsPublisher, WorkshopStats};
use crate::worker::{worker_id, Worker, WorkerFactory, WorkerId};

/// Per-worker bookkeeping record
pub(crate) struct WorkerSlot<W> {
    pub(crate) worker: Arc<W>,
    /// Current in-flight assignments
    pub(crate) job_num: u32,
    /// Eviction deadline; meaningful only while `job_num == 0`
    pub(crate) idle_expire: Instant,
}

/// Registry state guarded by the pool lock
pub(crate) struct Core<W> {
    pub(crate) registry: HashMap<WorkerId, WorkerSlot<W>>,
    /// Believed least-loaded slot; best-effort, refreshed lazily
    pub(crate) hint: Option<WorkerId>,
    /// Authoritative counters; copies are published after every mutation
    pub(crate) stats: WorkshopStats,
    /// Set once by the first closer to tear down the registry
    torn_down: bool,
}

impl<W> Core<W> {
    fn new(max_quota: usize) -> Self {
        Self {
            registry: HashMap::with_capacity(max_quota),
            hint: None,
            stats: WorkshopStats::default(),
            torn_down: false,
        }
    }

    /// Full scan for the least-loaded slot; first encountered wins ties.
    pub(crate) fn recompute_hint(&mut self) {
        let mut best: Option<(WorkerId, u32)> = None;
        for (&id, slot) in &self.registry {
            match best {
                Some((_, job_num)) if slot.job_num >= job_num => {}
                _ => best = Some((id, slot.job_num)),
            }
        }
        self.hint = best.map(|(id, _)| id);
    }

    /// Drop a slot from the registry and hand back its worker.
    ///
    /// Any removal invalidates the hint, so it is recomputed here. Idle
    /// accounting stays at the call sites: only they know whether the slot
    /// was counted idle.
    pub(crate) fn remove(&mut self, id: WorkerId) -> Option<Arc<W>> {
        let slot = self.registry.remove(&id)?;
        self.stats.worker_count -= 1;
        self.recompute_hint();
        Some(slot.worker)
    }
}

/// State shared between the workshop handle and the reaper task
pub(crate) struct Shared<W> {
    pub(crate) config: WorkshopConfig,
    factory: WorkerFactory<W>,
    pub(crate) core: Mutex<Core<W>>,
    pub(crate) publisher: StatsPublisher,
    shutdown_rx: watch::Receiver<bool>,
}

impl<W: Worker> Shared<W> {
    /// Build a worker through the factory, converting a panic into an
    /// ordinary error so it never escapes to the hiring caller.
    fn build_worker(&self) -> Result<W, WorkshopError> {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.factory)())) {
            Ok(Ok(worker)) => Ok(worker),
            Ok(Err(error)) => Err(WorkshopError::Factory(error)),
            Err(payload) => Err(WorkshopError::Factory(anyhow::anyhow!(
                "worker factory panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }

    /// Hire under the pool lock.
    ///
    /// Each pass either returns or strictly shrinks the registry before
    /// retrying, so the loop is bounded by the registry size plus at most
    /// one factory attempt. Workers evicted along the way are pushed onto
    /// `doomed` for destruction after the lock is released.
    pub(crate) fn hire_locked(
        &self,
        core: &mut Core<W>,
        doomed: &mut Vec<Arc<W>>,
    ) -> Result<Arc<W>, WorkshopError> {
        loop {
            let candidate = core
                .hint
                .and_then(|id| core.registry.get(&id).map(|slot| (id, slot.job_num)));

            if core.registry.len() < self.config.max_quota
                && candidate.map_or(true, |(_, job_num)| job_num > 0)
            {
                // No reusable idle worker: grow instead of stacking jobs.
                let worker = Arc::new(self.build_worker()?);
                let id = worker_id(&worker);
                core.registry.insert(
                    id,
                    WorkerSlot {
                        worker: Arc::clone(&worker),
                        job_num: 1,
                        idle_expire: Instant::now(),
                    },
                );
                core.hint = Some(id);
                core.stats.created_total += 1;
                core.stats.worker_count += 1;
                core.stats.record_hire();
                return Ok(worker);
            }

            let (id, job_num) = match candidate {
                Some(candidate) => candidate,
                None => {
                    core.recompute_hint();
                    match core
                        .hint
                        .and_then(|id| core.registry.get(&id).map(|slot| (id, slot.job_num)))
                    {
                        Some(candidate) => candidate,
                        // Registry is empty; the growth arm handles it next pass.
                        None => continue,
                    }
                }
            };

            let healthy = core
                .registry
                .get(&id)
                .is_some_and(|slot| slot.worker.health());
            if !healthy {
                // Dead candidate: replace it transparently and retry.
                if job_num == 0 {
                    core.stats.idle_count -= 1;
                }
                if let Some(worker) = core.remove(id) {
                    doomed.push(worker);
                }
                continue;
            }

            if let Some(slot) = core.registry.get_mut(&id) {
                let was_idle = slot.job_num == 0;
                slot.job_num += 1;
                let worker = Arc::clone(&slot.worker);
                if was_idle {
                    core.stats.idle_count -= 1;
                    // The least-loaded slot just took a job; the hint is stale.
                    core.recompute_hint();
                }
                core.stats.record_hire();
                return Ok(worker);
            }
        }
    }

    /// Fire a known, busy slot under the pool lock.
    ///
    /// Returns the worker if it came back unhealthy and must be destroyed
    /// once the lock is released.
    pub(crate) fn fire_locked(&self, core: &mut Core<W>, id: WorkerId) -> Option<Arc<W>> {
        core.stats.record_fire();

        let (job_num, healthy) = {
            let slot = core.registry.get_mut(&id)?;
            slot.job_num -= 1;
            let healthy = if slot.job_num == 0 {
                slot.worker.health()
            } else {
                true
            };
            (slot.job_num, healthy)
        };

        if job_num == 0 {
            if !healthy {
                // Came back broken: drop it instead of idling it.
                return core.remove(id);
            }
            let idle_expire = Instant::now() + self.config.max_idle_duration;
            if let Some(slot) = core.registry.get_mut(&id) {
                slot.idle_expire = idle_expire;
            }
            core.stats.idle_count += 1;
        }

        // Incremental least-loaded update.
        let hint_job_num = core
            .hint
            .and_then(|hint| core.registry.get(&hint).map(|slot| slot.job_num));
        if hint_job_num.map_or(true, |hint_job_num| job_num < hint_job_num) {
            core.hint = Some(id);
        }
        None
    }

    /// Best-effort worker teardown; failures are logged, never propagated.
    pub(crate) fn destroy(&self, worker: &Arc<W>) {
        if let Err(error) = worker.close() {
            warn!("worker close failed: {}", error);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Capacity-bounded pool of reusable workers
///
/// Hands out the least-loaded live worker, growing through the factory up
/// to the quota. Workers idle past the configured timeout are evicted by a
/// background reaper; workers that fail their health probe are replaced
/// transparently. Every mutation publishes a stats snapshot readable
/// without locks via [`Workshop::stats`].
///
/// All operations are safe under full concurrency; share the workshop via
/// `Arc` or borrow it across tasks.
pub struct Workshop<W: Worker> {
    shared: Arc<Shared<W>>,
    stats_rx: watch::Receiver<WorkshopStats>,
    shutdown_tx: watch::Sender<bool>,
    /// Reaper task handle; doubles as the gate serializing closers
    reaper: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<W: Worker> Workshop<W> {
    /// Create a new workshop and start its reaper.
    ///
    /// Zero config values fall back to the defaults (quota 64, idle
    /// timeout 3 minutes). Must be called within a Tokio runtime.
    pub fn new<F>(config: WorkshopConfig, factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<W> + Send + Sync + 'static,
    {
        let config = config.normalized();
        let publisher = StatsPublisher::new();
        let stats_rx = publisher.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            max_quota = config.max_quota,
            max_idle_ms = config.max_idle_duration.as_millis() as u64,
            "starting workshop"
        );

        let shared = Arc::new(Shared {
            core: Mutex::new(Core::new(config.max_quota)),
            config,
            factory: Box::new(factory),
            publisher,
            shutdown_rx: shutdown_rx.clone(),
        });

        let reaper_handle = reaper::spawn(Arc::clone(&shared), shutdown_rx);

        Self {
            shared,
            stats_rx,
            shutdown_tx,
            reaper: tokio::sync::Mutex::new(Some(reaper_handle)),
        }
    }

    /// Hire a healthy worker, marking it with one more in-flight job.
    ///
    /// Prefers the least-loaded live worker; grows through the factory
    /// while under quota when no idle worker exists. At quota with every
    /// worker busy the least-loaded one is oversubscribed rather than
    /// blocking. The caller must hand the worker back with
    /// [`Workshop::fire`].
    pub fn hire(&self) -> Result<Arc<W>, WorkshopError> {
        let mut doomed = Vec::new();
        let result = {
            let mut core = self.shared.core.lock();
            if *self.shared.shutdown_rx.borrow() {
                return Err(WorkshopError::Closed);
            }
            let result = self.shared.hire_locked(&mut core, &mut doomed);
            self.shared.publisher.publish(core.stats);
            result
        };
        for worker in &doomed {
            self.shared.destroy(worker);
        }
        result
    }

    /// Return a hired worker, marking one job as done.
    ///
    /// A worker the registry does not recognize (already evicted, or never
    /// ours) is closed best-effort with no error and no stats change, so a
    /// double release is harmless. A worker whose last job just finished is
    /// health-probed: unhealthy workers are destroyed, healthy ones start
    /// their idle countdown.
    pub fn fire(&self, worker: &Arc<W>) {
        let id = worker_id(worker);
        let doomed = {
            let mut core = self.shared.core.lock();
            match core.registry.get(&id).map(|slot| slot.job_num) {
                None => {
                    drop(core);
                    debug!("fired unknown worker, closing it directly");
                    self.shared.destroy(worker);
                    return;
                }
                Some(0) => {
                    drop(core);
                    warn!("fired an idle worker again, ignoring");
                    return;
                }
                Some(_) => {}
            }
            let doomed = self.shared.fire_locked(&mut core, id);
            self.shared.publisher.publish(core.stats);
            doomed
        };
        if let Some(worker) = doomed {
            self.shared.destroy(&worker);
        }
    }

    /// Hire a worker, run `job` with it, and fire it on every exit path:
    /// normal return, error return, panic, or cancellation.
    ///
    /// The job runs outside the pool lock, concurrently with all other
    /// workshop activity. Hire failures surface as
    /// [`CallbackError::Workshop`] without invoking `job`; the job's own
    /// error is propagated unchanged as [`CallbackError::Job`].
    pub async fn callback<T, E, F, Fut>(&self, job: F) -> Result<T, CallbackError<E>>
    where
        F: FnOnce(Arc<W>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let worker = self.hire()?;
        let guard = FireGuard {
            workshop: self,
            worker: Arc::clone(&worker),
        };
        let result = job(worker).await;
        drop(guard);
        result.map_err(CallbackError::Job)
    }

    /// Shut the workshop down: drain, then destroy.
    ///
    /// Blocks until every previously hired worker has been fired, joins the
    /// reaper, then destroys each remaining worker exactly once and
    /// publishes the final snapshot. Idempotent and safe under concurrent
    /// invocation; every caller returns only once the workshop is fully
    /// closed. All subsequent hires fail with [`WorkshopError::Closed`].
    pub async fn close(&self) {
        if !self.shutdown_tx.send_replace(true) {
            info!("closing workshop");
        }

        // Serializes concurrent closers; late callers block here until the
        // first one finishes tearing down.
        let mut reaper = self.reaper.lock().await;

        // Drain: every hired worker must come back before anything dies.
        let mut stats_rx = self.stats_rx.clone();
        let _ = stats_rx.wait_for(|stats| stats.doing_count == 0).await;

        if let Some(handle) = reaper.take() {
            if let Err(error) = handle.await {
                warn!("reaper task failed: {}", error);
            }
        }

        let doomed = {
            let mut core = self.shared.core.lock();
            if core.torn_down {
                Vec::new()
            } else {
                core.torn_down = true;
                core.hint = None;
                let doomed: Vec<Arc<W>> = core
                    .registry
                    .drain()
                    .map(|(_, slot)| slot.worker)
                    .collect();
                core.stats.worker_count = 0;
                core.stats.idle_count = 0;
                core.stats.most_used_load = 0;
                core.stats.least_used_load = 0;
                self.shared.publisher.publish(core.stats);
                doomed
            }
        };

        if !doomed.is_empty() {
            info!(workers = doomed.len(), "destroying remaining workers");
        }
        for worker in &doomed {
            self.shared.destroy(worker);
        }
    }

    /// Current usage snapshot; never touches the pool lock.
    pub fn stats(&self) -> WorkshopStats {
        *self.stats_rx.borrow()
    }

    /// Live workers currently registered
    pub fn worker_count(&self) -> u32 {
        self.stats().worker_count
    }

    /// Whether shutdown has begun
    pub fn is_closed(&self) -> bool {
        *self.shared.shutdown_rx.borrow()
    }
}

/// Fires the held worker when dropped, covering panics and cancellation.
struct FireGuard<'a, W: Worker> {
    workshop: &'a Workshop<W>,
    worker: Arc<W>,
}

impl<W: Worker> Drop for FireGuard<'_, W> {
    fn drop(&mut self) {
        self.workshop.fire(&self.worker);
    }
}
