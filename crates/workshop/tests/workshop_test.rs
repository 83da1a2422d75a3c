//! Integration tests for the workshop lifecycle
//!
//! Run with: cargo test -p workshop --test workshop_test
//!
//! Eviction timing runs under the paused Tokio clock; the drain and
//! concurrency tests use real time with generous margins.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use workshop::{Worker, Workshop, WorkshopConfig, WorkshopError};

struct PoolWorker {
    healthy: Arc<AtomicBool>,
    closes: Arc<AtomicUsize>,
}

impl Worker for PoolWorker {
    fn health(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    fn close(&self) -> anyhow::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// One close counter per worker the factory ever builds
struct Fleet {
    closes: Mutex<Vec<Arc<AtomicUsize>>>,
}

impl Fleet {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            closes: Mutex::new(Vec::new()),
        })
    }

    fn total_closes(&self) -> usize {
        self.closes
            .lock()
            .unwrap()
            .iter()
            .map(|counter| counter.load(Ordering::SeqCst))
            .sum()
    }
}

/// Workshop whose factory registers one close counter per built worker
fn tracked_workshop(fleet: &Arc<Fleet>, config: WorkshopConfig) -> Workshop<PoolWorker> {
    let fleet = Arc::clone(fleet);
    Workshop::new(config, move || {
        let closes = Arc::new(AtomicUsize::new(0));
        fleet.closes.lock().unwrap().push(Arc::clone(&closes));
        Ok(PoolWorker {
            healthy: Arc::new(AtomicBool::new(true)),
            closes,
        })
    })
}

#[tokio::test(start_paused = true)]
async fn test_quota_two_full_lifecycle() {
    let fleet = Fleet::new();
    let shop = tracked_workshop(
        &fleet,
        WorkshopConfig::new()
            .with_max_quota(2)
            .with_max_idle_duration(Duration::from_millis(100)),
    );

    // Two sequential hires invoke the factory twice.
    let a = shop.hire().expect("first hire");
    let b = shop.hire().expect("second hire");
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(shop.stats().created_total, 2);

    // At quota with both busy, the third hire reuses an existing worker.
    let c = shop.hire().expect("third hire");
    assert!(Arc::ptr_eq(&c, &a) || Arc::ptr_eq(&c, &b));
    assert_eq!(shop.stats().created_total, 2);
    assert_eq!(shop.stats().doing_count, 3);

    shop.fire(&a);
    shop.fire(&b);
    shop.fire(&c);
    assert_eq!(shop.stats().doing_count, 0);
    assert_eq!(shop.stats().idle_count, 2);

    // Past the idle timeout, the next sweep evicts both, closing each once.
    tokio::time::sleep(Duration::from_millis(250)).await;
    let stats = shop.stats();
    assert_eq!(stats.worker_count, 0);
    assert_eq!(stats.idle_count, 0);
    assert_eq!(fleet.total_closes(), 2);
    for counter in fleet.closes.lock().unwrap().iter() {
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}

#[tokio::test]
async fn test_close_blocks_until_drained() {
    let fleet = Fleet::new();
    let shop = Arc::new(tracked_workshop(
        &fleet,
        WorkshopConfig::new()
            .with_max_quota(2)
            .with_max_idle_duration(Duration::from_secs(60)),
    ));

    let worker = shop.hire().expect("hire");

    let close_done = Arc::new(AtomicBool::new(false));
    let closer = {
        let shop = Arc::clone(&shop);
        let close_done = Arc::clone(&close_done);
        tokio::spawn(async move {
            shop.close().await;
            close_done.store(true, Ordering::SeqCst);
        })
    };

    // The closer must wait for the outstanding hire.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!close_done.load(Ordering::SeqCst));

    // New hires are already rejected while draining.
    assert!(matches!(shop.hire(), Err(WorkshopError::Closed)));
    assert_eq!(fleet.total_closes(), 0);

    shop.fire(&worker);
    closer.await.expect("closer task");
    assert!(close_done.load(Ordering::SeqCst));

    // The lone worker was destroyed exactly once, and the pool stays closed.
    assert_eq!(fleet.total_closes(), 1);
    assert_eq!(shop.stats().worker_count, 0);
    assert!(matches!(shop.hire(), Err(WorkshopError::Closed)));
}

#[tokio::test]
async fn test_concurrent_close_calls_destroy_once() {
    let fleet = Fleet::new();
    let shop = Arc::new(tracked_workshop(
        &fleet,
        WorkshopConfig::new()
            .with_max_quota(4)
            .with_max_idle_duration(Duration::from_secs(60)),
    ));

    let worker = shop.hire().expect("hire");
    shop.fire(&worker);

    let closers: Vec<_> = (0..4)
        .map(|_| {
            let shop = Arc::clone(&shop);
            tokio::spawn(async move { shop.close().await })
        })
        .collect();
    for closer in closers {
        closer.await.expect("closer task");
    }

    assert_eq!(fleet.total_closes(), 1);
    assert_eq!(shop.stats().worker_count, 0);
}

#[tokio::test]
async fn test_callback_fires_on_panic() {
    let fleet = Fleet::new();
    let shop = Arc::new(tracked_workshop(
        &fleet,
        WorkshopConfig::new()
            .with_max_quota(2)
            .with_max_idle_duration(Duration::from_secs(60)),
    ));

    let job = {
        let shop = Arc::clone(&shop);
        tokio::spawn(async move {
            shop.callback(|_worker| async move {
                if true {
                    panic!("job blew up");
                }
                Ok::<(), String>(())
            })
            .await
        })
    };

    let join_error = job.await.expect_err("job must panic");
    assert!(join_error.is_panic());

    // The worker was still fired and sits idle again.
    let stats = shop.stats();
    assert_eq!(stats.hire_total, 1);
    assert_eq!(stats.fire_total, 1);
    assert_eq!(stats.doing_count, 0);
    assert_eq!(stats.idle_count, 1);
    assert_eq!(fleet.total_closes(), 0);
}

#[tokio::test]
async fn test_unhealthy_worker_replaced_between_callbacks() {
    let fleet = Fleet::new();
    let shop = tracked_workshop(
        &fleet,
        WorkshopConfig::new()
            .with_max_quota(2)
            .with_max_idle_duration(Duration::from_secs(60)),
    );

    let sick = Arc::new(Mutex::new(None::<Arc<AtomicBool>>));
    let seen = Arc::clone(&sick);
    shop.callback(|worker| async move {
        *seen.lock().unwrap() = Some(Arc::clone(&worker.healthy));
        Ok::<(), String>(())
    })
    .await
    .expect("first callback");

    // The worker degrades while idle; the next hire replaces it silently.
    let healthy = sick.lock().unwrap().take().expect("probed worker");
    healthy.store(false, Ordering::SeqCst);

    shop.callback(|_worker| async move { Ok::<(), String>(()) })
        .await
        .expect("second callback");

    let stats = shop.stats();
    assert_eq!(stats.created_total, 2);
    assert_eq!(stats.worker_count, 1);
    assert_eq!(fleet.total_closes(), 1);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_concurrent_callbacks_hold_invariants() {
    const TASKS: usize = 8;
    const ROUNDS: usize = 16;
    const QUOTA: u32 = 4;

    let fleet = Fleet::new();
    let shop = Arc::new(tracked_workshop(
        &fleet,
        WorkshopConfig::new()
            .with_max_quota(QUOTA as usize)
            .with_max_idle_duration(Duration::from_secs(60)),
    ));

    let tasks: Vec<_> = (0..TASKS)
        .map(|_| {
            let shop = Arc::clone(&shop);
            tokio::spawn(async move {
                for _ in 0..ROUNDS {
                    shop.callback(|_worker| async move {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        Ok::<(), String>(())
                    })
                    .await
                    .expect("callback");

                    // Every snapshot honors the quota and the derived
                    // in-flight count.
                    let stats = shop.stats();
                    assert!(stats.worker_count <= QUOTA);
                    assert_eq!(stats.doing_count, stats.hire_total - stats.fire_total);
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.expect("worker task");
    }

    let stats = shop.stats();
    assert_eq!(stats.hire_total, (TASKS * ROUNDS) as u64);
    assert_eq!(stats.fire_total, (TASKS * ROUNDS) as u64);
    assert_eq!(stats.doing_count, 0);
    assert!(stats.worker_count <= QUOTA);

    shop.close().await;
    let stats = shop.stats();
    assert_eq!(stats.worker_count, 0);
    assert_eq!(stats.idle_count, 0);
    assert_eq!(fleet.total_closes(), fleet.closes.lock().unwrap().len());
}
