//! The poolable-resource contract

use std::sync::Arc;

/// A poolable resource: a connection, an interpreter, a subprocess handle.
///
/// `health` should be cheap and non-blocking; returning `false` means
/// "evict me at the next opportunity", not an immediate escalation. A
/// failing `close` is logged and never blocks pool operations.
///
/// Workers must not be zero-sized types: the pool keys its registry by the
/// worker's heap address, and all zero-sized values share one address.
pub trait Worker: Send + Sync + 'static {
    /// Whether this worker can still take jobs
    fn health(&self) -> bool;

    /// Release the underlying resource
    fn close(&self) -> anyhow::Result<()>;
}

/// Builds a fresh worker on demand, up to the pool quota
pub(crate) type WorkerFactory<W> = Box<dyn Fn() -> anyhow::Result<W> + Send + Sync>;

/// Registry key: the address of the worker's `Arc` allocation.
///
/// Addresses are stable while the worker is reachable, and a caller can
/// only fire a worker it still holds, so a recycled address can never be
/// confused with an evicted worker.
pub(crate) type WorkerId = usize;

pub(crate) fn worker_id<W>(worker: &Arc<W>) -> WorkerId {
    Arc::as_ptr(worker) as usize
}
