//! Error types surfaced to workshop callers
//!
//! Health-probe failures and worker close failures are deliberately absent:
//! the former trigger silent replacement, the latter are logged and dropped.

/// Workshop errors
#[derive(Debug, thiserror::Error)]
pub enum WorkshopError {
    /// Shutdown has begun; no new workers are handed out
    #[error("workshop is closed")]
    Closed,

    /// The worker factory returned an error or panicked
    ///
    /// Never retried internally; the caller may retry the hire.
    #[error("worker factory failed: {0}")]
    Factory(#[source] anyhow::Error),
}

/// Error from [`Workshop::callback`](crate::Workshop::callback)
///
/// Distinguishes "the pool could not supply a worker" (the job never ran)
/// from "the job itself failed" (its error is propagated unchanged).
#[derive(Debug, thiserror::Error)]
pub enum CallbackError<E> {
    /// Hiring failed; the job was never invoked
    #[error(transparent)]
    Workshop(#[from] WorkshopError),

    /// The job ran and returned this error
    #[error("job failed: {0}")]
    Job(E),
}
