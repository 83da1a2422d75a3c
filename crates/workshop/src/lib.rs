//! # Workshop
//!
//! A capacity-bounded pool of reusable workers for embedding inside a
//! higher-level serving system.
//!
//! ## Features
//!
//! - **Least-loaded assignment**: hires go to the worker believed to carry
//!   the fewest in-flight jobs, tracked incrementally with a lazily
//!   refreshed hint
//! - **Lazy growth**: workers are built on demand by a caller-supplied
//!   factory, never beyond the configured quota
//! - **Idle eviction**: a background reaper destroys workers that sat
//!   unused past the idle timeout
//! - **Transparent replacement**: workers that fail their health probe are
//!   silently removed and replaced, never surfaced to callers
//! - **Lock-free stats**: every mutation publishes an immutable snapshot
//!   that readers observe without touching the pool lock
//! - **Graceful shutdown**: [`Workshop::close`] drains all in-flight hires
//!   before destroying anything
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Workshop                           │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │                 registry (≤ quota)                  │  │
//! │  │   [slot: worker, job_num, idle_expire]  ...         │  │
//! │  │   hint ──► believed least-loaded slot               │  │
//! │  └────────────────────────────────────────────────────┘  │
//! │        ▲                  ▲                    │          │
//! │     hire/fire          Reaper              stats slot     │
//! │     callback        (idle eviction)     (watch channel)   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::time::Duration;
//! use workshop::{Worker, Workshop, WorkshopConfig};
//!
//! struct Conn { /* ... */ }
//!
//! impl Worker for Conn {
//!     fn health(&self) -> bool { /* cheap liveness check */ true }
//!     fn close(&self) -> anyhow::Result<()> { /* tear down */ Ok(()) }
//! }
//!
//! let shop = Workshop::new(
//!     WorkshopConfig::new()
//!         .with_max_quota(16)
//!         .with_max_idle_duration(Duration::from_secs(30)),
//!     || Ok(Conn { /* ... */ }),
//! );
//!
//! // Borrow a worker around a unit of work; it is returned on every exit path.
//! let reply = shop.callback(|conn| async move { conn.send(request).await }).await?;
//!
//! // ... later, graceful shutdown
//! shop.close().await;
//! ```

mod config;
mod error;
mod pool;
mod reaper;
mod stats;
mod worker;

pub use config::WorkshopConfig;
pub use error::{CallbackError, WorkshopError};
pub use pool::Workshop;
pub use stats::WorkshopStats;
pub use worker::Worker;
