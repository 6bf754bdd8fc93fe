//! Worker pool for job processing
//!
//! This module provides:
//! - [`WorkerPool`] - Fixed-size pool coordinating the workers
//! - [`Worker`] - The fetch / process / record loop of a single worker
//! - [`SourcePoller`] - Work item polling with fixed backoff
//! - [`JobHandler`] - The pluggable work performed for each job
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                             │
//! │        (stop token, one store session per worker)            │
//! │                                                              │
//! │  ┌──────────────┐  ┌──────────────┐       ┌──────────────┐   │
//! │  │  worker-1    │  │  worker-2    │  ...  │  worker-N    │   │
//! │  │ ┌──────────┐ │  │ ┌──────────┐ │       │ ┌──────────┐ │   │
//! │  │ │  Poller  │ │  │ │  Poller  │ │       │ │  Poller  │ │   │
//! │  │ └────┬─────┘ │  │ └────┬─────┘ │       │ └────┬─────┘ │   │
//! │  │      ▼       │  │      ▼       │       │      ▼       │   │
//! │  │  JobHandler  │  │  JobHandler  │       │  JobHandler  │   │
//! │  │      │       │  │      │       │       │      │       │   │
//! │  │      ▼       │  │      ▼       │       │      ▼       │   │
//! │  │  JobSession  │  │  JobSession  │       │  JobSession  │   │
//! │  └──────────────┘  └──────────────┘       └──────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use mammoth_durable::worker::{handler_fn, WorkerPool, WorkerPoolConfig};
//!
//! let handler = handler_fn(|ctx, item| async move {
//!     tracing::info!(job_id = ctx.job_id, payload = %item.payload, "Handling item");
//!     Ok(())
//! });
//!
//! let pool = WorkerPool::new(store, source, Arc::new(handler), WorkerPoolConfig::new(4));
//! pool.start().await?;
//!
//! // Graceful shutdown
//! let report = pool.shutdown().await?;
//! ```

mod handler;
mod poller;
mod pool;
mod runner;

pub use handler::{handler_fn, FnHandler, JobContext, JobHandler, WorkError};
pub use poller::SourcePoller;
pub use pool::{
    default_pool_size, PoolReport, WorkerPool, WorkerPoolConfig, WorkerPoolError,
    WorkerPoolStatus,
};
pub use runner::{JobOutcome, Worker, WorkerReport, DEFAULT_FETCH_BACKOFF};
