//! # Mammoth Durable
//!
//! A concurrent job-processing worker pool. Workers fetch work items from a
//! remote queue, record each one as a job with an append-only event trail,
//! run a pluggable handler and drive the job through its lifecycle.
//!
//! ## Features
//!
//! - **Job state machine**: `Pending -> Processing -> Completed | Failed`, enforced on every write
//! - **Pluggable storage**: PostgreSQL for production, in-memory for tests
//! - **HTTP work source**: pulls the next unhandled item from the queue service
//! - **Graceful shutdown**: a shared stop token; workers finish their current job before exiting
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Shutdown trigger                           │
//! │        (SIGINT, SIGTERM, `q` on stdin -> stop token)         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkerPool                              │
//! │  (N workers: fetch, create job, run handler, record events)  │
//! └─────────────────────────────────────────────────────────────┘
//!            │                                   │
//!            ▼                                   ▼
//! ┌───────────────────────────┐   ┌─────────────────────────────┐
//! │       WorkSource          │   │         JobStore             │
//! │  (HTTP queue service)     │   │  (PostgreSQL: jobs, events)  │
//! └───────────────────────────┘   └─────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use mammoth_durable::prelude::*;
//!
//! let store = Arc::new(InMemoryJobStore::new());
//! let source = Arc::new(HttpQueueClient::new(QueueClientConfig::default())?);
//! let handler = Arc::new(handler_fn(|_ctx, _item| async { Ok(()) }));
//!
//! let pool = WorkerPool::new(store, source, handler, WorkerPoolConfig::default());
//! pool.start().await?;
//! install_shutdown_handler(pool.stop_token(), ShutdownTriggers::default());
//! let report = pool.await_drain().await?;
//! ```

pub mod job;
pub mod persistence;
pub mod queue;
mod serde_util;
pub mod shutdown;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::job::{Event, Job, JobId, JobStatus, RequestId, TransitionError};
    pub use crate::persistence::{
        InMemoryJobStore, JobSession, JobStore, PostgresJobStore, StoreError,
    };
    pub use crate::queue::{HttpQueueClient, QueueClientConfig, SourceError, WorkItem, WorkSource};
    pub use crate::shutdown::{install_shutdown_handler, ShutdownTriggers};
    pub use crate::worker::{
        handler_fn, JobContext, JobHandler, PoolReport, WorkError, WorkerPool, WorkerPoolConfig,
        WorkerPoolError, WorkerPoolStatus,
    };
    pub use async_trait::async_trait;
}

// Re-export key types at crate root
pub use job::{Event, Job, JobId, JobStatus, RequestId, TransitionError};
pub use persistence::{InMemoryJobStore, JobSession, JobStore, PostgresJobStore, StoreError};
pub use queue::{HttpQueueClient, QueueClientConfig, SourceError, WorkItem, WorkSource};
pub use shutdown::{install_shutdown_handler, ShutdownTriggers};
pub use worker::{
    handler_fn, JobContext, JobHandler, PoolReport, WorkError, WorkerPool, WorkerPoolConfig,
    WorkerPoolError, WorkerPoolStatus,
};
