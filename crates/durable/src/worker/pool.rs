//! Worker pool coordinator
//!
//! Spawns a fixed number of workers, propagates the stop request and waits
//! for every worker to drain.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use super::handler::JobHandler;
use super::runner::{Worker, WorkerReport, DEFAULT_FETCH_BACKOFF};
use crate::persistence::{JobStore, StoreError};
use crate::queue::WorkSource;

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerPoolConfig {
    /// Number of workers
    pub pool_size: usize,

    /// Sleep after an empty or failed fetch
    #[serde(with = "crate::serde_util::duration_millis")]
    pub fetch_backoff: Duration,

    /// Optional deadline for a single job's handler
    #[serde(with = "crate::serde_util::option_duration_millis")]
    pub job_timeout: Option<Duration>,

    /// Prefix for worker IDs (`<prefix>-1`, `<prefix>-2`, ...)
    pub worker_id_prefix: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            fetch_backoff: DEFAULT_FETCH_BACKOFF,
            job_timeout: None,
            worker_id_prefix: "worker".to_string(),
        }
    }
}

impl WorkerPoolConfig {
    /// Create a new worker pool configuration with the given number of workers
    pub fn new(pool_size: usize) -> Self {
        Self::default().with_pool_size(pool_size)
    }

    /// Set the number of workers
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size.max(1);
        self
    }

    /// Set the fetch backoff
    pub fn with_fetch_backoff(mut self, backoff: Duration) -> Self {
        self.fetch_backoff = backoff;
        self
    }

    /// Set the per-job deadline
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    /// Set the worker ID prefix
    pub fn with_worker_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.worker_id_prefix = prefix.into();
        self
    }
}

/// One worker per available CPU
pub fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Worker pool status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPoolStatus {
    /// Created, not started yet
    Idle,
    /// Workers are running and accepting work
    Running,
    /// Stop requested; workers finish their current job and exit
    Draining,
    /// Every worker has exited
    Stopped,
}

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Pool already started
    #[error("worker pool is already running")]
    AlreadyRunning,

    /// Pool already drained; a pool runs once
    #[error("worker pool has already stopped")]
    AlreadyStopped,

    /// Pool never started
    #[error("worker pool is not running")]
    NotRunning,
}

/// Summary returned once the pool has drained
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolReport {
    /// One report per worker that exited normally
    pub workers: Vec<WorkerReport>,

    /// Workers whose task ended abnormally
    pub crashed_workers: usize,
}

impl PoolReport {
    /// Jobs completed across all workers
    pub fn jobs_completed(&self) -> u64 {
        self.workers.iter().map(|w| w.jobs_completed).sum()
    }

    /// Jobs failed across all workers
    pub fn jobs_failed(&self) -> u64 {
        self.workers.iter().map(|w| w.jobs_failed).sum()
    }

    /// Jobs abandoned across all workers
    pub fn jobs_abandoned(&self) -> u64 {
        self.workers.iter().map(|w| w.jobs_abandoned).sum()
    }

    /// Work items lost because their job could not be created
    pub fn items_dropped(&self) -> u64 {
        self.workers.iter().map(|w| w.items_dropped).sum()
    }
}

/// Fixed-size pool of workers sharing one stop token
///
/// # Example
///
/// ```ignore
/// use mammoth_durable::prelude::*;
///
/// let pool = WorkerPool::new(store, source, handler, WorkerPoolConfig::new(4));
/// pool.start().await?;
///
/// // ... later, from a signal handler or operator command
/// pool.request_stop();
/// let report = pool.await_drain().await?;
/// ```
pub struct WorkerPool {
    store: Arc<dyn JobStore>,
    source: Arc<dyn WorkSource>,
    handler: Arc<dyn JobHandler>,
    config: WorkerPoolConfig,
    stop: CancellationToken,
    status: RwLock<WorkerPoolStatus>,
    handles: Mutex<Vec<JoinHandle<WorkerReport>>>,
}

impl WorkerPool {
    /// Create a new worker pool
    pub fn new(
        store: Arc<dyn JobStore>,
        source: Arc<dyn WorkSource>,
        handler: Arc<dyn JobHandler>,
        config: WorkerPoolConfig,
    ) -> Self {
        Self {
            store,
            source,
            handler,
            config,
            stop: CancellationToken::new(),
            status: RwLock::new(WorkerPoolStatus::Idle),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Acquire one store session per worker and spawn the workers
    ///
    /// Fails without spawning anything if any session cannot be acquired.
    /// The handle list stays locked until every worker is spawned, so a
    /// concurrent [`await_drain`](Self::await_drain) waits for them.
    #[instrument(skip(self), fields(pool_size = self.config.pool_size))]
    pub async fn start(&self) -> Result<(), WorkerPoolError> {
        let mut handles = self.handles.lock().await;

        match *self.status.read() {
            WorkerPoolStatus::Idle => {}
            WorkerPoolStatus::Running | WorkerPoolStatus::Draining => {
                return Err(WorkerPoolError::AlreadyRunning)
            }
            WorkerPoolStatus::Stopped => return Err(WorkerPoolError::AlreadyStopped),
        }

        info!(
            pool_size = self.config.pool_size,
            fetch_backoff_ms = self.config.fetch_backoff.as_millis(),
            "Starting worker pool"
        );

        let mut sessions = Vec::with_capacity(self.config.pool_size);
        for _ in 0..self.config.pool_size {
            match self.store.session().await {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    error!(error = %e, "Failed to acquire store session");
                    return Err(e.into());
                }
            }
        }

        for (index, session) in sessions.into_iter().enumerate() {
            let worker = Worker::new(
                format!("{}-{}", self.config.worker_id_prefix, index + 1),
                session,
                Arc::clone(&self.source),
                Arc::clone(&self.handler),
                self.stop.clone(),
            )
            .with_fetch_backoff(self.config.fetch_backoff)
            .with_job_timeout(self.config.job_timeout);

            handles.push(tokio::spawn(worker.run()));
        }
        *self.status.write() = WorkerPoolStatus::Running;

        Ok(())
    }

    /// Ask every worker to stop after its current job
    ///
    /// Idempotent; the stop cannot be undone.
    pub fn request_stop(&self) {
        if !self.stop.is_cancelled() {
            info!("Stop requested, draining workers");
        }
        self.stop.cancel();
    }

    /// Wait until every worker has exited and released its session
    ///
    /// Does not request a stop by itself. Waits for an in-progress
    /// [`start`](Self::start) to finish spawning first.
    pub async fn await_drain(&self) -> Result<PoolReport, WorkerPoolError> {
        let mut handles = self.handles.lock().await;

        if *self.status.read() == WorkerPoolStatus::Idle {
            return Err(WorkerPoolError::NotRunning);
        }

        let mut report = PoolReport::default();
        for result in futures::future::join_all(handles.drain(..)).await {
            match result {
                Ok(worker) => report.workers.push(worker),
                Err(e) => {
                    error!(error = %e, "Worker task ended abnormally");
                    report.crashed_workers += 1;
                }
            }
        }

        *self.status.write() = WorkerPoolStatus::Stopped;

        info!(
            completed = report.jobs_completed(),
            failed = report.jobs_failed(),
            abandoned = report.jobs_abandoned(),
            "Worker pool drained"
        );
        Ok(report)
    }

    /// Request a stop and wait for the drain
    pub async fn shutdown(&self) -> Result<PoolReport, WorkerPoolError> {
        self.request_stop();
        self.await_drain().await
    }

    /// Token that stops the pool when cancelled
    ///
    /// Hand this to a shutdown trigger.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Get current status
    ///
    /// A running pool whose stop token has been cancelled, by
    /// [`request_stop`](Self::request_stop) or by anyone holding the token,
    /// reports `Draining`.
    pub fn status(&self) -> WorkerPoolStatus {
        match *self.status.read() {
            WorkerPoolStatus::Running if self.stop.is_cancelled() => WorkerPoolStatus::Draining,
            status => status,
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkerPoolConfig::default();
        assert!(config.pool_size >= 1);
        assert_eq!(config.pool_size, default_pool_size());
        assert_eq!(config.fetch_backoff, Duration::from_secs(5));
        assert!(config.job_timeout.is_none());
        assert_eq!(config.worker_id_prefix, "worker");
    }

    #[test]
    fn test_config_builder() {
        let config = WorkerPoolConfig::new(3)
            .with_fetch_backoff(Duration::from_millis(250))
            .with_job_timeout(Duration::from_secs(30))
            .with_worker_id_prefix("mammoth");

        assert_eq!(config.pool_size, 3);
        assert_eq!(config.fetch_backoff, Duration::from_millis(250));
        assert_eq!(config.job_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.worker_id_prefix, "mammoth");
    }

    #[test]
    fn test_pool_size_at_least_one() {
        assert_eq!(WorkerPoolConfig::new(0).pool_size, 1);
    }

    #[test]
    fn test_config_serde() {
        let config = WorkerPoolConfig::new(2).with_job_timeout(Duration::from_secs(1));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["fetch_backoff"], 5000);
        assert_eq!(json["job_timeout"], 1000);

        let back: WorkerPoolConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_report_totals() {
        let report = PoolReport {
            workers: vec![
                WorkerReport {
                    worker_id: "worker-1".into(),
                    jobs_completed: 3,
                    jobs_failed: 1,
                    ..Default::default()
                },
                WorkerReport {
                    worker_id: "worker-2".into(),
                    jobs_completed: 2,
                    jobs_abandoned: 1,
                    items_dropped: 4,
                    ..Default::default()
                },
            ],
            crashed_workers: 0,
        };

        assert_eq!(report.jobs_completed(), 5);
        assert_eq!(report.jobs_failed(), 1);
        assert_eq!(report.jobs_abandoned(), 1);
        assert_eq!(report.items_dropped(), 4);
    }
}
