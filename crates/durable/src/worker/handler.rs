//! Pluggable work handler

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::job::{JobId, RequestId};
use crate::queue::WorkItem;

/// Error type for work handler failures
///
/// Any failure terminates the job as `Failed`; the message ends up in the
/// job's event trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkError {
    /// Error message
    pub message: String,

    /// Error type/code for programmatic handling
    pub error_type: Option<String>,
}

impl WorkError {
    /// Create a new error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
        }
    }

    /// The handler ran past its deadline
    pub fn timed_out(limit: Duration) -> Self {
        Self::new(format!("timed out after {:?}", limit)).with_type("timeout")
    }

    /// The handler panicked
    pub fn panicked(message: impl Into<String>) -> Self {
        Self::new(format!("handler panicked: {}", message.into())).with_type("panic")
    }

    /// Set the error type
    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }
}

impl std::fmt::Display for WorkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for WorkError {}

impl From<anyhow::Error> for WorkError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{:#}", err))
    }
}

/// Context handed to a handler for one job
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Job being processed
    pub job_id: JobId,

    /// Upstream work item the job was created for
    pub request_id: RequestId,

    /// Worker executing the job
    pub worker_id: String,

    stop: CancellationToken,
}

impl JobContext {
    /// Create a new job context
    pub fn new(
        job_id: JobId,
        request_id: RequestId,
        worker_id: impl Into<String>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            job_id,
            request_id,
            worker_id: worker_id.into(),
            stop,
        }
    }

    /// Whether the pool has been asked to stop
    ///
    /// Purely informational: the worker finishes this job regardless. Long
    /// handlers may use it to wrap up early and report a result.
    pub fn is_stop_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Resolves once the pool has been asked to stop
    pub async fn stop_requested(&self) {
        self.stop.cancelled().await
    }
}

/// The work performed for each job
///
/// # Example
///
/// ```ignore
/// use mammoth_durable::prelude::*;
///
/// struct Echo;
///
/// #[async_trait]
/// impl JobHandler for Echo {
///     async fn execute(&self, ctx: &JobContext, item: &WorkItem) -> Result<(), WorkError> {
///         tracing::info!(job_id = ctx.job_id, payload = %item.payload, "echo");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Process one work item
    async fn execute(&self, ctx: &JobContext, item: &WorkItem) -> Result<(), WorkError>;
}

/// [`JobHandler`] built from an async closure, see [`handler_fn`]
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as a [`JobHandler`]
///
/// The closure receives owned copies of the context and item.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(JobContext, WorkItem) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), WorkError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobContext, WorkItem) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), WorkError>> + Send + 'static,
{
    async fn execute(&self, ctx: &JobContext, item: &WorkItem) -> Result<(), WorkError> {
        (self.f)(ctx.clone(), item.clone()).await
    }
}
