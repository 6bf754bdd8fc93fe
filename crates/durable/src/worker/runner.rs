//! The per-worker fetch / process / record loop

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::handler::{JobContext, JobHandler, WorkError};
use super::poller::SourcePoller;
use crate::job::{JobId, JobStatus, RequestId};
use crate::persistence::{JobSession, StoreError};
use crate::queue::{WorkItem, WorkSource};

/// How long a worker sleeps after an empty fetch
pub const DEFAULT_FETCH_BACKOFF: Duration = Duration::from_secs(5);

/// Attempts at a status write before the job is abandoned
const TRANSITION_ATTEMPTS: u32 = 3;

/// Base delay between status write attempts, multiplied by the attempt number
const TRANSITION_RETRY_DELAY: Duration = Duration::from_millis(100);

/// What became of one fetched work item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Job reached `Completed`
    Completed,
    /// Job reached `Failed`
    Failed,
    /// A lifecycle write was rejected; the job was left where it was
    Abandoned,
    /// The job record could not be created; the item is lost
    Dropped,
}

/// Counters for one worker's lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub worker_id: String,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_abandoned: u64,
    pub items_dropped: u64,
    pub polls: u64,
    pub backoffs: u64,
}

impl WorkerReport {
    fn record(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Completed => self.jobs_completed += 1,
            JobOutcome::Failed => self.jobs_failed += 1,
            JobOutcome::Abandoned => self.jobs_abandoned += 1,
            JobOutcome::Dropped => self.items_dropped += 1,
        }
    }

    /// Jobs that reached a terminal state
    pub fn jobs_finished(&self) -> u64 {
        self.jobs_completed + self.jobs_failed
    }
}

/// One unit of concurrent execution
///
/// A worker owns its store session for its whole life and is the only
/// writer of the jobs it creates. It checks the stop token only between
/// jobs: once a job record exists, the worker drives it to the end.
pub struct Worker {
    id: String,
    session: Box<dyn JobSession>,
    poller: SourcePoller,
    handler: Arc<dyn JobHandler>,
    job_timeout: Option<Duration>,
    stop: CancellationToken,
    report: WorkerReport,
}

impl Worker {
    /// Create a new worker
    pub fn new(
        id: impl Into<String>,
        session: Box<dyn JobSession>,
        source: Arc<dyn WorkSource>,
        handler: Arc<dyn JobHandler>,
        stop: CancellationToken,
    ) -> Self {
        let id = id.into();
        Self {
            report: WorkerReport {
                worker_id: id.clone(),
                ..Default::default()
            },
            id,
            session,
            poller: SourcePoller::new(source, DEFAULT_FETCH_BACKOFF, stop.clone()),
            handler,
            job_timeout: None,
            stop,
        }
    }

    /// Set the sleep after an empty fetch
    pub fn with_fetch_backoff(mut self, backoff: Duration) -> Self {
        self.poller.set_backoff(backoff);
        self
    }

    /// Fail jobs whose handler runs longer than `timeout`
    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// The worker's identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run until a stop is requested, then release the session
    #[instrument(skip(self), fields(worker_id = %self.id))]
    pub async fn run(mut self) -> WorkerReport {
        info!("Worker started");

        loop {
            if self.poller.is_shutdown() {
                debug!("Stop requested, leaving loop");
                break;
            }

            let Some(item) = self.poller.poll().await else {
                if self.poller.wait().await {
                    break;
                }
                continue;
            };

            let outcome = self.process(item).await;
            self.report.record(outcome);
        }

        self.report.polls = self.poller.polls();
        self.report.backoffs = self.poller.backoffs();

        info!(
            completed = self.report.jobs_completed,
            failed = self.report.jobs_failed,
            abandoned = self.report.jobs_abandoned,
            dropped = self.report.items_dropped,
            "Worker stopped"
        );

        // The session is released when `self` drops here
        self.report
    }

    /// Drive one work item through the job lifecycle
    async fn process(&mut self, item: WorkItem) -> JobOutcome {
        let request_id = item.id;

        let job_id = match self.session.create_job(request_id).await {
            Ok(id) => id,
            Err(e) => {
                warn!(request_id, error = %e, "Failed to create job, dropping work item");
                return JobOutcome::Dropped;
            }
        };

        if let Err(e) = self.transition(job_id, JobStatus::Processing).await {
            self.abandon(job_id, request_id, &e).await;
            return JobOutcome::Abandoned;
        }
        self.record(
            job_id,
            &format!("started processing {} on worker {}", request_id, self.id),
        )
        .await;
        info!(job_id, request_id, "Processing job");

        let ctx = JobContext::new(job_id, request_id, self.id.clone(), self.stop.clone());
        let result = execute(self.handler.as_ref(), self.job_timeout, &ctx, &item).await;

        let (status, message) = match &result {
            Ok(()) => (
                JobStatus::Completed,
                format!("completed processing {} on worker {}", request_id, self.id),
            ),
            Err(e) => (
                JobStatus::Failed,
                format!("failed processing {}: {}", request_id, e),
            ),
        };

        if let Err(e) = self.transition(job_id, status).await {
            self.abandon(job_id, request_id, &e).await;
            return JobOutcome::Abandoned;
        }
        self.record(job_id, &message).await;

        match result {
            Ok(()) => {
                info!(job_id, request_id, "Job completed");
                JobOutcome::Completed
            }
            Err(e) => {
                warn!(job_id, request_id, error = %e, "Job failed");
                JobOutcome::Failed
            }
        }
    }

    /// Move the job to `status`, retrying store failures
    ///
    /// A rejected transition or a missing job is returned at once.
    async fn transition(&mut self, job_id: JobId, status: JobStatus) -> Result<(), StoreError> {
        let mut attempt = 1;
        loop {
            match self.session.transition(job_id, status).await {
                Ok(_) => return Ok(()),
                Err(e)
                    if e.is_invalid_transition()
                        || e.is_not_found()
                        || attempt >= TRANSITION_ATTEMPTS =>
                {
                    return Err(e)
                }
                Err(e) => {
                    warn!(job_id, %status, attempt, error = %e, "Failed to update job, retrying");
                    tokio::time::sleep(TRANSITION_RETRY_DELAY * attempt).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Give up on a job after its status could not be written
    async fn abandon(&mut self, job_id: JobId, request_id: RequestId, error: &StoreError) {
        if error.is_invalid_transition() {
            warn!(job_id, request_id, error = %error, "Invalid job transition, abandoning job");
        } else {
            error!(job_id, request_id, error = %error, "Failed to update job, abandoning job");
        }
        self.record(
            job_id,
            &format!(
                "abandoned processing {} on worker {}: {}",
                request_id, self.id, error
            ),
        )
        .await;
    }

    /// Append an event; a failed append degrades the trail but never the job
    async fn record(&mut self, job_id: JobId, message: &str) {
        if let Err(e) = self.session.append_event(job_id, message).await {
            warn!(job_id, error = %e, "Failed to append job event");
        }
    }
}

/// Run the handler, applying the deadline and containing panics
async fn execute(
    handler: &dyn JobHandler,
    job_timeout: Option<Duration>,
    ctx: &JobContext,
    item: &WorkItem,
) -> Result<(), WorkError> {
    let work = AssertUnwindSafe(handler.execute(ctx, item)).catch_unwind();

    let outcome = match job_timeout {
        Some(limit) => match tokio::time::timeout(limit, work).await {
            Ok(outcome) => outcome,
            Err(_) => return Err(WorkError::timed_out(limit)),
        },
        None => work.await,
    };

    outcome.unwrap_or_else(|panic| Err(WorkError::panicked(panic_message(&*panic))))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts() {
        let mut report = WorkerReport::default();
        report.record(JobOutcome::Completed);
        report.record(JobOutcome::Completed);
        report.record(JobOutcome::Failed);
        report.record(JobOutcome::Abandoned);
        report.record(JobOutcome::Dropped);

        assert_eq!(report.jobs_completed, 2);
        assert_eq!(report.jobs_failed, 1);
        assert_eq!(report.jobs_abandoned, 1);
        assert_eq!(report.items_dropped, 1);
        assert_eq!(report.jobs_finished(), 3);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*payload), "bang");

        let payload: Box<dyn Any + Send> = Box::new(17u8);
        assert_eq!(panic_message(&*payload), "unknown panic");
    }
}
