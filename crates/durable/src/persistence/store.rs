//! JobStore and JobSession trait definitions

use async_trait::async_trait;

use crate::job::{Event, Job, JobId, JobStatus, RequestId};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Job not found
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// The requested status change is not a legal lifecycle move
    #[error("invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    /// Database error
    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Whether this error reports an illegal lifecycle move
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }

    /// Whether this error reports a missing job
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::JobNotFound(_))
    }
}

/// Durable store for jobs and their event trails
///
/// The store itself only hands out sessions. Every worker acquires one
/// session for its whole lifetime; sessions are never shared between
/// workers and release their underlying resources when dropped.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Acquire an exclusive session
    async fn session(&self) -> Result<Box<dyn JobSession>, StoreError>;
}

/// A single worker's connection to the job store
///
/// Every write is atomic with respect to one job's status and events:
/// concurrent readers never observe a partial write.
#[async_trait]
pub trait JobSession: Send {
    /// Insert a new `Pending` job for the given work item and return its id
    async fn create_job(&mut self, request_id: RequestId) -> Result<JobId, StoreError>;

    /// Append an event to a job's trail
    ///
    /// The event timestamp is never earlier than the job's previous event.
    async fn append_event(&mut self, job_id: JobId, message: &str) -> Result<Event, StoreError>;

    /// Move a job to `status`, validated against the lifecycle state machine
    ///
    /// On failure the job is left unchanged.
    async fn transition(&mut self, job_id: JobId, status: JobStatus) -> Result<Job, StoreError>;

    /// Fetch a job
    async fn get(&mut self, job_id: JobId) -> Result<Job, StoreError>;

    /// A job's events in insertion order
    async fn events(&mut self, job_id: JobId) -> Result<Vec<Event>, StoreError>;
}
