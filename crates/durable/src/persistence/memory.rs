//! In-memory implementation of JobStore for testing

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use super::store::*;
use crate::job::{Event, Job, JobId, JobStatus, RequestId};

/// Internal job state: the record plus its trail
struct JobRecord {
    job: Job,
    events: Vec<Event>,
}

struct MemoryState {
    jobs: RwLock<BTreeMap<JobId, JobRecord>>,
    next_job_id: AtomicI64,
    next_event_id: AtomicI64,
    open_sessions: AtomicUsize,
}

/// In-memory implementation of JobStore
///
/// This is primarily for testing. It stores all data in memory and
/// provides the same semantics as the PostgreSQL implementation: each job's
/// record and trail are updated under one write lock, so readers never see
/// a half-applied write.
///
/// Cloning the store yields another handle to the same data.
///
/// # Example
///
/// ```
/// use mammoth_durable::InMemoryJobStore;
///
/// let store = InMemoryJobStore::new();
/// assert_eq!(store.job_count(), 0);
/// ```
#[derive(Clone)]
pub struct InMemoryJobStore {
    state: Arc<MemoryState>,
}

impl InMemoryJobStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            state: Arc::new(MemoryState {
                jobs: RwLock::new(BTreeMap::new()),
                next_job_id: AtomicI64::new(1),
                next_event_id: AtomicI64::new(1),
                open_sessions: AtomicUsize::new(0),
            }),
        }
    }

    /// Open a session without going through the trait object
    pub fn open_session(&self) -> InMemoryJobSession {
        self.state.open_sessions.fetch_add(1, Ordering::SeqCst);
        InMemoryJobSession {
            state: Arc::clone(&self.state),
        }
    }

    /// Get the number of jobs
    pub fn job_count(&self) -> usize {
        self.state.jobs.read().len()
    }

    /// Get the number of jobs in the given status
    pub fn count_with_status(&self, status: JobStatus) -> usize {
        self.state
            .jobs
            .read()
            .values()
            .filter(|r| r.job.status == status)
            .count()
    }

    /// Snapshot of every job, ordered by id
    pub fn jobs(&self) -> Vec<Job> {
        self.state
            .jobs
            .read()
            .values()
            .map(|r| r.job.clone())
            .collect()
    }

    /// Number of sessions currently held
    pub fn open_sessions(&self) -> usize {
        self.state.open_sessions.load(Ordering::SeqCst)
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.state.jobs.write().clear();
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn session(&self) -> Result<Box<dyn JobSession>, StoreError> {
        Ok(Box::new(self.open_session()))
    }
}

/// Session on an [`InMemoryJobStore`]
pub struct InMemoryJobSession {
    state: Arc<MemoryState>,
}

impl Drop for InMemoryJobSession {
    fn drop(&mut self) {
        self.state.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobSession for InMemoryJobSession {
    async fn create_job(&mut self, request_id: RequestId) -> Result<JobId, StoreError> {
        let job_id = self.state.next_job_id.fetch_add(1, Ordering::SeqCst);
        let mut jobs = self.state.jobs.write();
        jobs.insert(
            job_id,
            JobRecord {
                job: Job::new(job_id, request_id, Utc::now()),
                events: vec![],
            },
        );
        Ok(job_id)
    }

    async fn append_event(&mut self, job_id: JobId, message: &str) -> Result<Event, StoreError> {
        let mut jobs = self.state.jobs.write();
        let record = jobs
            .get_mut(&job_id)
            .ok_or(StoreError::JobNotFound(job_id))?;

        let now = Utc::now();
        let timestamp = record
            .events
            .last()
            .map_or(now, |last| now.max(last.timestamp));

        let event = Event {
            id: self.state.next_event_id.fetch_add(1, Ordering::SeqCst),
            job_id,
            timestamp,
            message: message.to_string(),
        };
        record.events.push(event.clone());
        Ok(event)
    }

    async fn transition(&mut self, job_id: JobId, status: JobStatus) -> Result<Job, StoreError> {
        let mut jobs = self.state.jobs.write();
        let record = jobs
            .get_mut(&job_id)
            .ok_or(StoreError::JobNotFound(job_id))?;

        record
            .job
            .apply_transition(status, Utc::now())
            .map_err(|e| StoreError::InvalidTransition {
                job_id,
                from: e.from,
                to: e.to,
            })?;
        Ok(record.job.clone())
    }

    async fn get(&mut self, job_id: JobId) -> Result<Job, StoreError> {
        let jobs = self.state.jobs.read();
        jobs.get(&job_id)
            .map(|r| r.job.clone())
            .ok_or(StoreError::JobNotFound(job_id))
    }

    async fn events(&mut self, job_id: JobId) -> Result<Vec<Event>, StoreError> {
        let jobs = self.state.jobs.read();
        jobs.get(&job_id)
            .map(|r| r.events.clone())
            .ok_or(StoreError::JobNotFound(job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_get_job() {
        let store = InMemoryJobStore::new();
        let mut session = store.open_session();

        let job_id = session.create_job(42).await.unwrap();
        let job = session.get(job_id).await.unwrap();

        assert_eq!(job.id, job_id);
        assert_eq!(job.request_id, 42);
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.finished_at.is_none());
        assert_eq!(store.job_count(), 1);
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let store = InMemoryJobStore::new();
        let mut session = store.open_session();

        let a = session.create_job(1).await.unwrap();
        let b = session.create_job(1).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_missing_job() {
        let store = InMemoryJobStore::new();
        let mut session = store.open_session();

        assert!(matches!(
            session.get(99).await,
            Err(StoreError::JobNotFound(99))
        ));
        assert!(session.append_event(99, "hello").await.unwrap_err().is_not_found());
        assert!(session
            .transition(99, JobStatus::Processing)
            .await
            .unwrap_err()
            .is_not_found());
        assert!(session.events(99).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let store = InMemoryJobStore::new();
        let mut session = store.open_session();
        let job_id = session.create_job(5).await.unwrap();

        let job = session.transition(job_id, JobStatus::Processing).await.unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.finished_at.is_none());

        let job = session.transition(job_id, JobStatus::Failed).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.finished_at.is_some());
        assert!(job.modified_at >= job.created_at);
        assert_eq!(store.count_with_status(JobStatus::Failed), 1);
    }

    #[tokio::test]
    async fn test_invalid_transition_leaves_job_unchanged() {
        let store = InMemoryJobStore::new();
        let mut session = store.open_session();
        let job_id = session.create_job(5).await.unwrap();
        let before = session.get(job_id).await.unwrap();

        let err = session
            .transition(job_id, JobStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                from: JobStatus::Pending,
                to: JobStatus::Completed,
                ..
            }
        ));
        assert_eq!(session.get(job_id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let store = InMemoryJobStore::new();
        let mut first = store.open_session();
        let mut second = store.open_session();
        let job_id = first.create_job(8).await.unwrap();

        first.transition(job_id, JobStatus::Processing).await.unwrap();
        let err = second
            .transition(job_id, JobStatus::Processing)
            .await
            .unwrap_err();
        assert!(err.is_invalid_transition());
    }

    #[tokio::test]
    async fn test_events_are_ordered() {
        let store = InMemoryJobStore::new();
        let mut session = store.open_session();
        let job_id = session.create_job(1).await.unwrap();

        for i in 0..20 {
            session
                .append_event(job_id, &format!("step {}", i))
                .await
                .unwrap();
        }

        let events = session.events(job_id).await.unwrap();
        assert_eq!(events.len(), 20);
        for (i, pair) in events.windows(2).enumerate() {
            assert!(pair[0].timestamp <= pair[1].timestamp);
            assert!(pair[0].id < pair[1].id);
            assert_eq!(pair[0].message, format!("step {}", i));
        }
        assert!(events.iter().all(|e| e.job_id == job_id));
    }

    #[tokio::test]
    async fn test_events_belong_to_one_job() {
        let store = InMemoryJobStore::new();
        let mut session = store.open_session();
        let a = session.create_job(1).await.unwrap();
        let b = session.create_job(2).await.unwrap();

        session.append_event(a, "for a").await.unwrap();
        session.append_event(b, "for b").await.unwrap();

        let events = session.events(a).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "for a");
    }

    #[tokio::test]
    async fn test_session_release() {
        let store = InMemoryJobStore::new();
        assert_eq!(store.open_sessions(), 0);

        let first = store.session().await.unwrap();
        let second = store.session().await.unwrap();
        assert_eq!(store.open_sessions(), 2);

        drop(first);
        assert_eq!(store.open_sessions(), 1);
        drop(second);
        assert_eq!(store.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_sessions() {
        let store = InMemoryJobStore::new();

        let mut handles = vec![];
        for worker in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut session = store.open_session();
                for i in 0..25 {
                    let job_id = session.create_job(worker * 100 + i).await.unwrap();
                    session.transition(job_id, JobStatus::Processing).await.unwrap();
                    session.append_event(job_id, "working").await.unwrap();
                    session.transition(job_id, JobStatus::Completed).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.job_count(), 200);
        assert_eq!(store.count_with_status(JobStatus::Completed), 200);
        assert!(store.jobs().iter().all(|j| j.finished_at.is_some()));
        assert_eq!(store.open_sessions(), 0);
    }
}
