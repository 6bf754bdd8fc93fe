//! Job and event records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::{JobStatus, TransitionError};

/// Store-assigned job identifier
pub type JobId = i64;

/// Store-assigned event identifier
pub type EventId = i64;

/// Identifier of the upstream work item a job was created for
pub type RequestId = i64;

/// Durable record of one work item's processing lifecycle
///
/// `finished_at` is set exactly when `status` is terminal, and
/// `modified_at` never precedes `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub request_id: RequestId,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A freshly created `Pending` job
    pub fn new(id: JobId, request_id: RequestId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            request_id,
            status: JobStatus::Pending,
            created_at: now,
            modified_at: now,
            finished_at: None,
        }
    }

    /// Move the job to `next`, stamping `modified_at` and, for terminal
    /// states, `finished_at`
    ///
    /// The job is left untouched when the move is illegal.
    pub fn apply_transition(
        &mut self,
        next: JobStatus,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.status = self.status.transition_to(next)?;
        self.modified_at = now.max(self.created_at);
        if next.is_terminal() {
            self.finished_at = Some(self.modified_at);
        }
        Ok(())
    }

    /// Whether the job reached `Completed` or `Failed`
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Immutable, timestamped note in a job's audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub job_id: JobId,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_job_is_pending() {
        let now = Utc::now();
        let job = Job::new(1, 42, now);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.request_id, 42);
        assert_eq!(job.created_at, job.modified_at);
        assert!(job.finished_at.is_none());
    }

    #[test]
    fn test_terminal_transition_sets_finished_at() {
        let created = Utc::now();
        let mut job = Job::new(1, 42, created);

        job.apply_transition(JobStatus::Processing, created + Duration::seconds(1))
            .unwrap();
        assert!(job.finished_at.is_none());
        assert!(!job.is_finished());

        let done = created + Duration::seconds(5);
        job.apply_transition(JobStatus::Completed, done).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.modified_at, done);
        assert_eq!(job.finished_at, Some(done));
        assert!(job.is_finished());
    }

    #[test]
    fn test_illegal_transition_leaves_job_unchanged() {
        let mut job = Job::new(7, 3, Utc::now());
        let before = job.clone();

        let err = job
            .apply_transition(JobStatus::Completed, Utc::now())
            .unwrap_err();
        assert_eq!(err.from, JobStatus::Pending);
        assert_eq!(job, before);
    }

    #[test]
    fn test_modified_at_never_precedes_created_at() {
        let created = Utc::now();
        let mut job = Job::new(1, 1, created);

        // Clock stepped backwards between writes
        job.apply_transition(JobStatus::Processing, created - Duration::seconds(30))
            .unwrap();
        assert_eq!(job.modified_at, created);
    }
}
