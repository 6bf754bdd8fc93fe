//! PostgreSQL implementation of JobStore
//!
//! Production persistence using PostgreSQL with:
//! - One pooled connection held per worker session
//! - Row locks (`SELECT ... FOR UPDATE`) serializing writes to a single job
//! - Transactions around every multi-statement write

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgRow;
use sqlx::{Connection, PgPool, Postgres, Row};
use tracing::{debug, error, instrument};

use super::store::*;
use crate::job::{Event, Job, JobId, JobStatus, RequestId};

/// PostgreSQL implementation of JobStore
///
/// Every session checks one connection out of the pool and keeps it until
/// the session is dropped, so the pool should allow at least one connection
/// per worker.
///
/// # Example
///
/// ```ignore
/// use mammoth_durable::PostgresJobStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/mammoth").await?;
/// let store = PostgresJobStore::new(pool);
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `jobs` and `events` tables if they do not exist
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to apply migrations: {}", e);
                StoreError::Database(e.to_string())
            })
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn session(&self) -> Result<Box<dyn JobSession>, StoreError> {
        let conn = self.pool.acquire().await.map_err(|e| {
            error!("Failed to acquire connection: {}", e);
            StoreError::Database(e.to_string())
        })?;
        Ok(Box::new(PostgresJobSession { conn }))
    }
}

/// Session on a [`PostgresJobStore`], owning one pooled connection
///
/// The connection goes back to the pool when the session is dropped.
pub struct PostgresJobSession {
    conn: PoolConnection<Postgres>,
}

#[async_trait]
impl JobSession for PostgresJobSession {
    #[instrument(skip(self))]
    async fn create_job(&mut self, request_id: RequestId) -> Result<JobId, StoreError> {
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO jobs (request_id, status, created_at, modified_at)
            VALUES ($1, $2, $3, $3)
            RETURNING id
            "#,
        )
        .bind(request_id)
        .bind(JobStatus::Pending.as_str())
        .bind(now)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(|e| {
            error!("Failed to create job: {}", e);
            StoreError::Database(e.to_string())
        })?;

        let job_id: JobId = row.get("id");
        debug!(%job_id, %request_id, "created job");
        Ok(job_id)
    }

    #[instrument(skip(self, message))]
    async fn append_event(&mut self, job_id: JobId, message: &str) -> Result<Event, StoreError> {
        let mut tx = self.conn.begin().await.map_err(db_error)?;

        // Lock the job row so appends to one job are serialized
        sqlx::query("SELECT id FROM jobs WHERE id = $1 FOR UPDATE")
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?
            .ok_or(StoreError::JobNotFound(job_id))?;

        let last: Option<DateTime<Utc>> =
            sqlx::query("SELECT MAX(timestamp) AS last FROM events WHERE job_id = $1")
                .bind(job_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(db_error)?
                .get("last");

        let now = Utc::now();
        let timestamp = last.map_or(now, |last| now.max(last));

        let row = sqlx::query(
            r#"
            INSERT INTO events (job_id, timestamp, message)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(job_id)
        .bind(timestamp)
        .bind(message)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to append event: {}", e);
            StoreError::Database(e.to_string())
        })?;

        tx.commit().await.map_err(db_error)?;

        Ok(Event {
            id: row.get("id"),
            job_id,
            timestamp,
            message: message.to_string(),
        })
    }

    #[instrument(skip(self))]
    async fn transition(&mut self, job_id: JobId, status: JobStatus) -> Result<Job, StoreError> {
        let mut tx = self.conn.begin().await.map_err(db_error)?;

        let row = sqlx::query(
            r#"
            SELECT id, request_id, status, created_at, modified_at, finished_at
            FROM jobs
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?
        .ok_or(StoreError::JobNotFound(job_id))?;

        let mut job = job_from_row(&row)?;
        job.apply_transition(status, Utc::now())
            .map_err(|e| StoreError::InvalidTransition {
                job_id,
                from: e.from,
                to: e.to,
            })?;

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2,
                modified_at = $3,
                finished_at = $4
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(job.status.as_str())
        .bind(job.modified_at)
        .bind(job.finished_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to update job status: {}", e);
            StoreError::Database(e.to_string())
        })?;

        tx.commit().await.map_err(db_error)?;

        debug!(%job_id, status = %job.status, "transitioned job");
        Ok(job)
    }

    #[instrument(skip(self))]
    async fn get(&mut self, job_id: JobId) -> Result<Job, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, request_id, status, created_at, modified_at, finished_at
            FROM jobs
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(|e| {
            error!("Failed to get job: {}", e);
            StoreError::Database(e.to_string())
        })?
        .ok_or(StoreError::JobNotFound(job_id))?;

        job_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn events(&mut self, job_id: JobId) -> Result<Vec<Event>, StoreError> {
        let mut tx = self.conn.begin().await.map_err(db_error)?;

        sqlx::query("SELECT id FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?
            .ok_or(StoreError::JobNotFound(job_id))?;

        let rows = sqlx::query(
            r#"
            SELECT id, job_id, timestamp, message
            FROM events
            WHERE job_id = $1
            ORDER BY id
            "#,
        )
        .bind(job_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to load events: {}", e);
            StoreError::Database(e.to_string())
        })?;

        tx.commit().await.map_err(db_error)?;

        Ok(rows
            .iter()
            .map(|row| Event {
                id: row.get("id"),
                job_id: row.get("job_id"),
                timestamp: row.get("timestamp"),
                message: row.get("message"),
            })
            .collect())
    }
}

fn db_error(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let status: String = row.get("status");
    Ok(Job {
        id: row.get("id"),
        request_id: row.get("request_id"),
        status: status
            .parse()
            .map_err(|e: crate::job::UnknownStatus| StoreError::Database(e.to_string()))?,
        created_at: row.get("created_at"),
        modified_at: row.get("modified_at"),
        finished_at: row.get("finished_at"),
    })
}
