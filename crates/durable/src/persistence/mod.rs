//! Persistence layer for jobs and events
//!
//! This module provides:
//! - [`JobStore`] / [`JobSession`] traits for job and event persistence
//! - [`InMemoryJobStore`] for testing
//! - [`PostgresJobStore`] for production

mod memory;
mod postgres;
mod store;

pub use memory::{InMemoryJobSession, InMemoryJobStore};
pub use postgres::{PostgresJobSession, PostgresJobStore};
pub use store::{JobSession, JobStore, StoreError};
