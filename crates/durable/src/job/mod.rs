//! Job records and their lifecycle
//!
//! This module provides:
//! - [`Job`] and [`Event`] - the persisted records
//! - [`JobStatus`] - the lifecycle state machine

mod model;
mod status;

pub use model::{Event, EventId, Job, JobId, RequestId};
pub use status::{JobStatus, TransitionError, UnknownStatus};
