//! Remote work queue boundary
//!
//! This module provides:
//! - [`WorkSource`] - the trait workers fetch items through
//! - [`HttpQueueClient`] - the HTTP implementation
//! - [`WorkItem`] - a validated item with its payload parsed

mod client;
mod item;

pub use client::{HttpQueueClient, QueueClientConfig, SourceError, WorkSource, NEXT_UNHANDLED_PATH};
pub use item::{RawWorkItem, WorkItem};
