//! Work items as delivered by the queue service

use serde::{Deserialize, Serialize};

use super::SourceError;
use crate::job::RequestId;

/// Wire shape of `GET /request/next-unhandled`
///
/// Everything except `id` is optional on the wire; validation happens when
/// converting into a [`WorkItem`].
#[derive(Debug, Clone, Deserialize)]
pub struct RawWorkItem {
    pub id: RequestId,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub source_ip: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub request_url: Option<String>,
    #[serde(default)]
    pub request_raw: Option<String>,
    #[serde(default)]
    pub is_handled: Option<bool>,
}

/// A unit of unhandled input fetched from the remote queue
///
/// `payload` is `request_raw` parsed as JSON; items whose raw payload is
/// missing or malformed never make it this far.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkItem {
    pub id: RequestId,
    pub timestamp: Option<String>,
    pub source_ip: Option<String>,
    pub user_agent: Option<String>,
    pub method: Option<String>,
    pub request_url: Option<String>,
    pub request_raw: String,
    pub payload: serde_json::Value,
    pub is_handled: bool,
}

impl WorkItem {
    /// Build an item directly from a payload, filling the raw form from it
    pub fn new(id: RequestId, payload: serde_json::Value) -> Self {
        Self {
            id,
            timestamp: None,
            source_ip: None,
            user_agent: None,
            method: None,
            request_url: None,
            request_raw: payload.to_string(),
            payload,
            is_handled: false,
        }
    }
}

impl TryFrom<RawWorkItem> for WorkItem {
    type Error = SourceError;

    fn try_from(raw: RawWorkItem) -> Result<Self, Self::Error> {
        let request_raw = raw
            .request_raw
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| {
                SourceError::Malformed(format!("request {} has no raw payload", raw.id))
            })?;

        let payload = serde_json::from_str(&request_raw).map_err(|e| {
            SourceError::Malformed(format!("request {} payload is not JSON: {}", raw.id, e))
        })?;

        Ok(Self {
            id: raw.id,
            timestamp: raw.timestamp,
            source_ip: raw.source_ip,
            user_agent: raw.user_agent,
            method: raw.method,
            request_url: raw.request_url,
            request_raw,
            payload,
            is_handled: raw.is_handled.unwrap_or(false),
        })
    }
}
