//! Data Transfer Objects
//!
//! Request and response types for the API endpoints.
//! These types are serialized/deserialized to/from JSON.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::storage::OpticsEvent;

// ============================================
// INGEST DTOs
// ============================================

/// Single event ingest request
#[derive(Debug, Deserialize)]
pub struct IngestEvent {
    /// Optional timestamp (ms since epoch), defaults to now
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Event properties
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl IngestEvent {
    pub fn into_event(self, now: DateTime<Utc>) -> OpticsEvent {
        OpticsEvent::with_timestamp(self.timestamp.unwrap_or_else(|| now.timestamp_millis()))
            .properties(self.properties)
    }
}

/// Batch ingest request
#[derive(Debug, Deserialize)]
pub struct BatchIngestRequest {
    pub events: Vec<IngestEvent>,
}

/// Ingest response
///
/// Events are queued, not yet stored, when this is returned.
#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    /// Number of events queued
    pub accepted: usize,
    /// Number of events dropped by the debug filter
    pub filtered: usize,
}

// ============================================
// QUERY DTOs
// ============================================

/// Query request
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    /// Filter expression, empty matches everything
    #[serde(default)]
    pub query: String,
    /// Range start, defaults to one hour before `end`
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    /// Range end, defaults to now
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    /// Token from the previous page, `0` for the first page
    #[serde(default)]
    pub continuation_token: u64,
}

impl QueryRequest {
    pub fn range(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        resolve_range(self.start, self.end, now)
    }
}

/// Count request
#[derive(Debug, Deserialize)]
pub struct CountRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

impl CountRequest {
    pub fn range(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        resolve_range(self.start, self.end, now)
    }
}

fn resolve_range(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let end = end.unwrap_or(now);
    let start = start.unwrap_or(end - Duration::hours(1));
    (start, end)
}

/// Count response
#[derive(Debug, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: u64,
}

// ============================================
// ADMIN DTOs
// ============================================

/// Result of an administrative action
#[derive(Debug, Serialize, Deserialize)]
pub struct AdminResponse {
    /// Action performed: purge, lock, unlock
    pub action: String,
    /// Buckets affected, when the action reports it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buckets: Option<usize>,
}

// ============================================
// HEALTH DTOs
// ============================================

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall status: healthy, degraded
    pub status: String,
    pub buckets: usize,
    pub queue_depth: usize,
    pub uptime_seconds: u64,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_query_request_defaults() {
        let req: QueryRequest = serde_json::from_str("{}").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 10, 30, 0).unwrap();

        assert_eq!(req.query, "");
        assert_eq!(req.continuation_token, 0);
        assert_eq!(req.range(now), (now - Duration::hours(1), now));
    }

    #[test]
    fn test_ingest_event_defaults_timestamp() {
        let req: IngestEvent =
            serde_json::from_str(r#"{"properties": {"LOG_LEVEL": "INFO"}}"#).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 10, 30, 0).unwrap();
        let event = req.into_event(now);

        assert_eq!(event.timestamp, now.timestamp_millis());
        assert_eq!(event.level(), Some("INFO"));
    }
}
