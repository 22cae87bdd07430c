//! Event Routes
//!
//! Fire-and-forget ingestion. Events are queued and applied by the
//! background drain loop, so a 202 means "accepted", not "stored".
//!
//! - POST /api/v1/events - Single event
//! - POST /api/v1/events/batch - Batch of events

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use std::sync::Arc;

use crate::api::dto::{BatchIngestRequest, IngestEvent, IngestResponse};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;

/// POST /api/v1/events
pub async fn ingest_event(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IngestEvent>,
) -> ApiResult<(StatusCode, Json<IngestResponse>)> {
    let event = req.into_event(Utc::now());
    let accepted = usize::from(state.service.add(event));

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            accepted,
            filtered: 1 - accepted,
        }),
    ))
}

/// POST /api/v1/events/batch
pub async fn ingest_batch(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BatchIngestRequest>,
) -> ApiResult<(StatusCode, Json<IngestResponse>)> {
    if req.events.is_empty() {
        return Err(ApiError::Validation("Empty batch".to_string()));
    }

    let max = state.config.max_batch_events;
    if req.events.len() > max {
        return Err(ApiError::Validation(format!(
            "Batch size exceeds maximum of {} events",
            max
        )));
    }

    let now = Utc::now();
    let total = req.events.len();
    let events = req
        .events
        .into_iter()
        .map(|event| event.into_event(now))
        .collect();
    let accepted = state.service.add_batch(events);

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            accepted,
            filtered: total - accepted,
        }),
    ))
}
