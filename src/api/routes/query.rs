//! Query Routes
//!
//! - POST /api/v1/query - One page of matching events
//! - POST /api/v1/query/count - Number of matching events
//!
//! Query failures are reported inside the response body with a 200 status,
//! the same way the service reports them to in-process callers.

use axum::{extract::State, Json};
use chrono::Utc;
use std::sync::Arc;

use crate::api::dto::{CountRequest, CountResponse, QueryRequest};
use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::service::QueryResponse;

/// POST /api/v1/query
pub async fn execute_query(
    State(state): State<Arc<AppState>>,
    Json(req): Json<QueryRequest>,
) -> ApiResult<Json<QueryResponse>> {
    let (start, end) = req.range(Utc::now());
    let response = state
        .service
        .query(&req.query, start, end, req.continuation_token)
        .await;

    tracing::debug!(
        query = %req.query,
        events = response.events.len(),
        execution_time_ms = response.execution_time_ms,
        "Query executed"
    );

    Ok(Json(response))
}

/// POST /api/v1/query/count
pub async fn count_query(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CountRequest>,
) -> ApiResult<Json<CountResponse>> {
    let (start, end) = req.range(Utc::now());
    let count = state.service.query_count(&req.query, start, end).await;
    Ok(Json(CountResponse { count }))
}
