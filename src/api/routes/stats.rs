//! Stats Routes
//!
//! - GET /api/v1/stats - Buckets, queue and cache counters

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::state::AppState;
use crate::service::ServiceStats;

/// GET /api/v1/stats
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<ServiceStats> {
    Json(state.service.stats().await)
}
