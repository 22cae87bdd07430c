//! Admin Routes
//!
//! - POST /api/v1/admin/purge - Drop every unlocked bucket
//! - POST /api/v1/admin/lock - Protect all buckets from eviction
//! - POST /api/v1/admin/unlock - Re-enable eviction

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::dto::AdminResponse;
use crate::api::error::ApiResult;
use crate::api::state::AppState;

/// POST /api/v1/admin/purge
pub async fn purge(State(state): State<Arc<AppState>>) -> ApiResult<Json<AdminResponse>> {
    let dropped = state.service.purge().await?;
    tracing::warn!(dropped, "Event store purged via API");

    Ok(Json(AdminResponse {
        action: "purge".to_string(),
        buckets: Some(dropped),
    }))
}

/// POST /api/v1/admin/lock
pub async fn lock(State(state): State<Arc<AppState>>) -> ApiResult<Json<AdminResponse>> {
    state.service.lock().await?;

    Ok(Json(AdminResponse {
        action: "lock".to_string(),
        buckets: Some(state.service.set().bucket_count().await),
    }))
}

/// POST /api/v1/admin/unlock
pub async fn unlock(State(state): State<Arc<AppState>>) -> ApiResult<Json<AdminResponse>> {
    state.service.unlock().await?;

    Ok(Json(AdminResponse {
        action: "unlock".to_string(),
        buckets: Some(state.service.set().bucket_count().await),
    }))
}
