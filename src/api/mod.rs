//! Optics REST API
//!
//! HTTP API layer for Optics, built with Axum.
//!
//! # Endpoints
//!
//! ## Events
//! - `POST /api/v1/events` - Queue a single event
//! - `POST /api/v1/events/batch` - Queue a batch of events
//!
//! ## Query
//! - `POST /api/v1/query` - One page of matching events
//! - `POST /api/v1/query/count` - Count matching events
//!
//! ## Admin
//! - `POST /api/v1/admin/purge` - Drop every unlocked bucket
//! - `POST /api/v1/admin/lock` - Disable eviction
//! - `POST /api/v1/admin/unlock` - Re-enable eviction
//!
//! ## Stats
//! - `GET /api/v1/stats` - Bucket, queue and cache counters
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status
//!
//! # Example
//!
//! ```rust,ignore
//! use optics::api::{serve, ApiConfig, AppState};
//! use optics::config::OpticsConfig;
//! use optics::service::OpticsService;
//! use optics::storage::MemoryStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let service = OpticsService::open(store, OpticsConfig::default()).await?;
//!     let service = Arc::new(service);
//!     let _drain = service.start_background_drain();
//!
//!     let config = ApiConfig::default();
//!     serve(AppState::new(service, config.clone()), &config).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::{ApiConfig, AppState};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Event routes
        .route("/events", post(routes::events::ingest_event))
        .route("/events/batch", post(routes::events::ingest_batch))
        // Query routes
        .route("/query", post(routes::query::execute_query))
        .route("/query/count", post(routes::query::count_query))
        // Admin routes
        .route("/admin/purge", post(routes::admin::purge))
        .route("/admin/lock", post(routes::admin::lock))
        .route("/admin/unlock", post(routes::admin::unlock))
        // Stats
        .route("/stats", get(routes::stats::get_stats))
        .layer(DefaultBodyLimit::max(state.config.max_body_size));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    // Create shared state
    let shared_state = Arc::new(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(shared_state)
}

/// Start the API server
pub async fn serve(state: AppState, config: &ApiConfig) -> Result<(), ApiError> {
    let router = build_router(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Optics API listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("Optics API shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::dto::{AdminResponse, CountResponse, IngestResponse};
    use crate::config::OpticsConfig;
    use crate::service::{OpticsService, QueryResponse};
    use crate::storage::MemoryStore;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        response::Response,
    };
    use serde::de::DeserializeOwned;
    use tower::util::ServiceExt;

    async fn create_test_app() -> (Router, Arc<OpticsService>) {
        let config = OpticsConfig {
            page_size: 2,
            ..Default::default()
        };
        let service = OpticsService::open(Arc::new(MemoryStore::new()), config)
            .await
            .unwrap();
        let service = Arc::new(service);

        let state = AppState::new(Arc::clone(&service), ApiConfig::default());
        (build_router(state), service)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body<T: DeserializeOwned>(response: Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    const RANGE: &str = r#""start": "2024-03-05T09:00:00Z", "end": "2024-03-05T13:00:00Z""#;

    async fn seed(service: &OpticsService) {
        let base = 1_709_632_800_000i64; // 2024-03-05T10:00:00Z
        let events = (0..5)
            .map(|i| {
                crate::storage::OpticsEvent::with_timestamp(base + i * 60_000)
                    .property("LOG_LEVEL", if i % 2 == 0 { "INFO" } else { "ERROR" })
            })
            .collect();
        service.add_batch(events);
        service.drain_pending().await;
    }

    #[tokio::test]
    async fn test_health_live() {
        let (app, _) = create_test_app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health/live")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_ready() {
        let (app, _) = create_test_app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health/ready")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ingest_single_is_queued() {
        let (app, service) = create_test_app().await;

        let response = app
            .oneshot(post_json(
                "/api/v1/events",
                r#"{"timestamp": 1709632800000, "properties": {"LOG_LEVEL": "INFO"}}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body: IngestResponse = json_body(response).await;
        assert_eq!(body.accepted, 1);
        assert_eq!(service.queue_depth(), 1);
    }

    #[tokio::test]
    async fn test_ingest_invalid_json() {
        let (app, _) = create_test_app().await;

        let response = app
            .oneshot(post_json("/api/v1/events", "not json"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_empty_batch_rejected() {
        let (app, _) = create_test_app().await;

        let response = app
            .oneshot(post_json("/api/v1/events/batch", r#"{"events": []}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_query_pages() {
        let (app, service) = create_test_app().await;
        seed(&service).await;

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/v1/query",
                &format!(r#"{{"query": "LOG_LEVEL=\"INFO\"", {}}}"#, RANGE),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let first: QueryResponse = json_body(response).await;
        assert_eq!(first.events.len(), 2);
        assert_ne!(first.continuation_token, 0);

        let response = app
            .oneshot(post_json(
                "/api/v1/query",
                &format!(
                    r#"{{"query": "LOG_LEVEL=\"INFO\"", {}, "continuation_token": {}}}"#,
                    RANGE, first.continuation_token
                ),
            ))
            .await
            .unwrap();
        let second: QueryResponse = json_body(response).await;
        assert_eq!(second.events.len(), 1);
        assert_eq!(second.continuation_token, 0);
    }

    #[tokio::test]
    async fn test_query_syntax_error_in_body() {
        let (app, _) = create_test_app().await;

        let response = app
            .oneshot(post_json(
                "/api/v1/query",
                &format!(r#"{{"query": "LOG_LEVEL=", {}}}"#, RANGE),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: QueryResponse = json_body(response).await;
        assert!(body.events.is_empty());
        assert!(body.error.is_some());
    }

    #[tokio::test]
    async fn test_count() {
        let (app, service) = create_test_app().await;
        seed(&service).await;

        let response = app
            .oneshot(post_json(
                "/api/v1/query/count",
                &format!(r#"{{"query": "LOG_LEVEL=\"ERROR\"", {}}}"#, RANGE),
            ))
            .await
            .unwrap();

        let body: CountResponse = json_body(response).await;
        assert_eq!(body.count, 2);
    }

    #[tokio::test]
    async fn test_lock_then_purge_keeps_data() {
        let (app, service) = create_test_app().await;
        seed(&service).await;

        let response = app
            .clone()
            .oneshot(post_json("/api/v1/admin/lock", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(post_json("/api/v1/admin/purge", ""))
            .await
            .unwrap();
        let body: AdminResponse = json_body(response).await;
        assert_eq!(body.buckets, Some(0));

        app.clone()
            .oneshot(post_json("/api/v1/admin/unlock", ""))
            .await
            .unwrap();
        let response = app
            .clone()
            .oneshot(post_json("/api/v1/admin/purge", ""))
            .await
            .unwrap();
        let body: AdminResponse = json_body(response).await;
        assert_eq!(body.buckets, Some(1));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let stats: serde_json::Value = json_body(response).await;
        assert_eq!(stats["bucket_count"], 0);
    }

    #[tokio::test]
    async fn test_stats_shape() {
        let (app, service) = create_test_app().await;
        seed(&service).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let stats: serde_json::Value = json_body(response).await;
        assert_eq!(stats["total_events"], 5);
        assert_eq!(stats["buckets"][0]["key"], "2024030510");
    }
}
