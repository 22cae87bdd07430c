//! # Optics
//!
//! A telemetry event store with a bitmap-indexed query engine. Events are
//! property bags stamped with a millisecond timestamp, grouped into hourly
//! append-only buckets and filtered with a small boolean query language.
//!
//! ## Features
//!
//! - **Hourly buckets**: Each hour is its own pair of maps in the store and
//!   can be evicted as a unit
//! - **Bitmap index**: Roaring bitmaps per `(property, value)` pair
//! - **Query language**: `=`, `!=`, `and`, `or` and parentheses, compiled
//!   once and cached
//! - **Paging**: Continuation tokens resume a query where the last page ended
//! - **Ingest queue**: Events are queued and drained into buckets in batches
//!
//! ## Modules
//!
//! - [`storage`]: Store contract, buckets and the bucket set
//! - [`index`]: Criteria and the bitmap index
//! - [`query`]: Parser, AST walker and criteria compiler
//! - [`service`]: Ingest queue, paging and retention
//! - [`api`]: REST API server with Axum
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use optics::config::OpticsConfig;
//! use optics::service::OpticsService;
//! use optics::storage::{MemoryStore, OpticsEvent};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let service = OpticsService::open(store, OpticsConfig::default()).await?;
//!
//!     // Queue and commit
//!     service.add(OpticsEvent::new().property("LOG_LEVEL", "ERROR").property("host", "web1"));
//!     service.drain_pending().await;
//!
//!     // Query the last hour
//!     let end = chrono::Utc::now();
//!     let start = end - chrono::Duration::hours(1);
//!     let page = service.query(r#"LOG_LEVEL="ERROR" and host="web1""#, start, end, 0).await;
//!
//!     println!("Found {} events", page.events.len());
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod index;
pub mod query;
pub mod service;
pub mod storage;

// Re-export top-level types for convenience
pub use storage::{
    Bucket, BucketKey, ContinuationToken, FileStore, MemoryStore, OpticsError, OpticsEvent,
    OpticsResult, OpticsSet, StateStore, StoreError,
};

pub use index::{BitmapIndex, Criteria};

pub use query::{compile_query, parse_expression, AstNode, CriteriaCache, QueryError};

pub use service::{OpticsService, QueryResponse, ServiceStats};

pub use api::{build_router, serve, ApiConfig, ApiError, AppState};

pub use config::{Config, ConfigError, LoggingConfig, OpticsConfig, StorageConfig};
