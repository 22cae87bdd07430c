//! Optics Storage Engine
//!
//! This module provides the event store built on a transactional map store:
//!
//! - **types**: Core data structures (OpticsEvent, BucketKey, ContinuationToken)
//! - **store**: The durable map contract (`StateStore`) and transactions
//! - **memory**: Volatile store for tests and ephemeral runs
//! - **file**: Append-only log per map, LZ4 frames with CRC32 trailers
//! - **bucket**: One hour of events with its bitmap index
//! - **set**: The bucket registry, routing and range queries
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   OpticsEvent → route by hour → Bucket (assign id) → commit → index
//!
//! Read Path:
//!   Query → select buckets → compile (cached) → bitmap → seek → load
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use optics::query::CriteriaCache;
//! use optics::storage::{ContinuationToken, MemoryStore, OpticsEvent, OpticsSet};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let set = OpticsSet::new(Arc::new(MemoryStore::new()), Arc::new(CriteriaCache::default()));
//!
//!     let event = OpticsEvent::new().property("LOG_LEVEL", "ERROR");
//!     set.add(&event).await?;
//!
//!     let end = chrono::Utc::now();
//!     let start = end - chrono::Duration::hours(1);
//!     let events = set
//!         .query(r#"LOG_LEVEL="ERROR""#, start, end, 10, ContinuationToken::START)
//!         .await?;
//!     assert_eq!(events.len(), 1);
//!
//!     Ok(())
//! }
//! ```

pub mod bucket;
pub mod error;
pub mod file;
pub mod memory;
pub mod set;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use bucket::{Bucket, BucketState};
pub use error::{OpticsError, OpticsResult, StoreError, StoreResult};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use set::{AddReport, BucketSummary, OpticsSet, DEFAULT_RETENTION_HOURS};
pub use store::{StateStore, Transaction, WriteOp};
pub use types::{BucketKey, ContinuationToken, OpticsEvent, LOG_LEVEL_PROPERTY};

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{StorageConfig, StoreBackend};

/// Open the store selected by `config`
///
/// A leading `~/` in the data directory expands to the home directory.
pub fn open_store(config: &StorageConfig) -> StoreResult<Arc<dyn StateStore>> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store, events are lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::File => {
            let dir = expand_home(&config.data_dir);
            tracing::info!("Data directory: {:?}", dir);
            Ok(Arc::new(FileStore::open(dir, config.sync_on_commit)?))
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_store_by_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            data_dir: dir.path().to_string_lossy().to_string(),
            backend: StoreBackend::File,
            sync_on_commit: false,
        };

        let store = open_store(&config).unwrap();
        store.open_map("optics_2024030510").await.unwrap();
        assert!(dir.path().join("optics_2024030510.log").exists());

        let memory = open_store(&StorageConfig {
            backend: StoreBackend::Memory,
            ..config
        })
        .unwrap();
        assert!(memory.map_names().await.unwrap().is_empty());
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/var/lib/optics"), PathBuf::from("/var/lib/optics"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/optics"), home.join("optics"));
        }
    }
}
