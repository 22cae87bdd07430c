//! Event set: the registry of hourly buckets
//!
//! Routes events to the bucket for their hour, creating buckets lazily, and
//! answers range queries by visiting the covered buckets in chronological
//! order with a shrinking result budget.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::query::{CriteriaCache, QueryError};
use crate::storage::bucket::{Bucket, BucketState};
use crate::storage::error::{OpticsError, OpticsResult};
use crate::storage::store::StateStore;
use crate::storage::types::{BucketKey, ContinuationToken, OpticsEvent};

/// Hours of data kept by the retention sweep (24h plus one hour of grace)
pub const DEFAULT_RETENTION_HOURS: i64 = 25;

/// Outcome of a batch append
#[derive(Debug, Default)]
pub struct AddReport {
    /// Stored events, with ids assigned
    pub committed: Vec<OpticsEvent>,
    /// Events whose bucket failed with a retryable error
    pub retry: Vec<OpticsEvent>,
    /// Events rejected for good (bad timestamp, full bucket)
    pub discarded: usize,
    pub last_error: Option<OpticsError>,
}

impl AddReport {
    pub fn is_complete(&self) -> bool {
        self.retry.is_empty() && self.discarded == 0
    }
}

/// Point-in-time view of one bucket
#[derive(Debug, Clone, Serialize)]
pub struct BucketSummary {
    pub key: String,
    pub start: DateTime<Utc>,
    pub state: BucketState,
    pub events: u64,
    pub last_id: u32,
}

/// All buckets known to this process
pub struct OpticsSet {
    store: Arc<dyn StateStore>,
    cache: Arc<CriteriaCache>,
    buckets: RwLock<BTreeMap<BucketKey, Arc<Bucket>>>,
    locked: AtomicBool,
    retention: Duration,
}

impl OpticsSet {
    /// Empty set over `store`, ignoring anything already persisted
    pub fn new(store: Arc<dyn StateStore>, cache: Arc<CriteriaCache>) -> Self {
        Self {
            store,
            cache,
            buckets: RwLock::new(BTreeMap::new()),
            locked: AtomicBool::new(false),
            retention: Duration::hours(DEFAULT_RETENTION_HOURS),
        }
    }

    /// Open the set, rebuilding a bucket for every persisted events map
    ///
    /// Any bucket that fails to rebuild fails the whole open.
    pub async fn open(store: Arc<dyn StateStore>, cache: Arc<CriteriaCache>) -> OpticsResult<Self> {
        let set = Self::new(store, cache);

        let names = set.store.map_names().await?;
        let mut buckets = BTreeMap::new();
        for key in names.iter().filter_map(|name| BucketKey::from_map_name(name)) {
            if buckets.contains_key(&key) {
                continue;
            }
            let bucket = Bucket::open(key, Arc::clone(&set.store), Arc::clone(&set.cache)).await?;
            buckets.insert(key, Arc::new(bucket));
        }

        tracing::info!(buckets = buckets.len(), "Discovered persisted buckets");
        *set.buckets.write().await = buckets;
        Ok(set)
    }

    /// Builder method: set how far back the retention sweep keeps data
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Registered bucket for `key`, if any
    pub async fn get(&self, key: &BucketKey) -> Option<Arc<Bucket>> {
        self.buckets.read().await.get(key).cloned()
    }

    /// Registered bucket for `key`, creating it if absent
    ///
    /// Concurrent creators converge on whichever bucket is registered first.
    pub async fn get_or_create(&self, key: BucketKey) -> OpticsResult<Arc<Bucket>> {
        if let Some(bucket) = self.get(&key).await {
            return Ok(bucket);
        }

        let bucket = Arc::new(
            Bucket::open(key, Arc::clone(&self.store), Arc::clone(&self.cache)).await?,
        );

        let mut buckets = self.buckets.write().await;
        if let Some(existing) = buckets.get(&key) {
            tracing::debug!(bucket = %key, "Bucket registered concurrently, discarding ours");
            return Ok(Arc::clone(existing));
        }

        // read the set-wide flag under the registry lock so lock() and
        // unlock() either see this bucket or have already flipped the flag
        if self.is_locked() && !bucket.is_locked() {
            bucket.lock().await?;
        }
        buckets.insert(key, Arc::clone(&bucket));
        tracing::info!(bucket = %key, "Created bucket");
        Ok(bucket)
    }

    fn route(event: &OpticsEvent) -> OpticsResult<BucketKey> {
        BucketKey::from_timestamp_millis(event.timestamp)
            .filter(|key| key.token_seconds().is_some())
            .ok_or(OpticsError::InvalidTimestamp(event.timestamp))
    }

    /// Append one event to the bucket for its hour
    pub async fn add(&self, event: &OpticsEvent) -> OpticsResult<OpticsEvent> {
        let key = Self::route(event)?;
        self.get_or_create(key).await?.add(event).await
    }

    /// Append events, one transaction per bucket touched
    ///
    /// A failing bucket does not stop the others; its events are reported
    /// back for retry or discarded, depending on the error.
    pub async fn add_range(&self, events: Vec<OpticsEvent>) -> AddReport {
        let mut report = AddReport::default();
        let mut groups: BTreeMap<BucketKey, Vec<OpticsEvent>> = BTreeMap::new();

        for event in events {
            match Self::route(&event) {
                Ok(key) => groups.entry(key).or_default().push(event),
                Err(e) => {
                    tracing::warn!("Discarding event: {}", e);
                    report.discarded += 1;
                    report.last_error = Some(e);
                }
            }
        }

        for (key, group) in groups {
            let result = match self.get_or_create(key).await {
                Ok(bucket) => bucket.add_range(&group).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(stored) => report.committed.extend(stored),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(bucket = %key, events = group.len(), "Append failed: {}", e);
                    report.retry.extend(group);
                    report.last_error = Some(e);
                }
                Err(e) => {
                    tracing::error!(
                        bucket = %key,
                        events = group.len(),
                        "Discarding events: {}",
                        e
                    );
                    report.discarded += group.len();
                    report.last_error = Some(e);
                }
            }
        }

        report
    }

    /// Buckets covering `[start, end]`, chronologically, skipping those
    /// before the token's bucket
    async fn select(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        token: ContinuationToken,
    ) -> Vec<Arc<Bucket>> {
        let first = BucketKey::from_datetime(start);
        let last = BucketKey::from_datetime(end);

        self.buckets
            .read()
            .await
            .range(first..=last)
            .filter(|(key, _)| {
                token.is_start() || key.epoch_seconds() >= i64::from(token.bucket_seconds())
            })
            .map(|(_, bucket)| Arc::clone(bucket))
            .collect()
    }

    fn check_range(start: DateTime<Utc>, end: DateTime<Utc>) -> OpticsResult<()> {
        if start > end {
            return Err(QueryError::InvalidTimeRange(format!(
                "start {} is after end {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            ))
            .into());
        }
        Ok(())
    }

    /// Events matching `query` in `[start, end]`, in `(bucket, id)` order
    ///
    /// Returns at most `max_count` events (`0` = unbounded). The token's id
    /// offset only applies inside the token's own bucket. Callers wanting to
    /// know whether more results exist should ask for one extra event.
    pub async fn query(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        max_count: usize,
        token: ContinuationToken,
    ) -> OpticsResult<Vec<OpticsEvent>> {
        Self::check_range(start, end)?;
        self.cache.get_or_compile(query)?;

        let mut results = Vec::new();
        for bucket in self.select(start, end, token).await {
            let remaining = if max_count == 0 {
                0
            } else {
                max_count - results.len()
            };
            let in_token_bucket =
                !token.is_start() && bucket.bucket_id() == token.bucket_seconds();
            let start_id = if in_token_bucket { token.id() } else { 0 };

            results.extend(bucket.search(query, remaining, start_id, start, end).await?);
            if max_count > 0 && results.len() >= max_count {
                break;
            }
        }

        Ok(results)
    }

    /// Number of events matching `query` in `[start, end]`
    ///
    /// Buckets entirely inside the range are counted from the index alone.
    pub async fn query_count(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> OpticsResult<u64> {
        Self::check_range(start, end)?;
        self.cache.get_or_compile(query)?;

        let mut total = 0u64;
        for bucket in self.select(start, end, ContinuationToken::START).await {
            let key = bucket.key();
            let covered = start <= key.start() && end >= key.end() - Duration::milliseconds(1);
            total += if covered {
                bucket.count_matching(query)?
            } else {
                bucket.search(query, 0, 0, start, end).await?.len() as u64
            };
        }
        Ok(total)
    }

    /// Drop and forget every unlocked bucket, returning how many went
    pub async fn purge(&self) -> OpticsResult<usize> {
        let keys: Vec<BucketKey> = self.buckets.read().await.keys().copied().collect();
        let dropped = self.evict(keys).await?;
        tracing::info!(dropped, "Purged buckets");
        Ok(dropped)
    }

    /// Evict unlocked buckets whose hour started before `now - retention`
    pub async fn drop_data(&self, now: DateTime<Utc>) -> OpticsResult<usize> {
        let cutoff = now - self.retention;
        let keys: Vec<BucketKey> = self
            .buckets
            .read()
            .await
            .keys()
            .copied()
            .filter(|key| key.start() < cutoff)
            .collect();

        let dropped = self.evict(keys).await?;
        if dropped > 0 {
            tracing::info!(dropped, cutoff = %cutoff, "Evicted expired buckets");
        }
        Ok(dropped)
    }

    async fn evict(&self, keys: Vec<BucketKey>) -> OpticsResult<usize> {
        let mut dropped = 0;
        for key in keys {
            let Some(bucket) = self.get(&key).await else {
                continue;
            };
            if !bucket.discard(false).await? {
                continue;
            }

            let mut buckets = self.buckets.write().await;
            if buckets.get(&key).is_some_and(|current| Arc::ptr_eq(current, &bucket)) {
                buckets.remove(&key);
            }
            dropped += 1;
        }
        Ok(dropped)
    }

    /// Lock every bucket, and every bucket created until `unlock`
    pub async fn lock(&self) -> OpticsResult<()> {
        self.locked.store(true, Ordering::SeqCst);
        for bucket in self.snapshot().await {
            Self::skip_dropped(bucket.key(), bucket.lock().await)?;
        }
        tracing::info!("Event set locked");
        Ok(())
    }

    /// Unlock every bucket
    pub async fn unlock(&self) -> OpticsResult<()> {
        self.locked.store(false, Ordering::SeqCst);
        for bucket in self.snapshot().await {
            Self::skip_dropped(bucket.key(), bucket.unlock().await)?;
        }
        tracing::info!("Event set unlocked");
        Ok(())
    }

    /// A bucket dropped while still registered is on its way out
    fn skip_dropped(key: BucketKey, result: OpticsResult<()>) -> OpticsResult<()> {
        match result {
            Err(OpticsError::BucketDropped(_)) => {
                tracing::debug!(bucket = %key, "Skipping dropped bucket");
                Ok(())
            }
            other => other,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    async fn snapshot(&self) -> Vec<Arc<Bucket>> {
        self.buckets.read().await.values().cloned().collect()
    }

    pub async fn bucket_count(&self) -> usize {
        self.buckets.read().await.len()
    }

    /// Summaries of all registered buckets, oldest first
    pub async fn buckets(&self) -> Vec<BucketSummary> {
        self.snapshot()
            .await
            .iter()
            .map(|bucket| BucketSummary {
                key: bucket.key().to_string(),
                start: bucket.key().start(),
                state: bucket.state().unwrap_or(BucketState::Uninitialized),
                events: bucket.len(),
                last_id: bucket.last_id(),
            })
            .collect()
    }

    /// Total indexed events across all buckets
    pub async fn total_events(&self) -> u64 {
        self.snapshot().await.iter().map(|bucket| bucket.len()).sum()
    }
}
