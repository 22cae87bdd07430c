//! Hourly event bucket
//!
//! A bucket owns one hour of events: a durable map keyed by bucket-local id,
//! a tiny options map holding the skip-delete marker, and an in-memory
//! bitmap index rebuilt from the durable map on open.
//!
//! # State machine
//!
//! ```text
//! Uninitialized → Rebuilding → Ready ⇄ Locked
//!                                 ↓
//!                              Dropped
//! ```
//!
//! Writes, lock changes, drops and rebuilds are serialized by one writer
//! mutex. Queries only take the index read lock long enough to realize a
//! position set, so they may miss events appended after that snapshot.

use chrono::{DateTime, Utc};
use roaring::RoaringBitmap;
use serde::Serialize;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Mutex;

use crate::index::{BitmapIndex, PositionIndex};
use crate::query::CriteriaCache;
use crate::storage::error::{OpticsError, OpticsResult};
use crate::storage::store::{decode_id_key, id_key, StateStore};
use crate::storage::types::{BucketKey, OpticsEvent};

/// Below this many candidates the timestamp seek scans linearly
const SEEK_LINEAR_THRESHOLD: usize = 20;

const SKIP_DELETE_KEY: &[u8] = b"skip_delete";

/// Lifecycle of a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketState {
    Uninitialized,
    Rebuilding,
    Ready,
    /// Ready, but protected from eviction
    Locked,
    Dropped,
}

/// One hour slot of events with its own index and id counter
pub struct Bucket {
    key: BucketKey,
    bucket_id: u32,
    events_map: String,
    options_map: String,
    store: Arc<dyn StateStore>,
    cache: Arc<CriteriaCache>,
    index: RwLock<BitmapIndex>,
    last_id: AtomicU32,
    state: StdMutex<BucketState>,
    writer: Mutex<()>,
}

impl Bucket {
    /// Open the bucket's durable maps and rebuild its index
    ///
    /// Fails if the store cannot be read; no half-built bucket is returned.
    pub async fn open(
        key: BucketKey,
        store: Arc<dyn StateStore>,
        cache: Arc<CriteriaCache>,
    ) -> OpticsResult<Self> {
        let bucket_id = key
            .token_seconds()
            .ok_or_else(|| OpticsError::InvalidTimestamp(key.start().timestamp_millis()))?;

        let bucket = Self {
            key,
            bucket_id,
            events_map: key.map_name(),
            options_map: key.options_map_name(),
            store,
            cache,
            index: RwLock::new(BitmapIndex::new()),
            last_id: AtomicU32::new(0),
            state: StdMutex::new(BucketState::Uninitialized),
            writer: Mutex::new(()),
        };

        bucket.rebuild().await?;
        Ok(bucket)
    }

    /// Replay every persisted event, in id order, into a fresh index
    pub async fn rebuild(&self) -> OpticsResult<()> {
        let _writer = self.writer.lock().await;
        self.set_state(BucketState::Rebuilding)?;

        match self.rebuild_locked().await {
            Ok(locked) => {
                let state = if locked {
                    BucketState::Locked
                } else {
                    BucketState::Ready
                };
                self.set_state(state)
            }
            Err(e) => {
                self.set_state(BucketState::Uninitialized)?;
                tracing::error!(bucket = %self.key, "Bucket rebuild failed: {}", e);
                Err(e)
            }
        }
    }

    async fn rebuild_locked(&self) -> OpticsResult<bool> {
        self.store.open_map(&self.events_map).await?;
        self.store.open_map(&self.options_map).await?;

        let entries = self.store.scan(&self.events_map).await?;
        let mut index = BitmapIndex::new();
        let mut max_id = 0u32;

        for (key, value) in &entries {
            let id = decode_id_key(key)?;
            let event: OpticsEvent = bincode::deserialize(value)?;
            index.index_event(id, &event.properties);
            max_id = max_id.max(id);
        }

        let locked = self.read_skip_delete().await?;

        *self.index_write() = index;
        self.last_id.store(max_id, Ordering::SeqCst);

        tracing::info!(
            bucket = %self.key,
            events = entries.len(),
            last_id = max_id,
            locked,
            "Bucket index rebuilt"
        );
        Ok(locked)
    }

    /// Append one event, returning it with its assigned id
    pub async fn add(&self, event: &OpticsEvent) -> OpticsResult<OpticsEvent> {
        let mut stored = self.add_range(std::slice::from_ref(event)).await?;
        stored
            .pop()
            .ok_or_else(|| OpticsError::BucketDropped(self.key.to_string()))
    }

    /// Append events in one durable transaction
    ///
    /// Ids are assigned in input order. The index only changes after the
    /// transaction commits; on failure the id counter is restored.
    pub async fn add_range(&self, events: &[OpticsEvent]) -> OpticsResult<Vec<OpticsEvent>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let _writer = self.writer.lock().await;
        self.ensure_writable()?;

        if let Some(outside) = events.iter().find(|e| !self.key.contains(e.timestamp)) {
            return Err(OpticsError::InvalidTimestamp(outside.timestamp));
        }

        let base = self.last_id.load(Ordering::SeqCst);
        let last = u32::try_from(events.len())
            .ok()
            .and_then(|n| base.checked_add(n))
            .ok_or_else(|| OpticsError::BucketFull(self.key.to_string()))?;

        let mut tx = self.store.begin();
        let mut stored = Vec::with_capacity(events.len());
        for (id, event) in (base + 1..=last).zip(events) {
            let mut event = event.clone();
            event.id = id;
            event.bucket_id = self.bucket_id;
            tx.set(&self.events_map, id_key(id), bincode::serialize(&event)?);
            stored.push(event);
        }

        self.last_id.store(last, Ordering::SeqCst);
        if let Err(e) = self.store.commit(tx).await {
            self.last_id.store(base, Ordering::SeqCst);
            tracing::warn!(bucket = %self.key, events = events.len(), "Commit failed: {}", e);
            return Err(e.into());
        }

        let mut index = self.index_write();
        for event in &stored {
            index.index_event(event.id, &event.properties);
        }

        Ok(stored)
    }

    /// Protect this bucket from eviction
    pub async fn lock(&self) -> OpticsResult<()> {
        self.set_skip_delete(true).await
    }

    /// Allow this bucket to be evicted again
    pub async fn unlock(&self) -> OpticsResult<()> {
        self.set_skip_delete(false).await
    }

    async fn set_skip_delete(&self, skip: bool) -> OpticsResult<()> {
        let _writer = self.writer.lock().await;
        self.ensure_writable()?;

        let mut tx = self.store.begin();
        tx.set(&self.options_map, SKIP_DELETE_KEY.to_vec(), vec![skip as u8]);
        self.store.commit(tx).await?;

        let state = if skip {
            BucketState::Locked
        } else {
            BucketState::Ready
        };
        self.set_state(state)?;
        tracing::debug!(bucket = %self.key, locked = skip, "Bucket lock changed");
        Ok(())
    }

    async fn read_skip_delete(&self) -> OpticsResult<bool> {
        let value = self.store.get(&self.options_map, SKIP_DELETE_KEY).await?;
        Ok(matches!(value.as_deref(), Some([flag]) if *flag != 0))
    }

    /// Delete the bucket's durable state unless it is locked
    ///
    /// With `rebuild_empty` the maps are recreated empty and the bucket stays
    /// usable. Returns `false` if the bucket was locked and left untouched.
    pub async fn discard(&self, rebuild_empty: bool) -> OpticsResult<bool> {
        let _writer = self.writer.lock().await;
        let state = self.state()?;

        if state == BucketState::Locked {
            tracing::debug!(bucket = %self.key, "Skipping drop of locked bucket");
            return Ok(false);
        }

        if state != BucketState::Dropped {
            self.store.remove_map(&self.events_map).await?;
            self.store.remove_map(&self.options_map).await?;
        }

        self.index_write().clear();
        self.last_id.store(0, Ordering::SeqCst);

        if rebuild_empty {
            self.store.open_map(&self.events_map).await?;
            self.store.open_map(&self.options_map).await?;
            self.set_state(BucketState::Ready)?;
        } else {
            self.set_state(BucketState::Dropped)?;
        }

        tracing::info!(bucket = %self.key, rebuild_empty, "Bucket dropped");
        Ok(true)
    }

    /// Compile (or fetch from cache) `query` and realize it on this index
    pub fn build_query(&self, query: &str) -> OpticsResult<RoaringBitmap> {
        let criteria = self.cache.get_or_compile(query)?;
        let index = self.index_read();
        Ok(index.evaluate(&criteria))
    }

    /// Number of events matching `query`, ignoring timestamps
    pub fn count_matching(&self, query: &str) -> OpticsResult<u64> {
        Ok(self.build_query(query)?.len())
    }

    /// Events matching `query` with id greater than `start_id` and timestamp
    /// in `[start, end]`, in id order
    ///
    /// `max_count == 0` means unbounded.
    pub async fn search(
        &self,
        query: &str,
        max_count: usize,
        start_id: u32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> OpticsResult<Vec<OpticsEvent>> {
        let mut positions = self.build_query(query)?;
        if self.state()? == BucketState::Dropped {
            return Ok(Vec::new());
        }

        let start_ms = start.timestamp_millis();
        let end_ms = end.timestamp_millis();
        if end_ms < self.key.start().timestamp_millis()
            || start_ms >= self.key.end().timestamp_millis()
        {
            return Ok(Vec::new());
        }

        positions.remove_range(..=start_id);
        let ids = self.index_read().positions(&positions);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let from = if start_ms <= self.key.start().timestamp_millis() {
            0
        } else {
            self.seek(&ids, start_ms).await?
        };

        let mut results = Vec::new();
        for &id in &ids[from..] {
            if max_count > 0 && results.len() >= max_count {
                break;
            }
            let Some(event) = self.load(id).await? else {
                continue;
            };
            if event.timestamp >= start_ms && event.timestamp <= end_ms {
                results.push(event);
            }
        }

        Ok(results)
    }

    /// Divide-and-conquer search for the first position at or after `start_ms`
    ///
    /// On an exact hit it walks back over equal timestamps so none are
    /// skipped. Small windows fall back to a linear scan.
    async fn seek(&self, ids: &[u32], start_ms: i64) -> OpticsResult<usize> {
        let mut low = 0usize;
        let mut high = ids.len();

        while high - low > SEEK_LINEAR_THRESHOLD {
            let mid = low + (high - low) / 2;
            match self.timestamp_of(ids[mid]).await?.cmp(&start_ms) {
                CmpOrdering::Less => low = mid + 1,
                CmpOrdering::Greater => high = mid,
                CmpOrdering::Equal => {
                    let mut pos = mid;
                    while pos > 0 && self.timestamp_of(ids[pos - 1]).await? == start_ms {
                        pos -= 1;
                    }
                    return Ok(pos);
                }
            }
        }

        for pos in low..high {
            if self.timestamp_of(ids[pos]).await? >= start_ms {
                return Ok(pos);
            }
        }
        Ok(high)
    }

    async fn timestamp_of(&self, id: u32) -> OpticsResult<i64> {
        Ok(self
            .load(id)
            .await?
            .map(|event| event.timestamp)
            .unwrap_or(i64::MIN))
    }

    /// Fetch a stored event by id
    pub async fn load(&self, id: u32) -> OpticsResult<Option<OpticsEvent>> {
        match self.store.get(&self.events_map, &id_key(id)).await? {
            Some(bytes) => {
                let mut event: OpticsEvent = bincode::deserialize(&bytes)?;
                event.id = id;
                event.bucket_id = self.bucket_id;
                Ok(Some(event))
            }
            None => Ok(None),
        }
    }

    pub fn key(&self) -> BucketKey {
        self.key
    }

    /// Bucket start in epoch seconds, as carried in continuation tokens
    pub fn bucket_id(&self) -> u32 {
        self.bucket_id
    }

    /// Highest id assigned so far
    pub fn last_id(&self) -> u32 {
        self.last_id.load(Ordering::SeqCst)
    }

    /// Number of indexed events
    pub fn len(&self) -> u64 {
        self.index_read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of events in the durable map
    pub async fn stored_count(&self) -> OpticsResult<usize> {
        Ok(self.store.count(&self.events_map).await?)
    }

    pub fn state(&self) -> OpticsResult<BucketState> {
        self.state
            .lock()
            .map(|state| *state)
            .map_err(|e| OpticsError::Lock(e.to_string()))
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.state(), Ok(BucketState::Locked))
    }

    fn set_state(&self, state: BucketState) -> OpticsResult<()> {
        let mut current = self
            .state
            .lock()
            .map_err(|e| OpticsError::Lock(e.to_string()))?;
        *current = state;
        Ok(())
    }

    fn ensure_writable(&self) -> OpticsResult<()> {
        match self.state()? {
            BucketState::Ready | BucketState::Locked => Ok(()),
            other => Err(OpticsError::BucketDropped(format!(
                "{} is {:?}",
                self.key, other
            ))),
        }
    }

    // Index updates never leave the bitmaps half-written, so a poisoned
    // lock still guards a consistent index.
    fn index_read(&self) -> RwLockReadGuard<'_, BitmapIndex> {
        self.index.read().unwrap_or_else(|e| e.into_inner())
    }

    fn index_write(&self) -> RwLockWriteGuard<'_, BitmapIndex> {
        self.index.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;
    use crate::storage::StoreError;
    use chrono::{Duration, TimeZone};

    fn hour() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 14, 0, 0).unwrap()
    }

    fn key() -> BucketKey {
        BucketKey::from_datetime(hour())
    }

    async fn open_bucket(store: &Arc<MemoryStore>) -> Bucket {
        let store: Arc<dyn StateStore> = store.clone();
        Bucket::open(key(), store, Arc::new(CriteriaCache::default()))
            .await
            .unwrap()
    }

    fn event(offset_ms: i64, level: &str) -> OpticsEvent {
        OpticsEvent::with_timestamp(hour().timestamp_millis() + offset_ms)
            .property("LOG_LEVEL", level)
    }

    fn whole_hour() -> (DateTime<Utc>, DateTime<Utc>) {
        (hour(), hour() + Duration::minutes(59))
    }

    #[tokio::test]
    async fn test_sequential_adds_have_gapless_ids() {
        let store = Arc::new(MemoryStore::new());
        let bucket = open_bucket(&store).await;

        let mut ids = Vec::new();
        for i in 0..25 {
            ids.push(bucket.add(&event(i, "INFO")).await.unwrap().id);
        }

        assert_eq!(ids, (1..=25).collect::<Vec<u32>>());
        assert_eq!(bucket.last_id(), 25);
        assert_eq!(bucket.len(), 25);
    }

    #[tokio::test]
    async fn test_add_range_sets_bucket_id() {
        let store = Arc::new(MemoryStore::new());
        let bucket = open_bucket(&store).await;

        let stored = bucket
            .add_range(&[event(0, "INFO"), event(1, "ERROR")])
            .await
            .unwrap();

        assert_eq!(stored[0].id, 1);
        assert_eq!(stored[1].id, 2);
        assert!(stored.iter().all(|e| e.bucket_id == key().token_seconds().unwrap()));
        assert_eq!(bucket.stored_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_index_and_counter() {
        let store = Arc::new(MemoryStore::new());
        let bucket = open_bucket(&store).await;
        bucket.add(&event(0, "INFO")).await.unwrap();

        store.set_unavailable(true);
        let result = bucket.add_range(&[event(1, "ERROR"), event(2, "ERROR")]).await;
        assert!(matches!(
            result,
            Err(OpticsError::Store(StoreError::Unavailable(_)))
        ));
        assert_eq!(bucket.last_id(), 1);
        assert_eq!(bucket.count_matching(r#"LOG_LEVEL="ERROR""#).unwrap(), 0);

        store.set_unavailable(false);
        let stored = bucket.add(&event(3, "ERROR")).await.unwrap();
        assert_eq!(stored.id, 2);
        assert_eq!(bucket.count_matching(r#"LOG_LEVEL="ERROR""#).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_event_outside_hour_rejected() {
        let store = Arc::new(MemoryStore::new());
        let bucket = open_bucket(&store).await;

        let result = bucket.add(&event(3_600_000, "INFO")).await;
        assert!(matches!(result, Err(OpticsError::InvalidTimestamp(_))));
        assert_eq!(bucket.last_id(), 0);
    }

    #[tokio::test]
    async fn test_rebuild_answers_queries_identically() {
        let store = Arc::new(MemoryStore::new());
        let bucket = open_bucket(&store).await;

        let levels = ["INFO", "ERROR", "DEBUG", "WARN"];
        let events: Vec<OpticsEvent> = (0..40)
            .map(|i| {
                event(i * 1000, levels[i as usize % 4]).property("host", format!("h{}", i % 3))
            })
            .collect();
        bucket.add_range(&events).await.unwrap();

        let queries = [
            "",
            r#"LOG_LEVEL="ERROR""#,
            r#"LOG_LEVEL!="DEBUG" and host="h1""#,
            r#"(host="h0" or host="h2") and LOG_LEVEL!="INFO""#,
            r#"missing="x""#,
        ];
        let before: Vec<RoaringBitmap> = queries
            .iter()
            .map(|q| bucket.build_query(q).unwrap())
            .collect();

        let reopened = open_bucket(&store).await;
        let after: Vec<RoaringBitmap> = queries
            .iter()
            .map(|q| reopened.build_query(q).unwrap())
            .collect();

        assert_eq!(before, after);
        assert_eq!(reopened.last_id(), 40);
        assert_eq!(reopened.add(&event(50_000, "INFO")).await.unwrap().id, 41);
    }

    #[tokio::test]
    async fn test_open_fails_when_store_unavailable() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);

        let dyn_store: Arc<dyn StateStore> = store.clone();
        let result = Bucket::open(key(), dyn_store, Arc::new(CriteriaCache::default())).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_locked_bucket_survives_drop() {
        let store = Arc::new(MemoryStore::new());
        let bucket = open_bucket(&store).await;
        bucket.add(&event(0, "INFO")).await.unwrap();

        bucket.lock().await.unwrap();
        assert!(bucket.is_locked());
        assert!(!bucket.discard(false).await.unwrap());
        assert_eq!(bucket.stored_count().await.unwrap(), 1);

        // marker is durable
        let reopened = open_bucket(&store).await;
        assert_eq!(reopened.state().unwrap(), BucketState::Locked);

        bucket.unlock().await.unwrap();
        assert!(bucket.discard(false).await.unwrap());
        assert_eq!(bucket.state().unwrap(), BucketState::Dropped);
        assert!(store.map_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_drop_with_rebuild_empty() {
        let store = Arc::new(MemoryStore::new());
        let bucket = open_bucket(&store).await;
        bucket.add_range(&[event(0, "INFO"), event(1, "INFO")]).await.unwrap();

        assert!(bucket.discard(true).await.unwrap());
        assert_eq!(bucket.state().unwrap(), BucketState::Ready);
        assert!(bucket.is_empty());
        assert_eq!(bucket.add(&event(2, "INFO")).await.unwrap().id, 1);
    }

    #[tokio::test]
    async fn test_discard_through_shared_handle() {
        let store = Arc::new(MemoryStore::new());
        let bucket = Arc::new(open_bucket(&store).await);
        bucket.add(&event(0, "INFO")).await.unwrap();

        let shared = Arc::clone(&bucket);
        assert!(shared.discard(false).await.unwrap());
        assert_eq!(bucket.state().unwrap(), BucketState::Dropped);
        assert!(store.map_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_bucket_rejects_writes() {
        let store = Arc::new(MemoryStore::new());
        let bucket = open_bucket(&store).await;
        bucket.discard(false).await.unwrap();

        assert!(matches!(
            bucket.add(&event(0, "INFO")).await,
            Err(OpticsError::BucketDropped(_))
        ));
        let (start, end) = whole_hour();
        assert!(bucket.search("", 0, 0, start, end).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_filters_by_query_and_time() {
        let store = Arc::new(MemoryStore::new());
        let bucket = open_bucket(&store).await;
        let events: Vec<OpticsEvent> = (0..10)
            .map(|i| event(i * 60_000, if i % 2 == 0 { "INFO" } else { "ERROR" }))
            .collect();
        bucket.add_range(&events).await.unwrap();

        let (start, end) = whole_hour();
        let errors = bucket
            .search(r#"LOG_LEVEL="ERROR""#, 0, 0, start, end)
            .await
            .unwrap();
        assert_eq!(errors.iter().map(|e| e.id).collect::<Vec<_>>(), vec![2, 4, 6, 8, 10]);

        let window = bucket
            .search("", 0, 0, hour() + Duration::minutes(3), hour() + Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(window.iter().map(|e| e.id).collect::<Vec<_>>(), vec![4, 5, 6]);
    }

    #[tokio::test]
    async fn test_search_respects_max_count_and_start_id() {
        let store = Arc::new(MemoryStore::new());
        let bucket = open_bucket(&store).await;
        let events: Vec<OpticsEvent> = (0..10).map(|i| event(i, "INFO")).collect();
        bucket.add_range(&events).await.unwrap();

        let (start, end) = whole_hour();
        let page = bucket.search("", 3, 0, start, end).await.unwrap();
        assert_eq!(page.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2, 3]);

        let next = bucket.search("", 3, 3, start, end).await.unwrap();
        assert_eq!(next.iter().map(|e| e.id).collect::<Vec<_>>(), vec![4, 5, 6]);

        let rest = bucket.search("", 0, 8, start, end).await.unwrap();
        assert_eq!(rest.iter().map(|e| e.id).collect::<Vec<_>>(), vec![9, 10]);
    }

    #[tokio::test]
    async fn test_seek_includes_all_equal_timestamps() {
        let store = Arc::new(MemoryStore::new());
        let bucket = open_bucket(&store).await;
        // 100 events, four per second
        let events: Vec<OpticsEvent> = (0..100).map(|i| event((i / 4) * 1000, "INFO")).collect();
        bucket.add_range(&events).await.unwrap();

        let end = hour() + Duration::minutes(59);

        let exact = bucket
            .search("", 0, 0, hour() + Duration::seconds(10), end)
            .await
            .unwrap();
        assert_eq!(exact.first().map(|e| e.id), Some(41));
        assert_eq!(exact.len(), 60);

        let between = bucket
            .search("", 0, 0, hour() + Duration::milliseconds(10_500), end)
            .await
            .unwrap();
        assert_eq!(between.first().map(|e| e.id), Some(45));
        assert_eq!(between.len(), 56);

        let past_end = bucket
            .search("", 0, 0, hour() + Duration::seconds(30), end)
            .await
            .unwrap();
        assert!(past_end.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_query_is_error() {
        let store = Arc::new(MemoryStore::new());
        let bucket = open_bucket(&store).await;
        let (start, end) = whole_hour();

        let result = bucket.search(r#"A="#, 0, 0, start, end).await;
        assert!(matches!(result, Err(OpticsError::Query(_))));
    }
}
