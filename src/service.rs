//! Optics service
//!
//! The contract callers talk to. Ingestion is fire-and-forget: events are
//! queued and a background loop drains them into the event set in batches.
//! Queries are paged and never fail outright; errors come back inside the
//! [`QueryResponse`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, MissedTickBehavior};

use crate::config::OpticsConfig;
use crate::query::{CacheStats, CriteriaCache};
use crate::storage::{
    BucketSummary, ContinuationToken, OpticsEvent, OpticsResult, OpticsSet, StateStore,
};

const DEBUG_LEVEL: &str = "DEBUG";

struct QueuedEvent {
    event: OpticsEvent,
    /// Drains that already tried and failed to commit this event
    attempts: u32,
}

/// One page of query results
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResponse {
    pub events: Vec<OpticsEvent>,
    /// Zero when this is the last page
    pub continuation_token: u64,
    pub execution_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Service counters
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub bucket_count: usize,
    pub total_events: u64,
    pub queue_depth: usize,
    pub ingested: u64,
    pub filtered: u64,
    pub dropped: u64,
    pub locked: bool,
    pub cache: CacheStats,
    pub buckets: Vec<BucketSummary>,
}

/// Queue-fronted event store
pub struct OpticsService {
    set: Arc<OpticsSet>,
    cache: Arc<CriteriaCache>,
    config: OpticsConfig,
    queue: Mutex<VecDeque<QueuedEvent>>,
    ingested: AtomicU64,
    filtered: AtomicU64,
    dropped: AtomicU64,
    shutdown: AtomicBool,
}

impl OpticsService {
    pub fn new(set: Arc<OpticsSet>, cache: Arc<CriteriaCache>, config: OpticsConfig) -> Self {
        Self {
            set,
            cache,
            config,
            queue: Mutex::new(VecDeque::new()),
            ingested: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Rebuild every persisted bucket in `store` and wrap the set
    pub async fn open(store: Arc<dyn StateStore>, config: OpticsConfig) -> OpticsResult<Self> {
        let cache = Arc::new(CriteriaCache::new(config.cache_ttl(), config.cache_max_entries));
        let set = OpticsSet::open(store, Arc::clone(&cache))
            .await?
            .with_retention(config.retention());
        Ok(Self::new(Arc::new(set), cache, config))
    }

    pub fn set(&self) -> &Arc<OpticsSet> {
        &self.set
    }

    pub fn config(&self) -> &OpticsConfig {
        &self.config
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<QueuedEvent>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn accepts(&self, event: &OpticsEvent) -> bool {
        self.config.enable_debug_events || event.level() != Some(DEBUG_LEVEL)
    }

    /// Queue one event for ingestion
    pub fn add(&self, event: OpticsEvent) -> bool {
        self.add_batch(vec![event]) == 1
    }

    /// Queue events for ingestion, returning how many were accepted
    pub fn add_batch(&self, events: Vec<OpticsEvent>) -> usize {
        let total = events.len();
        let mut accepted = 0;
        {
            let mut queue = self.queue();
            for event in events.into_iter().filter(|event| self.accepts(event)) {
                queue.push_back(QueuedEvent { event, attempts: 0 });
                accepted += 1;
            }
        }

        let filtered = total - accepted;
        if filtered > 0 {
            self.filtered.fetch_add(filtered as u64, Ordering::Relaxed);
        }
        accepted
    }

    pub fn queue_depth(&self) -> usize {
        self.queue().len()
    }

    /// Apply up to one batch of queued events, returning how many committed
    ///
    /// Events whose transaction failed go back to the front of the queue
    /// until they have been tried `max_ingest_attempts` times.
    pub async fn drain_once(&self) -> usize {
        let batch: Vec<QueuedEvent> = {
            let mut queue = self.queue();
            let take = queue.len().min(self.config.batch_size.max(1));
            queue.drain(..take).collect()
        };
        if batch.is_empty() {
            return 0;
        }

        let mut by_attempts: BTreeMap<u32, Vec<OpticsEvent>> = BTreeMap::new();
        for queued in batch {
            by_attempts.entry(queued.attempts).or_default().push(queued.event);
        }

        let mut committed = 0;
        let mut requeue = Vec::new();
        // retried events sit at the front of the queue, so apply them first
        for (attempts, events) in by_attempts.into_iter().rev() {
            let report = self.set.add_range(events).await;
            committed += report.committed.len();

            if report.discarded > 0 {
                self.dropped.fetch_add(report.discarded as u64, Ordering::Relaxed);
            }
            if report.retry.is_empty() {
                continue;
            }

            let attempts = attempts + 1;
            if attempts >= self.config.max_ingest_attempts {
                tracing::error!(
                    events = report.retry.len(),
                    attempts,
                    "Dropping events after repeated commit failures"
                );
                self.dropped.fetch_add(report.retry.len() as u64, Ordering::Relaxed);
            } else {
                requeue.extend(
                    report
                        .retry
                        .into_iter()
                        .map(|event| QueuedEvent { event, attempts }),
                );
            }
        }

        let requeued = requeue.len();
        if requeued > 0 {
            let mut queue = self.queue();
            for queued in requeue.into_iter().rev() {
                queue.push_front(queued);
            }
        }

        self.ingested.fetch_add(committed as u64, Ordering::Relaxed);
        tracing::debug!(committed, requeued, "Drained ingest batch");
        committed
    }

    /// Drain until the queue is empty
    pub async fn drain_pending(&self) -> usize {
        let mut committed = 0;
        while self.queue_depth() > 0 {
            committed += self.drain_once().await;
        }
        committed
    }

    /// One page of events matching `query`
    ///
    /// Never fails: errors are reported in `QueryResponse::error` with an
    /// empty page and a zero token.
    pub async fn query(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        continuation_token: u64,
    ) -> QueryResponse {
        let started = Instant::now();
        let result = self
            .try_query(query, start, end, ContinuationToken::from(continuation_token))
            .await;
        let execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok((events, token)) => QueryResponse {
                events,
                continuation_token: token.value(),
                execution_time_ms,
                error: None,
            },
            Err(e) => {
                tracing::warn!(query, "Query failed: {}", e);
                QueryResponse {
                    events: Vec::new(),
                    continuation_token: 0,
                    execution_time_ms,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// One page of events plus the token for the next page
    ///
    /// The page is ordered by `(timestamp, id)`. The token points at the last
    /// event in bucket order so the next page resumes right after it.
    pub async fn try_query(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        token: ContinuationToken,
    ) -> OpticsResult<(Vec<OpticsEvent>, ContinuationToken)> {
        let page = self.config.page_size.max(1);
        let mut events = self.set.query(query, start, end, page + 1, token).await?;

        let next = if events.len() > page {
            events.truncate(page);
            events
                .last()
                .map(OpticsEvent::continuation_token)
                .unwrap_or(ContinuationToken::START)
        } else {
            ContinuationToken::START
        };

        events.sort_by_key(|event| (event.timestamp, event.id));
        Ok((events, next))
    }

    /// Follow continuation tokens and return every matching event
    pub async fn query_all(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> OpticsResult<Vec<OpticsEvent>> {
        let mut token = ContinuationToken::START;
        let mut events = Vec::new();
        loop {
            let (page, next) = self.try_query(query, start, end, token).await?;
            events.extend(page);
            if next.is_start() {
                return Ok(events);
            }
            token = next;
        }
    }

    /// Number of matching events, `0` if the query fails
    pub async fn query_count(&self, query: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
        match self.set.query_count(query, start, end).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(query, "Count failed: {}", e);
                0
            }
        }
    }

    pub async fn purge(&self) -> OpticsResult<usize> {
        self.set.purge().await
    }

    pub async fn lock(&self) -> OpticsResult<()> {
        self.set.lock().await
    }

    pub async fn unlock(&self) -> OpticsResult<()> {
        self.set.unlock().await
    }

    /// Run the retention sweep as of `now`
    pub async fn drop_data(&self, now: DateTime<Utc>) -> OpticsResult<usize> {
        self.set.drop_data(now).await
    }

    pub async fn stats(&self) -> ServiceStats {
        ServiceStats {
            bucket_count: self.set.bucket_count().await,
            total_events: self.set.total_events().await,
            queue_depth: self.queue_depth(),
            ingested: self.ingested.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            locked: self.set.is_locked(),
            cache: self.cache.stats(),
            buckets: self.set.buckets().await,
        }
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Spawn the ingest drain loop
    pub fn start_background_drain(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = interval(service.config.drain_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                if service.is_shutting_down() {
                    break;
                }

                if service.queue_depth() > 0 {
                    service.drain_once().await;
                }
            }

            // Final drain on shutdown
            let committed = service.drain_pending().await;
            tracing::debug!(committed, "Ingest drain loop stopped");
        })
    }

    /// Spawn the periodic retention sweep
    ///
    /// The first sweep runs one full period after start.
    pub fn start_retention_sweep(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);

        tokio::spawn(async move {
            let period = service.config.sweep_interval();
            let mut ticker = interval_at(tokio::time::Instant::now() + period, period);

            loop {
                ticker.tick().await;

                if service.is_shutting_down() {
                    break;
                }

                match service.drop_data(Utc::now()).await {
                    Ok(dropped) => tracing::debug!(dropped, "Retention sweep finished"),
                    Err(e) => tracing::error!("Retention sweep failed: {}", e),
                }
                service.cache.purge_expired();
            }
        })
    }

    /// Stop the background loops and apply whatever is still queued
    pub async fn shutdown(&self) -> usize {
        self.shutdown.store(true, Ordering::SeqCst);
        let committed = self.drain_pending().await;
        tracing::info!(committed, "Optics service shut down");
        committed
    }
}
