//! Core data types for the Optics event store
//!
//! - `OpticsEvent`: a single telemetry event with string properties
//! - `BucketKey`: the hour slot an event belongs to
//! - `ContinuationToken`: packed `(event id, bucket epoch seconds)` cursor

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Property holding the severity of an event
pub const LOG_LEVEL_PROPERTY: &str = "LOG_LEVEL";

/// Prefix of every durable map owned by a bucket
pub const BUCKET_MAP_PREFIX: &str = "optics_";

/// Suffix of the per-bucket options map
pub const OPTIONS_MAP_SUFFIX: &str = ".options";

const BUCKET_KEY_FORMAT: &str = "%Y%m%d%H";
const SECONDS_PER_BUCKET: i64 = 3600;

/// A single telemetry event
///
/// Immutable once it has been assigned an id by its bucket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpticsEvent {
    /// Bucket-local id, `0` until the event is stored
    #[serde(default)]
    pub id: u32,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    /// Property key/value pairs
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Epoch seconds of the owning bucket, filled in on read
    #[serde(default)]
    pub bucket_id: u32,
}

impl OpticsEvent {
    /// Create an event stamped with the current time
    pub fn new() -> Self {
        Self::with_timestamp(Utc::now().timestamp_millis())
    }

    /// Create an event with a specific timestamp (milliseconds)
    pub fn with_timestamp(timestamp: i64) -> Self {
        Self {
            id: 0,
            timestamp,
            properties: BTreeMap::new(),
            bucket_id: 0,
        }
    }

    /// Create an event at a specific instant
    pub fn at(dt: DateTime<Utc>) -> Self {
        Self::with_timestamp(dt.timestamp_millis())
    }

    /// Builder method: add a property
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Builder method: add multiple properties
    pub fn properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.properties.extend(properties);
        self
    }

    /// Look up a property value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Severity of the event, if it carries one
    pub fn level(&self) -> Option<&str> {
        self.get(LOG_LEVEL_PROPERTY)
    }

    /// Timestamp as a `DateTime`
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }

    /// Position of this event in `(bucket, id)` order
    pub fn continuation_token(&self) -> ContinuationToken {
        ContinuationToken::new(self.id, self.bucket_id)
    }
}

impl Default for OpticsEvent {
    fn default() -> Self {
        Self::new()
    }
}

/// The hour slot that owns a range of events
///
/// Formats as `yyyyMMddHH` and orders chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketKey {
    start: DateTime<Utc>,
}

impl BucketKey {
    /// Bucket containing the given instant
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        let secs = dt.timestamp();
        let hour = secs - secs.rem_euclid(SECONDS_PER_BUCKET);
        let start = DateTime::from_timestamp(hour, 0).unwrap_or(dt);
        Self { start }
    }

    /// Bucket containing the given millisecond timestamp
    pub fn from_timestamp_millis(timestamp: i64) -> Option<Self> {
        DateTime::from_timestamp_millis(timestamp).map(Self::from_datetime)
    }

    /// Parse a `yyyyMMddHH` key
    pub fn parse(key: &str) -> Option<Self> {
        if key.len() != 10 || !key.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let naive = NaiveDateTime::parse_from_str(&format!("{}00", key), "%Y%m%d%H%M").ok()?;
        Some(Self {
            start: naive.and_utc(),
        })
    }

    /// Recover a bucket key from the name of its events map
    pub fn from_map_name(name: &str) -> Option<Self> {
        name.strip_prefix(BUCKET_MAP_PREFIX).and_then(Self::parse)
    }

    /// First instant covered by this bucket
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// First instant after this bucket
    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::seconds(SECONDS_PER_BUCKET)
    }

    /// Whether the timestamp (milliseconds) falls inside this bucket
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start.timestamp_millis() && timestamp < self.end().timestamp_millis()
    }

    /// Seconds since the Unix epoch of the bucket start
    pub fn epoch_seconds(&self) -> i64 {
        self.start.timestamp()
    }

    /// Bucket start as the 32-bit value carried in continuation tokens
    ///
    /// `None` for buckets before 1970 or after 2106.
    pub fn token_seconds(&self) -> Option<u32> {
        u32::try_from(self.epoch_seconds()).ok()
    }

    /// Name of the durable map holding this bucket's events
    pub fn map_name(&self) -> String {
        format!("{}{}", BUCKET_MAP_PREFIX, self)
    }

    /// Name of the durable map holding this bucket's options
    pub fn options_map_name(&self) -> String {
        format!("{}{}{}", BUCKET_MAP_PREFIX, self, OPTIONS_MAP_SUFFIX)
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.start.format(BUCKET_KEY_FORMAT))
    }
}

/// Cursor for resuming a paged query
///
/// The high 32 bits hold the last returned event id and the low 32 bits hold
/// the epoch seconds of that event's bucket. Zero means "start of range".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContinuationToken(u64);

impl ContinuationToken {
    /// Token that starts at the beginning of the range
    pub const START: ContinuationToken = ContinuationToken(0);

    /// Pack an event id and bucket epoch seconds
    pub fn new(id: u32, bucket_seconds: u32) -> Self {
        Self(((id as u64) << 32) | bucket_seconds as u64)
    }

    /// Last event id visited inside the token's bucket
    pub fn id(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Epoch seconds of the last visited bucket
    pub fn bucket_seconds(&self) -> u32 {
        (self.0 & u32::MAX as u64) as u32
    }

    /// Whether this token starts from the beginning of the range
    pub fn is_start(&self) -> bool {
        self.0 == 0
    }

    /// Raw packed value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ContinuationToken {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<ContinuationToken> for u64 {
    fn from(token: ContinuationToken) -> Self {
        token.0
    }
}
