//! Transactional key-value store contract
//!
//! Buckets persist through this trait only. A store holds named, ordered
//! maps of byte keys to byte values; writes are staged in a [`Transaction`]
//! and applied together on [`StateStore::commit`].

use async_trait::async_trait;

use crate::storage::error::{StoreError, StoreResult};

/// A single staged write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Insert or replace `key` in `map`
    Set {
        map: String,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    /// Delete `key` from `map`
    Remove { map: String, key: Vec<u8> },
}

impl WriteOp {
    /// Map this operation targets
    pub fn map(&self) -> &str {
        match self {
            WriteOp::Set { map, .. } | WriteOp::Remove { map, .. } => map,
        }
    }
}

/// A batch of writes applied atomically per map
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    ops: Vec<WriteOp>,
}

impl Transaction {
    /// Start an empty transaction
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage an insert or replace
    pub fn set(&mut self, map: &str, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(WriteOp::Set {
            map: map.to_string(),
            key: key.into(),
            value: value.into(),
        });
    }

    /// Stage a delete
    pub fn remove(&mut self, map: &str, key: impl Into<Vec<u8>>) {
        self.ops.push(WriteOp::Remove {
            map: map.to_string(),
            key: key.into(),
        });
    }

    /// Read back a value staged in this transaction
    ///
    /// `Some(None)` means the key was staged for removal.
    pub fn get(&self, map: &str, key: &[u8]) -> Option<Option<&[u8]>> {
        self.ops.iter().rev().find_map(|op| match op {
            WriteOp::Set { map: m, key: k, value } if m == map && k == key => {
                Some(Some(value.as_slice()))
            }
            WriteOp::Remove { map: m, key: k } if m == map && k == key => Some(None),
            _ => None,
        })
    }

    /// Number of staged writes
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing has been staged
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Staged writes in the order they were added
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Consume the transaction, yielding its writes
    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Durable, ordered key-value collections
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Create the named map if it does not exist yet
    async fn open_map(&self, name: &str) -> StoreResult<()>;

    /// Delete the named map and everything in it
    ///
    /// Returns `false` if the map did not exist.
    async fn remove_map(&self, name: &str) -> StoreResult<bool>;

    /// Names of all existing maps
    async fn map_names(&self) -> StoreResult<Vec<String>>;

    /// Read a single value
    async fn get(&self, map: &str, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// Number of entries in a map
    async fn count(&self, map: &str) -> StoreResult<usize>;

    /// All entries of a map in ascending key order
    async fn scan(&self, map: &str) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Apply every write in the transaction
    ///
    /// Either all writes to a given map become visible or none do.
    async fn commit(&self, tx: Transaction) -> StoreResult<()>;

    /// Start a new transaction against this store
    fn begin(&self) -> Transaction {
        Transaction::new()
    }
}

/// Encode an event id as a key that sorts numerically
pub fn id_key(id: u32) -> [u8; 4] {
    id.to_be_bytes()
}

/// Decode a key produced by [`id_key`]
pub fn decode_id_key(key: &[u8]) -> StoreResult<u32> {
    let bytes: [u8; 4] = key
        .try_into()
        .map_err(|_| StoreError::Corruption(format!("invalid id key of {} bytes", key.len())))?;
    Ok(u32::from_be_bytes(bytes))
}
