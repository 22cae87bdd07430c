//! Log-structured file store
//!
//! Every map lives in its own append-only file `<name>.log`. Each commit
//! appends one frame per touched map:
//!
//! - length: u32 (4 bytes, little endian)
//! - payload: [u8; length] (LZ4-compressed bincode `Vec<LogRecord>`)
//! - crc: u32 (4 bytes, CRC32 of length + payload)
//!
//! On open every file is replayed into memory. Replay stops at the first
//! torn or corrupt frame and the file is truncated back to the last good one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::storage::error::{StoreError, StoreResult};
use crate::storage::store::{StateStore, Transaction, WriteOp};

const LOG_EXTENSION: &str = "log";
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
enum LogRecord {
    Set { key: Vec<u8>, value: Vec<u8> },
    Remove { key: Vec<u8> },
}

struct MapLog {
    path: PathBuf,
    file: File,
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Length of the file up to the end of the last good frame
    valid_len: u64,
}

impl MapLog {
    fn create(path: PathBuf) -> StoreResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        Ok(Self {
            path,
            file,
            entries: BTreeMap::new(),
            valid_len: 0,
        })
    }

    fn replay(path: PathBuf) -> StoreResult<Self> {
        let bytes = std::fs::read(&path)?;
        let mut entries = BTreeMap::new();
        let mut offset = 0usize;
        let mut frames = 0usize;

        while offset < bytes.len() {
            match decode_frame(&bytes[offset..]) {
                Ok((records, consumed)) => {
                    apply_records(&mut entries, records);
                    offset += consumed;
                    frames += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        frame = frames,
                        offset,
                        "Log replay stopped, truncating tail: {}",
                        e
                    );
                    break;
                }
            }
        }

        let file = OpenOptions::new().read(true).append(true).open(&path)?;
        if offset < bytes.len() {
            file.set_len(offset as u64)?;
        }

        Ok(Self {
            path,
            file,
            entries,
            valid_len: offset as u64,
        })
    }

    fn append(&mut self, records: Vec<LogRecord>, sync: bool) -> StoreResult<()> {
        let frame = encode_frame(&records)?;

        if let Err(e) = self.write_frame(&frame, sync) {
            // Drop any partial frame so later appends stay readable
            if let Err(trunc) = self.file.set_len(self.valid_len) {
                tracing::error!(
                    path = %self.path.display(),
                    "Failed to truncate torn frame: {}",
                    trunc
                );
            }
            return Err(e);
        }

        self.valid_len += frame.len() as u64;
        apply_records(&mut self.entries, records);
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8], sync: bool) -> StoreResult<()> {
        self.file.write_all(frame)?;
        if sync {
            self.file.sync_data()?;
        }
        Ok(())
    }
}

fn apply_records(entries: &mut BTreeMap<Vec<u8>, Vec<u8>>, records: Vec<LogRecord>) {
    for record in records {
        match record {
            LogRecord::Set { key, value } => {
                entries.insert(key, value);
            }
            LogRecord::Remove { key } => {
                entries.remove(&key);
            }
        }
    }
}

fn encode_frame(records: &[LogRecord]) -> StoreResult<Vec<u8>> {
    let serialized = bincode::serialize(records)?;
    let payload = lz4_flex::compress_prepend_size(&serialized);
    let len_bytes = (payload.len() as u32).to_le_bytes();

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&len_bytes);
    hasher.update(&payload);
    let crc = hasher.finalize();

    let mut frame = Vec::with_capacity(payload.len() + 8);
    frame.extend_from_slice(&len_bytes);
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// Decode one frame from the front of `bytes`, returning it and its size
fn decode_frame(bytes: &[u8]) -> StoreResult<(Vec<LogRecord>, usize)> {
    if bytes.len() < 4 {
        return Err(StoreError::Corruption("truncated frame header".to_string()));
    }
    let len_bytes = [bytes[0], bytes[1], bytes[2], bytes[3]];
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_FRAME_LEN {
        return Err(StoreError::Corruption(format!("frame length too large: {}", len)));
    }
    let total = 4 + len + 4;
    if bytes.len() < total {
        return Err(StoreError::Corruption(format!(
            "truncated frame: need {} bytes, have {}",
            total,
            bytes.len()
        )));
    }

    let payload = &bytes[4..4 + len];
    let stored_crc = u32::from_le_bytes([
        bytes[4 + len],
        bytes[5 + len],
        bytes[6 + len],
        bytes[7 + len],
    ]);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&len_bytes);
    hasher.update(payload);
    let computed_crc = hasher.finalize();

    if stored_crc != computed_crc {
        return Err(StoreError::Corruption(format!(
            "CRC mismatch: stored={}, computed={}",
            stored_crc, computed_crc
        )));
    }

    let decompressed = lz4_flex::decompress_size_prepended(payload)
        .map_err(|e| StoreError::Compression(format!("LZ4 decompression failed: {}", e)))?;
    let records: Vec<LogRecord> = bincode::deserialize(&decompressed)?;

    Ok((records, total))
}

fn validate_map_name(name: &str) -> StoreResult<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidMapName(name.to_string()))
    }
}

/// Durable [`StateStore`] backed by one log file per map
pub struct FileStore {
    dir: PathBuf,
    sync_on_commit: bool,
    maps: RwLock<HashMap<String, MapLog>>,
}

impl FileStore {
    /// Open or create a store rooted at `dir`, replaying every map log
    pub fn open(dir: impl AsRef<Path>, sync_on_commit: bool) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let mut maps = HashMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(LOG_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            if validate_map_name(&name).is_err() {
                tracing::warn!(path = %path.display(), "Skipping log with unusable map name");
                continue;
            }

            let log = MapLog::replay(path)?;
            tracing::debug!(map = %name, entries = log.entries.len(), "Replayed map log");
            maps.insert(name, log);
        }

        tracing::info!(dir = %dir.display(), maps = maps.len(), "File store opened");

        Ok(Self {
            dir,
            sync_on_commit,
            maps: RwLock::new(maps),
        })
    }

    /// Root directory of this store
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn map_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, LOG_EXTENSION))
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn open_map(&self, name: &str) -> StoreResult<()> {
        validate_map_name(name)?;
        let mut maps = self.maps.write().await;
        if !maps.contains_key(name) {
            let log = MapLog::create(self.map_path(name))?;
            maps.insert(name.to_string(), log);
        }
        Ok(())
    }

    async fn remove_map(&self, name: &str) -> StoreResult<bool> {
        let mut maps = self.maps.write().await;
        match maps.remove(name) {
            Some(log) => {
                let path = log.path.clone();
                drop(log);
                match std::fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn map_names(&self) -> StoreResult<Vec<String>> {
        let mut names: Vec<String> = self.maps.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn get(&self, map: &str, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let maps = self.maps.read().await;
        let log = maps
            .get(map)
            .ok_or_else(|| StoreError::MapNotFound(map.to_string()))?;
        Ok(log.entries.get(key).cloned())
    }

    async fn count(&self, map: &str) -> StoreResult<usize> {
        let maps = self.maps.read().await;
        maps.get(map)
            .map(|log| log.entries.len())
            .ok_or_else(|| StoreError::MapNotFound(map.to_string()))
    }

    async fn scan(&self, map: &str) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let maps = self.maps.read().await;
        let log = maps
            .get(map)
            .ok_or_else(|| StoreError::MapNotFound(map.to_string()))?;
        Ok(log
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn commit(&self, tx: Transaction) -> StoreResult<()> {
        let mut maps = self.maps.write().await;

        if let Some(op) = tx.ops().iter().find(|op| !maps.contains_key(op.map())) {
            return Err(StoreError::MapNotFound(op.map().to_string()));
        }

        // One frame per map, preserving write order within each map
        let mut grouped: BTreeMap<String, Vec<LogRecord>> = BTreeMap::new();
        for op in tx.into_ops() {
            match op {
                WriteOp::Set { map, key, value } => {
                    grouped.entry(map).or_default().push(LogRecord::Set { key, value });
                }
                WriteOp::Remove { map, key } => {
                    grouped.entry(map).or_default().push(LogRecord::Remove { key });
                }
            }
        }

        for (name, records) in grouped {
            if let Some(log) = maps.get_mut(&name) {
                log.append(records, self.sync_on_commit)?;
            }
        }

        Ok(())
    }
}
