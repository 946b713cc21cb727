//! Append-only log backing one store
//!
//! - Every put/delete appends one frame and fsyncs before returning
//! - Latest frame for a key wins; tombstones remove the key
//! - The key index and secondary indexes are rebuilt by scanning on open
//! - A frame cut short at the end of the file (torn write) is truncated away;
//!   damage anywhere else fails the open

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;

use super::errors::{StorageError, StorageResult};
use super::record::{Record, RecordFrame, MIN_FRAME_SIZE};
use crate::integrity;
use crate::observability::{log_event, Event};
use crate::schema::StoreDefinition;

/// Location and metadata of the live frame for a key
#[derive(Debug, Clone)]
struct LogEntry {
    offset: u64,
    timestamp: i64,
    /// (index name, canonical indexed value)
    indexed: Vec<(String, String)>,
}

/// index name -> canonical value -> keys
type SecondaryIndexes = BTreeMap<String, BTreeMap<String, BTreeSet<String>>>;

/// One store's log file plus its in-memory indexes
#[derive(Debug)]
pub struct StoreLog {
    definition: StoreDefinition,
    path: PathBuf,
    /// `None` when opened read-only
    file: Option<File>,
    current_offset: u64,
    entries: BTreeMap<String, LogEntry>,
    indexes: SecondaryIndexes,
}

impl StoreLog {
    /// Opens (creating unless `read_only`) the log at `path` and rebuilds
    /// its indexes.
    pub fn open(path: &Path, definition: StoreDefinition, read_only: bool) -> StorageResult<Self> {
        let file = if read_only {
            None
        } else {
            Some(
                OpenOptions::new()
                    .create(true)
                    .read(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| {
                        StorageError::open_failed(
                            format!("Failed to open store log: {}", path.display()),
                            e,
                        )
                    })?,
            )
        };

        let mut log = Self {
            indexes: definition
                .indexes
                .iter()
                .map(|i| (i.name.clone(), BTreeMap::new()))
                .collect(),
            definition,
            path: path.to_path_buf(),
            file,
            current_offset: 0,
            entries: BTreeMap::new(),
        };
        log.rebuild()?;
        Ok(log)
    }

    fn rebuild(&mut self) -> StorageResult<()> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(StorageError::open_failed(
                    format!("Failed to read store log: {}", self.path.display()),
                    e,
                ))
            }
        };

        let mut offset = 0usize;
        while offset < data.len() {
            let remaining = data.len() - offset;
            if remaining < 4 || is_torn(&data[offset..]) {
                self.truncate_torn_tail(offset as u64, remaining)?;
                break;
            }

            let (frame, used) = RecordFrame::decode(&data[offset..]).map_err(|e| {
                StorageError::corruption_at_offset(self.name(), offset as u64, e.to_string())
            })?;
            self.apply(frame, offset as u64);
            offset += used;
        }

        self.current_offset = offset as u64;
        Ok(())
    }

    fn truncate_torn_tail(&mut self, offset: u64, dropped: usize) -> StorageResult<()> {
        let offset_str = offset.to_string();
        let dropped_str = dropped.to_string();
        log_event(
            Event::TornTailTruncated,
            &[
                ("store", self.name()),
                ("byte_offset", &offset_str),
                ("dropped_bytes", &dropped_str),
            ],
        );
        if let Some(file) = &self.file {
            file.set_len(offset)
                .and_then(|_| file.sync_all())
                .map_err(|e| StorageError::open_failed("Failed to truncate torn store log", e))?;
        }
        Ok(())
    }

    fn apply(&mut self, frame: RecordFrame, offset: u64) {
        self.unindex(&frame.key);
        if frame.tombstone {
            self.entries.remove(&frame.key);
            return;
        }

        let indexed = match frame.payload_value() {
            Ok(payload) => self.index_values(&payload),
            Err(reason) => {
                // Still addressable by key so reads report the corruption
                log_event(
                    Event::CorruptionDetected,
                    &[("store", self.name()), ("key", &frame.key), ("reason", &reason)],
                );
                Vec::new()
            }
        };
        self.index(&frame.key, &indexed);
        self.entries.insert(
            frame.key,
            LogEntry {
                offset,
                timestamp: frame.timestamp,
                indexed,
            },
        );
    }

    fn index_values(&self, payload: &Value) -> Vec<(String, String)> {
        self.definition
            .indexes
            .iter()
            .filter_map(|index| {
                index.extract(payload).map(|v| {
                    let canonical = String::from_utf8_lossy(&integrity::canonical_bytes(v)).into_owned();
                    (index.name.clone(), canonical)
                })
            })
            .collect()
    }

    fn index(&mut self, key: &str, indexed: &[(String, String)]) {
        for (name, value) in indexed {
            if let Some(map) = self.indexes.get_mut(name) {
                map.entry(value.clone()).or_default().insert(key.to_string());
            }
        }
    }

    fn unindex(&mut self, key: &str) {
        let Some(entry) = self.entries.get(key) else {
            return;
        };
        for (name, value) in &entry.indexed {
            if let Some(map) = self.indexes.get_mut(name) {
                if let Some(keys) = map.get_mut(value) {
                    keys.remove(key);
                    if keys.is_empty() {
                        map.remove(value);
                    }
                }
            }
        }
    }

    /// Store name
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Bytes currently occupied by the log
    pub fn size(&self) -> u64 {
        self.current_offset
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the store holds no live keys
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live keys in order
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Returns whether `key` is live
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn file_mut(&mut self) -> StorageResult<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| StorageError::write_failed_no_source("Store log is read-only"))
    }

    fn append(&mut self, bytes: &[u8], key: &str) -> StorageResult<u64> {
        let offset = self.current_offset;
        let file = self.file_mut()?;
        file.write_all(bytes).map_err(|e| {
            StorageError::write_failed(format!("Failed to append record: {}", key), e)
        })?;
        file.sync_all().map_err(|e| {
            StorageError::write_failed(format!("fsync failed after writing record: {}", key), e)
        })?;
        self.current_offset += bytes.len() as u64;
        Ok(offset)
    }

    /// Writes `payload` under `key`.
    ///
    /// `now` is clamped to the key's previous timestamp so timestamps never
    /// go backwards. `budget` is the number of bytes the medium may still
    /// grow by.
    pub fn put(
        &mut self,
        key: &str,
        payload: &Value,
        schema_version: u32,
        now: i64,
        budget: u64,
    ) -> StorageResult<Record> {
        let timestamp = self
            .entries
            .get(key)
            .map_or(now, |entry| now.max(entry.timestamp));

        let indexed = self.index_values(payload);
        for (name, value) in &indexed {
            let unique = self.definition.index(name).map_or(false, |i| i.unique);
            if !unique {
                continue;
            }
            let holder = self
                .indexes
                .get(name)
                .and_then(|map| map.get(value))
                .and_then(|keys| keys.iter().find(|k| k.as_str() != key));
            if let Some(existing) = holder {
                return Err(StorageError::constraint_violation(self.name(), name, existing));
            }
        }

        let frame = RecordFrame::live(key, schema_version, timestamp, payload);
        let bytes = frame.encode();
        if bytes.len() as u64 > budget {
            return Err(StorageError::quota_exceeded(bytes.len() as u64, budget));
        }

        let offset = self.append(&bytes, key)?;
        self.unindex(key);
        self.index(key, &indexed);
        self.entries.insert(
            key.to_string(),
            LogEntry {
                offset,
                timestamp,
                indexed,
            },
        );

        Ok(Record {
            id: key.to_string(),
            store: self.name().to_string(),
            payload: payload.clone(),
            timestamp,
            checksum: frame.checksum,
            schema_version,
            synced: false,
        })
    }

    /// Appends a tombstone for `key`. Returns `false` if the key was absent.
    pub fn delete(&mut self, key: &str, schema_version: u32, now: i64) -> StorageResult<bool> {
        let Some(previous) = self.entries.get(key).map(|e| e.timestamp) else {
            return Ok(false);
        };
        let frame = RecordFrame::tombstone(key, schema_version, now.max(previous));
        self.append(&frame.encode(), key)?;
        self.unindex(key);
        self.entries.remove(key);
        Ok(true)
    }

    /// Reads the live frame for `key`, if any.
    ///
    /// Verifies the header; the caller verifies the payload.
    pub fn get(&self, key: &str) -> StorageResult<Option<RecordFrame>> {
        match self.entries.get(key) {
            Some(entry) => self.read_frame_at(entry.offset).map(Some),
            None => Ok(None),
        }
    }

    fn read_frame_at(&self, offset: u64) -> StorageResult<RecordFrame> {
        let mut file = File::open(&self.path).map_err(|e| {
            StorageError::read_failed(format!("Failed to open store log: {}", self.path.display()), e)
        })?;
        file.seek(SeekFrom::Start(offset)).map_err(|e| {
            StorageError::read_failed(format!("Failed to seek to offset {}", offset), e)
        })?;

        let mut len_buf = [0u8; 4];
        file.read_exact(&mut len_buf).map_err(|e| {
            StorageError::corruption_at_offset(self.name(), offset, format!("Failed to read frame length: {}", e))
        })?;
        let frame_len = u32::from_le_bytes(len_buf) as usize;
        if frame_len < MIN_FRAME_SIZE {
            return Err(StorageError::corruption_at_offset(
                self.name(),
                offset,
                format!("Invalid frame length: {}", frame_len),
            ));
        }

        let mut buf = vec![0u8; frame_len];
        buf[..4].copy_from_slice(&len_buf);
        file.read_exact(&mut buf[4..]).map_err(|e| {
            StorageError::corruption_at_offset(self.name(), offset, format!("Failed to read frame: {}", e))
        })?;

        RecordFrame::decode(&buf)
            .map(|(frame, _)| frame)
            .map_err(|e| StorageError::corruption_at_offset(self.name(), offset, e.to_string()))
    }

    /// Keys whose payload holds `value` at the index's key path
    pub fn find(&self, index: &str, value: &Value) -> Option<Vec<String>> {
        let map = self.indexes.get(index)?;
        let canonical = String::from_utf8_lossy(&integrity::canonical_bytes(value)).into_owned();
        Some(
            map.get(&canonical)
                .map(|keys| keys.iter().cloned().collect())
                .unwrap_or_default(),
        )
    }

    /// Drops every record
    pub fn clear(&mut self) -> StorageResult<()> {
        let file = self.file_mut()?;
        file.set_len(0)
            .and_then(|_| file.sync_all())
            .map_err(|e| StorageError::write_failed("Failed to truncate store log", e))?;
        self.current_offset = 0;
        self.entries.clear();
        for map in self.indexes.values_mut() {
            map.clear();
        }
        Ok(())
    }

    /// Rewrites the log with live frames only. Returns bytes reclaimed.
    ///
    /// Frames are copied verbatim, so a record with a damaged payload keeps
    /// failing verification after compaction.
    pub fn compact(&mut self) -> StorageResult<u64> {
        if self.file.is_none() {
            return Err(StorageError::write_failed_no_source("Store log is read-only"));
        }

        let mut data = Vec::with_capacity(self.current_offset as usize);
        let mut offsets = Vec::with_capacity(self.entries.len());
        for (key, entry) in &self.entries {
            let frame = self.read_frame_at(entry.offset)?;
            offsets.push((key.clone(), data.len() as u64));
            data.extend_from_slice(&frame.encode());
        }

        let tmp_path = self.path.with_extension("log.compact");
        write_synced(&tmp_path, &data)
            .map_err(|e| StorageError::write_failed("Failed to write compacted log", e))?;
        fs::rename(&tmp_path, &self.path)
            .map_err(|e| StorageError::write_failed("Failed to replace store log", e))?;

        self.file = Some(
            OpenOptions::new()
                .read(true)
                .append(true)
                .open(&self.path)
                .map_err(|e| StorageError::write_failed("Failed to reopen compacted log", e))?,
        );

        let reclaimed = self.current_offset.saturating_sub(data.len() as u64);
        for (key, offset) in offsets {
            if let Some(entry) = self.entries.get_mut(&key) {
                entry.offset = offset;
            }
        }
        self.current_offset = data.len() as u64;
        Ok(reclaimed)
    }
}

/// A frame that claims more bytes than remain was cut short by a crash
fn is_torn(data: &[u8]) -> bool {
    let declared = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    declared >= MIN_FRAME_SIZE && declared > data.len()
}

fn write_synced(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::IndexDefinition;
    use serde_json::json;
    use tempfile::TempDir;

    const BUDGET: u64 = u64::MAX;

    fn definition() -> StoreDefinition {
        StoreDefinition::new("notes")
            .with_index(IndexDefinition::new("by_tag", "tag"))
            .with_index(IndexDefinition::unique("by_slug", "slug"))
    }

    fn open(dir: &TempDir) -> StoreLog {
        StoreLog::open(&dir.path().join("notes.log"), definition(), false).unwrap()
    }

    #[test]
    fn test_put_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut log = open(&dir);
        log.put("a", &json!({"text": "hi"}), 1, 10, BUDGET).unwrap();

        let frame = log.get("a").unwrap().unwrap();
        assert_eq!(frame.payload_value().unwrap(), json!({"text": "hi"}));
        assert!(log.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_reopen_rebuilds_latest_state() {
        let dir = TempDir::new().unwrap();
        {
            let mut log = open(&dir);
            log.put("a", &json!(1), 1, 10, BUDGET).unwrap();
            log.put("a", &json!(2), 1, 11, BUDGET).unwrap();
            log.put("b", &json!(3), 1, 12, BUDGET).unwrap();
            assert!(log.delete("b", 1, 13).unwrap());
        }

        let log = open(&dir);
        assert_eq!(log.keys(), vec!["a".to_string()]);
        assert_eq!(log.get("a").unwrap().unwrap().payload_value().unwrap(), json!(2));
    }

    #[test]
    fn test_timestamps_never_decrease() {
        let dir = TempDir::new().unwrap();
        let mut log = open(&dir);
        let first = log.put("a", &json!(1), 1, 500, BUDGET).unwrap();
        let second = log.put("a", &json!(2), 1, 100, BUDGET).unwrap();
        assert_eq!(first.timestamp, 500);
        assert_eq!(second.timestamp, 500);
    }

    #[test]
    fn test_delete_missing_key_appends_nothing() {
        let dir = TempDir::new().unwrap();
        let mut log = open(&dir);
        assert!(!log.delete("ghost", 1, 1).unwrap());
        assert_eq!(log.size(), 0);
    }

    #[test]
    fn test_secondary_index_tracks_updates() {
        let dir = TempDir::new().unwrap();
        let mut log = open(&dir);
        log.put("a", &json!({"tag": "work"}), 1, 1, BUDGET).unwrap();
        log.put("b", &json!({"tag": "work"}), 1, 2, BUDGET).unwrap();
        log.put("a", &json!({"tag": "home"}), 1, 3, BUDGET).unwrap();

        assert_eq!(log.find("by_tag", &json!("work")).unwrap(), vec!["b".to_string()]);
        assert_eq!(log.find("by_tag", &json!("home")).unwrap(), vec!["a".to_string()]);
        assert!(log.find("no_such_index", &json!("x")).is_none());
    }

    #[test]
    fn test_unique_index_enforced() {
        let dir = TempDir::new().unwrap();
        let mut log = open(&dir);
        log.put("a", &json!({"slug": "x"}), 1, 1, BUDGET).unwrap();
        // Same key may keep its own value
        log.put("a", &json!({"slug": "x", "v": 2}), 1, 2, BUDGET).unwrap();

        let err = log.put("b", &json!({"slug": "x"}), 1, 3, BUDGET).unwrap_err();
        assert_eq!(err.code(), super::super::errors::StorageErrorCode::ConstraintViolation);
        assert!(!log.contains("b"));
    }

    #[test]
    fn test_budget_enforced() {
        let dir = TempDir::new().unwrap();
        let mut log = open(&dir);
        let err = log.put("a", &json!("x".repeat(100)), 1, 1, 16).unwrap_err();
        assert!(err.is_medium_failure());
        assert_eq!(log.size(), 0);
    }

    #[test]
    fn test_torn_tail_truncated_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.log");
        {
            let mut log = open(&dir);
            log.put("a", &json!(1), 1, 1, BUDGET).unwrap();
        }
        let good_len = fs::metadata(&path).unwrap().len();
        {
            let partial = RecordFrame::live("b", 1, 2, &json!(2)).encode();
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&partial[..partial.len() / 2]).unwrap();
        }

        let log = open(&dir);
        assert_eq!(log.keys(), vec!["a".to_string()]);
        assert_eq!(fs::metadata(&path).unwrap().len(), good_len);
    }

    #[test]
    fn test_mid_file_damage_fails_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.log");
        {
            let mut log = open(&dir);
            log.put("a", &json!(1), 1, 1, BUDGET).unwrap();
            log.put("b", &json!(2), 1, 2, BUDGET).unwrap();
        }
        let mut bytes = fs::read(&path).unwrap();
        // Timestamp of the first frame
        bytes[14] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        let err = StoreLog::open(&path, definition(), false).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_clear_and_compact() {
        let dir = TempDir::new().unwrap();
        let mut log = open(&dir);
        for i in 0..5 {
            log.put("a", &json!(i), 1, i, BUDGET).unwrap();
        }
        log.put("b", &json!({"tag": "t"}), 1, 9, BUDGET).unwrap();

        let reclaimed = log.compact().unwrap();
        assert!(reclaimed > 0);
        assert_eq!(log.get("a").unwrap().unwrap().payload_value().unwrap(), json!(4));
        assert_eq!(log.find("by_tag", &json!("t")).unwrap(), vec!["b".to_string()]);

        // Still appendable after the file swap
        log.put("c", &json!(0), 1, 10, BUDGET).unwrap();
        drop(log);
        let mut log = open(&dir);
        assert_eq!(log.len(), 3);

        log.clear().unwrap();
        assert!(log.is_empty());
        assert_eq!(log.size(), 0);
    }

    #[test]
    fn test_read_only_refuses_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.log");
        open(&dir).put("a", &json!(1), 1, 1, BUDGET).unwrap();

        let mut log = StoreLog::open(&path, definition(), true).unwrap();
        assert_eq!(log.keys(), vec!["a".to_string()]);
        assert!(log.put("b", &json!(2), 1, 2, BUDGET).is_err());
    }
}
