//! Durable append-log storage
//!
//! Every write batch is appended to a single log file before it is applied to
//! an in-memory ordered index. Reads are served from the index.
//!
//! # Architecture
//!
//! ```text
//! kvtable.log:
//! [Header: comparator name]
//! [Batch 1: put t_r_1_1, put t_i_1_2_alice]   ← one record per write batch
//! [Batch 2: delete t_i_1_2_alice, put ...]
//! ```
//!
//! Record framing: `[u32 len][u8 compression][payload: len bytes][u32 checksum]`,
//! little endian, payload is JSON, optionally zstd compressed.
//!
//! Recovery replays batches in order and stops at the first torn or corrupt
//! record; the file is truncated there so new batches never follow garbage.

use crate::codec::KeyComparator;
use crate::error::{Error, Result};
use crate::storage::compression::{compress, decompress, CompressionAlgorithm};
use crate::storage::engine::{BatchOp, KvPair, StorageEngine, StorageIterator, WriteBatch};
use crate::storage::memory::MemoryStorage;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, instrument, warn};

/// Log file name inside the store directory.
pub const LOG_FILE_NAME: &str = "kvtable.log";

const LOG_FORMAT_VERSION: u32 = 1;

// len + compression tag + checksum
const FRAME_OVERHEAD: u64 = 4 + 1 + 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum LogRecord {
    Header {
        version: u32,
        comparator: String,
        created_at: i64,
    },
    Batch {
        sequence: u64,
        timestamp: i64,
        ops: Vec<BatchOp>,
    },
}

fn checksum(payload: &[u8]) -> u32 {
    payload
        .iter()
        .fold(0u32, |acc, &b| acc.rotate_left(5) ^ (b as u32))
}

fn encode_record(record: &LogRecord, algorithm: CompressionAlgorithm) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(record)?;
    let payload = compress(&json, algorithm)?;

    let mut frame = Vec::with_capacity(payload.len() + FRAME_OVERHEAD as usize);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.push(algorithm.tag());
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&checksum(&payload).to_le_bytes());
    Ok(frame)
}

/// Reads one frame. `Ok(None)` on a clean end of file.
fn read_record<R: Read>(reader: &mut R, remaining: u64) -> Result<Option<(LogRecord, u64)>> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof && remaining == 0 => {
            return Ok(None)
        }
        Err(e) => return Err(Error::Storage(format!("Torn record header: {}", e))),
    }

    let len = u32::from_le_bytes(len_bytes) as u64;
    let frame_len = len + FRAME_OVERHEAD;
    if frame_len > remaining {
        return Err(Error::Storage(format!(
            "Torn record: need {} bytes, {} left",
            frame_len, remaining
        )));
    }

    let mut tag = [0u8; 1];
    reader.read_exact(&mut tag)?;
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    let mut sum = [0u8; 4];
    reader.read_exact(&mut sum)?;

    if u32::from_le_bytes(sum) != checksum(&payload) {
        return Err(Error::Serialization("Checksum mismatch".to_string()));
    }

    let json = decompress(&payload, CompressionAlgorithm::from_tag(tag[0])?)?;
    let record = serde_json::from_slice(&json)?;
    Ok(Some((record, frame_len)))
}

/// Options for opening a [`LogStorage`].
#[derive(Debug, Clone, Copy)]
pub struct LogOptions {
    pub comparator: KeyComparator,
    pub compression: CompressionAlgorithm,
    /// fsync after every batch
    pub sync_writes: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            comparator: KeyComparator::default(),
            compression: CompressionAlgorithm::None,
            sync_writes: true,
        }
    }
}

struct LogWriter {
    file: Option<File>,
    next_sequence: u64,
    /// End of the last fully appended record.
    valid_len: u64,
}

fn append_frame(file: &mut File, bytes: &[u8], sync: bool) -> std::io::Result<()> {
    file.write_all(bytes)?;
    if sync {
        file.sync_data()?;
    }
    Ok(())
}

/// Durable ordered store backed by an append-only batch log.
pub struct LogStorage {
    log_path: PathBuf,
    index: MemoryStorage,
    writer: Mutex<LogWriter>,
    options: LogOptions,
}

impl std::fmt::Debug for LogStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStorage")
            .field("log_path", &self.log_path)
            .field("options", &self.options)
            .finish()
    }
}

struct Recovery {
    valid_len: u64,
    next_sequence: u64,
    has_header: bool,
}

impl LogStorage {
    /// Create or open a store in `dir`
    #[instrument(skip_all, fields(dir = %dir.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(dir: P, options: LogOptions) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::Storage(format!("Failed to create store dir: {}", e)))?;

        let log_path = dir.join(LOG_FILE_NAME);
        let index = MemoryStorage::with_comparator(options.comparator);

        let recovery = Self::recover(&log_path, &index, options.comparator)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| Error::Storage(format!("Failed to open log: {}", e)))?;

        let file_len = file.metadata()?.len();
        if file_len > recovery.valid_len {
            warn!(
                valid_len = recovery.valid_len,
                file_len, "Truncating log after last intact record"
            );
            file.set_len(recovery.valid_len)?;
        }

        let mut valid_len = recovery.valid_len;
        if !recovery.has_header {
            let header = LogRecord::Header {
                version: LOG_FORMAT_VERSION,
                comparator: options.comparator.name().to_string(),
                created_at: chrono::Utc::now().timestamp_millis(),
            };
            let bytes = encode_record(&header, CompressionAlgorithm::None)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            valid_len += bytes.len() as u64;
            info!(comparator = options.comparator.name(), "Created new log store");
        }

        Ok(Self {
            log_path,
            index,
            writer: Mutex::new(LogWriter {
                file: Some(file),
                next_sequence: recovery.next_sequence,
                valid_len,
            }),
            options,
        })
    }

    /// Replays the log into `index`
    fn recover(log_path: &Path, index: &MemoryStorage, comparator: KeyComparator) -> Result<Recovery> {
        let mut recovery = Recovery {
            valid_len: 0,
            next_sequence: 1,
            has_header: false,
        };
        if !log_path.exists() {
            info!("No log found, starting fresh");
            return Ok(recovery);
        }

        info!(path = ?log_path, "Recovering store from log");

        let file = File::open(log_path)
            .map_err(|e| Error::Storage(format!("Failed to open log: {}", e)))?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut batches_recovered = 0u64;
        let mut ops_recovered = 0usize;

        loop {
            let remaining = file_len - recovery.valid_len;
            let (record, frame_len) = match read_record(&mut reader, remaining) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    warn!(offset = recovery.valid_len, "Stopping recovery at bad record: {}", e);
                    break;
                }
            };

            match record {
                LogRecord::Header {
                    comparator: stored, ..
                } => {
                    if recovery.has_header {
                        warn!(offset = recovery.valid_len, "Unexpected second header");
                        break;
                    }
                    if stored != comparator.name() {
                        return Err(Error::Config(format!(
                            "store at {} was created with comparator {}, not {}",
                            log_path.display(),
                            stored,
                            comparator.name()
                        )));
                    }
                    recovery.has_header = true;
                }
                LogRecord::Batch { sequence, ops, .. } => {
                    if !recovery.has_header {
                        warn!("Log has no header, discarding contents");
                        break;
                    }
                    ops_recovered += ops.len();
                    index.apply(ops);
                    recovery.next_sequence = recovery.next_sequence.max(sequence + 1);
                    batches_recovered += 1;
                }
            }
            recovery.valid_len += frame_len;
        }

        info!(
            batches = batches_recovered,
            ops = ops_recovered,
            keys = index.len(),
            next_sequence = recovery.next_sequence,
            "Log recovery complete"
        );
        Ok(recovery)
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Current log size in bytes
    pub fn log_size(&self) -> Result<u64> {
        Ok(std::fs::metadata(&self.log_path)?.len())
    }

    /// Cuts the log back to the last complete record after a failed append.
    /// If that fails too the writer is dropped and later writes are refused.
    fn discard_partial_frame(&self, writer: &mut LogWriter) {
        let truncated = OpenOptions::new()
            .write(true)
            .open(&self.log_path)
            .and_then(|f| f.set_len(writer.valid_len));
        match truncated {
            Ok(()) => warn!(valid_len = writer.valid_len, "Discarded partially appended batch"),
            Err(e) => {
                error!(valid_len = writer.valid_len, "Cannot truncate log, refusing further writes: {}", e);
                writer.file = None;
            }
        }
    }
}

impl StorageEngine for LogStorage {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.index.get(key)
    }

    fn scan(&self, start: &[u8], end: Option<&[u8]>, limit: usize) -> Result<Vec<KvPair>> {
        self.index.scan(start, end, limit)
    }

    fn iter(&self, start: &[u8], end: Option<&[u8]>) -> Result<Box<dyn StorageIterator>> {
        self.index.iter(start, end)
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut guard = self.writer.lock();
        let writer = &mut *guard;
        let sequence = writer.next_sequence;
        let file = writer
            .file
            .as_mut()
            .ok_or_else(|| Error::Storage("store is closed".to_string()))?;

        let record = LogRecord::Batch {
            sequence,
            timestamp: chrono::Utc::now().timestamp_millis(),
            ops: batch.into_ops(),
        };
        let bytes = encode_record(&record, self.options.compression)?;

        if let Err(e) = append_frame(file, &bytes, self.options.sync_writes) {
            self.discard_partial_frame(writer);
            return Err(Error::Storage(format!("Failed to append batch: {}", e)));
        }
        writer.valid_len += bytes.len() as u64;
        writer.next_sequence += 1;

        // Applied under the writer lock so the index sees batches in log order
        if let LogRecord::Batch { ops, .. } = record {
            debug!(sequence, ops = ops.len(), bytes = bytes.len(), "Appended batch");
            self.index.apply(ops);
        }
        Ok(())
    }

    fn comparator(&self) -> KeyComparator {
        self.options.comparator
    }

    fn flush(&self) -> Result<()> {
        let writer = self.writer.lock();
        if let Some(file) = writer.file.as_ref() {
            file.sync_all()
                .map_err(|e| Error::Storage(format!("Failed to sync log: {}", e)))?;
        }
        Ok(())
    }

    /// Rewrites the log as a header plus one snapshot batch
    #[instrument(skip(self), fields(path = %self.log_path.display()))]
    fn compact(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        if writer.file.is_none() {
            return Err(Error::Storage("store is closed".to_string()));
        }

        let size_before = self.log_size()?;
        let snapshot = self.index.snapshot();
        let keys = snapshot.len();

        let temp_path = self.log_path.with_extension("log.tmp");
        let mut temp = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| Error::Storage(format!("Failed to create temp log: {}", e)))?;

        let header = LogRecord::Header {
            version: LOG_FORMAT_VERSION,
            comparator: self.options.comparator.name().to_string(),
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        temp.write_all(&encode_record(&header, CompressionAlgorithm::None)?)?;

        if !snapshot.is_empty() {
            let ops = snapshot
                .into_iter()
                .map(|pair| BatchOp::Put {
                    key: pair.key,
                    value: pair.value,
                })
                .collect();
            let batch = LogRecord::Batch {
                sequence: writer.next_sequence,
                timestamp: chrono::Utc::now().timestamp_millis(),
                ops,
            };
            temp.write_all(&encode_record(&batch, self.options.compression)?)?;
            writer.next_sequence += 1;
        }
        temp.sync_all()
            .map_err(|e| Error::Storage(format!("Failed to sync compacted log: {}", e)))?;
        drop(temp);

        std::fs::rename(&temp_path, &self.log_path)
            .map_err(|e| Error::Storage(format!("Failed to replace log: {}", e)))?;

        writer.file = Some(
            OpenOptions::new()
                .append(true)
                .open(&self.log_path)
                .map_err(|e| Error::Storage(format!("Failed to reopen log: {}", e)))?,
        );
        writer.valid_len = self.log_size()?;

        info!(
            keys,
            size_before,
            size_after = self.log_size()?,
            "Log compaction complete"
        );
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        if let Some(file) = writer.file.take() {
            file.sync_all()?;
            info!(path = %self.log_path.display(), "Closed log store");
        }
        self.index.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kvtable_log_{}_{}", name, std::process::id()));
        std::fs::remove_dir_all(&dir).ok();
        dir
    }

    #[test]
    fn test_record_framing() -> Result<()> {
        let record = LogRecord::Batch {
            sequence: 42,
            timestamp: 0,
            ops: vec![BatchOp::Put {
                key: b"t_r_1_1".to_vec(),
                value: b"{}".to_vec(),
            }],
        };
        for algorithm in [CompressionAlgorithm::None, CompressionAlgorithm::Zstd] {
            let bytes = encode_record(&record, algorithm)?;
            let (decoded, len) = read_record(&mut bytes.as_slice(), bytes.len() as u64)?
                .ok_or_else(|| Error::Storage("missing record".to_string()))?;
            assert_eq!(len, bytes.len() as u64);
            assert!(matches!(decoded, LogRecord::Batch { sequence: 42, .. }));
        }
        Ok(())
    }

    #[test]
    fn test_checksum_detects_corruption() -> Result<()> {
        let record = LogRecord::Header {
            version: 1,
            comparator: "x".to_string(),
            created_at: 0,
        };
        let mut bytes = encode_record(&record, CompressionAlgorithm::None)?;
        bytes[7] ^= 0xff;
        assert!(read_record(&mut bytes.as_slice(), bytes.len() as u64).is_err());
        Ok(())
    }

    #[test]
    fn test_log_store_recovery() -> Result<()> {
        let dir = temp_dir("recovery");

        {
            let store = LogStorage::open(&dir, LogOptions::default())?;
            store.put(b"t_r_1_1", b"one")?;
            store.put(b"t_r_1_2", b"two")?;
            store.put(b"t_r_1_1", b"uno")?;
            store.delete(b"t_r_1_2")?;
            store.close()?;
        }

        {
            let store = LogStorage::open(&dir, LogOptions::default())?;
            assert_eq!(store.get(b"t_r_1_1")?, Some(b"uno".to_vec()));
            assert_eq!(store.get(b"t_r_1_2")?, None);
        }

        std::fs::remove_dir_all(dir).ok();
        Ok(())
    }

    #[test]
    fn test_recovery_stops_at_torn_record() -> Result<()> {
        let dir = temp_dir("torn");

        {
            let store = LogStorage::open(&dir, LogOptions::default())?;
            store.put(b"a", b"1")?;
            store.put(b"b", b"2")?;
            store.close()?;
        }

        // chop the tail of the last record
        let path = dir.join(LOG_FILE_NAME);
        let len = std::fs::metadata(&path)?.len();
        OpenOptions::new().write(true).open(&path)?.set_len(len - 3)?;

        {
            let store = LogStorage::open(&dir, LogOptions::default())?;
            assert_eq!(store.get(b"a")?, Some(b"1".to_vec()));
            assert_eq!(store.get(b"b")?, None);

            // appends after the truncation point are readable again
            store.put(b"c", b"3")?;
            store.close()?;
        }

        let store = LogStorage::open(&dir, LogOptions::default())?;
        assert_eq!(store.get(b"c")?, Some(b"3".to_vec()));

        std::fs::remove_dir_all(dir).ok();
        Ok(())
    }

    #[test]
    fn test_failed_append_keeps_later_batches() -> Result<()> {
        let dir = temp_dir("failed_append");
        let path = dir.join(LOG_FILE_NAME);

        {
            let store = LogStorage::open(&dir, LogOptions::default())?;
            store.put(b"a", b"1")?;

            // half a frame on disk, then a writer that cannot write
            OpenOptions::new().append(true).open(&path)?.write_all(&[7u8; 11])?;
            let append = store.writer.lock().file.replace(File::open(&path)?);
            assert!(store.put(b"b", b"2").is_err());
            assert_eq!(store.get(b"b")?, None);

            store.writer.lock().file = append;
            store.put(b"c", b"3")?;
            store.close()?;
        }

        let store = LogStorage::open(&dir, LogOptions::default())?;
        assert_eq!(store.get(b"a")?, Some(b"1".to_vec()));
        assert_eq!(store.get(b"b")?, None);
        assert_eq!(store.get(b"c")?, Some(b"3".to_vec()));

        std::fs::remove_dir_all(dir).ok();
        Ok(())
    }

    #[test]
    fn test_comparator_mismatch_refused() -> Result<()> {
        let dir = temp_dir("comparator");
        LogStorage::open(&dir, LogOptions::default())?.close()?;

        let options = LogOptions {
            comparator: KeyComparator::Bytewise,
            ..LogOptions::default()
        };
        assert!(matches!(LogStorage::open(&dir, options), Err(Error::Config(_))));

        std::fs::remove_dir_all(dir).ok();
        Ok(())
    }

    #[test]
    fn test_compaction_shrinks_log() -> Result<()> {
        let dir = temp_dir("compact");
        let options = LogOptions {
            compression: CompressionAlgorithm::Zstd,
            sync_writes: false,
            ..LogOptions::default()
        };
        let store = LogStorage::open(&dir, options)?;

        for i in 0..50u64 {
            store.put(b"t_r_1_1", i.to_string().as_bytes())?;
            store.put(b"t_r_1_2", i.to_string().as_bytes())?;
        }

        let size_before = store.log_size()?;
        store.compact()?;
        let size_after = store.log_size()?;
        assert!(size_after < size_before);

        store.put(b"t_r_1_3", b"after")?;
        store.close()?;

        let store = LogStorage::open(&dir, options)?;
        assert_eq!(store.get(b"t_r_1_1")?, Some(b"49".to_vec()));
        assert_eq!(store.get(b"t_r_1_3")?, Some(b"after".to_vec()));
        assert_eq!(store.scan(b"", None, 0)?.len(), 3);

        std::fs::remove_dir_all(dir).ok();
        Ok(())
    }

    #[test]
    fn test_closed_log_store_rejects_writes() -> Result<()> {
        let dir = temp_dir("closed");
        let store = LogStorage::open(&dir, LogOptions::default())?;
        store.close()?;
        assert!(store.put(b"a", b"1").is_err());
        assert!(store.get(b"a").is_err());
        std::fs::remove_dir_all(dir).ok();
        Ok(())
    }
}
