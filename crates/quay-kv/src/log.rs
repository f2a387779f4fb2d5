use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{KvError, KvResult};
use crate::memory::scan_map;
use crate::traits::KvStore;

/// A single mutation in the log.
///
/// On-disk format:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized LogRecord)]
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum LogRecord {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Flush/sync strategy for the log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` after every write. Required for the durability contract of
    /// [`KvStore::put`].
    EveryWrite,
    /// `fsync` on the first write after `interval_ms` has elapsed since the
    /// last sync.
    Periodic { interval_ms: u64 },
    /// Rely on OS page-cache buffering (fastest, least durable).
    OsDefault,
}

impl Default for SyncMode {
    fn default() -> Self {
        Self::EveryWrite
    }
}

/// Configuration for [`LogKvStore`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Sync/flush strategy.
    pub sync_mode: SyncMode,
    /// Rewrite the log with only live keys right after opening.
    pub compact_on_open: bool,
}

/// Outcome of a [`LogKvStore::compact`] call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompactionStats {
    pub live_keys: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

/// Internal mutable state for the log writer.
struct LogWriter {
    file: File,
    /// End of the last acknowledged record. Anything past it is discarded.
    offset: u64,
    last_sync: Instant,
    /// Set when a failed append could not be cut back off the file.
    disabled: bool,
    /// Write only this many bytes of the next frame, then fail.
    #[cfg(test)]
    short_write: Option<usize>,
}

#[derive(Debug, Default)]
struct Replay {
    index: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Offset just past the last record that could be framed.
    valid_end: u64,
    applied: usize,
    skipped: usize,
}

/// Durable, log-structured key-value store.
///
/// Every mutation is serialized with bincode, framed with a length prefix
/// and a CRC32 checksum, and appended to a single file. The live key set is
/// kept in an ordered in-memory index rebuilt by replaying the log on open.
///
/// Lock order is always writer, then index; reads only take the index.
pub struct LogKvStore {
    path: PathBuf,
    writer: Mutex<LogWriter>,
    index: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    config: LogConfig,
}

impl LogKvStore {
    /// Open (or create) a log file at the given path and replay it.
    ///
    /// A torn or invalid tail left by a crash is truncated away so that new
    /// records are appended after the last valid one.
    pub fn open(path: &Path, config: LogConfig) -> KvResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let file_len = file.metadata()?.len();

        let replay = replay(path, file_len)?;
        if replay.valid_end < file_len {
            warn!(
                path = %path.display(),
                valid_end = replay.valid_end,
                file_len,
                "truncating torn tail of key-value log"
            );
            let truncator = OpenOptions::new().write(true).open(path)?;
            truncator.set_len(replay.valid_end)?;
            truncator.sync_all()?;
        }

        info!(
            path = %path.display(),
            records = replay.applied,
            skipped = replay.skipped,
            keys = replay.index.len(),
            "key-value log opened"
        );

        let store = Self {
            path: path.to_path_buf(),
            writer: Mutex::new(LogWriter {
                file,
                offset: replay.valid_end,
                last_sync: Instant::now(),
                disabled: false,
                #[cfg(test)]
                short_write: None,
            }),
            index: RwLock::new(replay.index),
            config,
        };

        if store.config.compact_on_open {
            store.compact()?;
        }
        Ok(store)
    }

    /// Rewrite the log so it holds exactly one `Put` per live key.
    ///
    /// The new log is written to a sibling temporary file, synced, and then
    /// renamed over the old one. The writer only switches to the new file
    /// once the rename has succeeded; on any earlier failure the current log
    /// stays in use and the temporary file is removed.
    ///
    /// A successful compaction also re-enables a writer disabled by a failed
    /// append, since the new log is rebuilt from the index alone.
    pub fn compact(&self) -> KvResult<CompactionStats> {
        let mut w = self.lock_writer()?;
        let index = self
            .index
            .read()
            .map_err(|e| KvError::LockPoisoned(e.to_string()))?;

        let bytes_before = w.offset;
        let tmp_path = self.path.with_extension("compact");
        let snapshot = write_snapshot(&tmp_path, &index).and_then(|snapshot| {
            fs::rename(&tmp_path, &self.path)?;
            Ok(snapshot)
        });
        let (file, bytes_after) = match snapshot {
            Ok(snapshot) => snapshot,
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&tmp_path) {
                    debug!(error = %cleanup, "no compaction file to remove");
                }
                return Err(e);
            }
        };

        w.file = file;
        w.offset = bytes_after;
        w.last_sync = Instant::now();
        w.disabled = false;
        sync_parent_dir(&self.path)?;

        let stats = CompactionStats {
            live_keys: index.len(),
            bytes_before,
            bytes_after,
        };
        debug!(?stats, "key-value log compacted");
        Ok(stats)
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.index.read().expect("lock poisoned").len()
    }

    /// Returns `true` if no keys are live.
    pub fn is_empty(&self) -> bool {
        self.index.read().expect("lock poisoned").is_empty()
    }

    /// Current size of the log file in bytes.
    pub fn offset(&self) -> u64 {
        self.writer.lock().expect("log mutex poisoned").offset
    }

    /// Path to the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_writer(&self) -> KvResult<MutexGuard<'_, LogWriter>> {
        self.writer
            .lock()
            .map_err(|e| KvError::LockPoisoned(e.to_string()))
    }

    /// Append one record and sync it according to the configured mode.
    ///
    /// A failed append leaves nothing behind: the file is cut back to the
    /// end of the last acknowledged record before the error is returned. If
    /// even that fails, the writer refuses every further write until the
    /// log is compacted or reopened.
    fn append(&self, w: &mut LogWriter, record: &LogRecord) -> KvResult<()> {
        if w.disabled {
            return Err(KvError::WriterDisabled(self.path.display().to_string()));
        }
        let frame = encode_record(record)?;
        if let Err(e) = self.write_frame(w, &frame) {
            self.discard_tail(w);
            return Err(e);
        }

        debug!(offset = w.offset, len = frame.len(), "log append");
        w.offset += frame.len() as u64;
        Ok(())
    }

    fn write_frame(&self, w: &mut LogWriter, frame: &[u8]) -> KvResult<()> {
        #[cfg(test)]
        {
            if let Some(n) = w.short_write.take() {
                w.file.write_all(&frame[..n.min(frame.len())])?;
                return Err(io::Error::other("short write").into());
            }
        }

        w.file.write_all(frame)?;
        let sync = match &self.config.sync_mode {
            SyncMode::EveryWrite => true,
            SyncMode::Periodic { interval_ms } => {
                w.last_sync.elapsed() >= Duration::from_millis(*interval_ms)
            }
            SyncMode::OsDefault => false,
        };
        if sync {
            w.file.sync_data()?;
            w.last_sync = Instant::now();
        }
        Ok(())
    }

    fn discard_tail(&self, w: &mut LogWriter) {
        match w.file.set_len(w.offset).and_then(|()| w.file.sync_data()) {
            Ok(()) => warn!(offset = w.offset, "discarded partially written log record"),
            Err(e) => {
                error!(
                    path = %self.path.display(),
                    offset = w.offset,
                    error = %e,
                    "could not discard partially written log record; disabling writes"
                );
                w.disabled = true;
            }
        }
    }

    #[cfg(test)]
    fn fail_next_write_after(&self, bytes: usize) {
        self.writer.lock().expect("log mutex poisoned").short_write = Some(bytes);
    }
}

/// Write every live entry to a fresh file at `path` and sync it.
///
/// Returns an append handle to the new file, opened before any rename so
/// the writer never ends up holding the replaced log.
fn write_snapshot(path: &Path, index: &BTreeMap<Vec<u8>, Vec<u8>>) -> KvResult<(File, u64)> {
    let mut out = BufWriter::new(File::create(path)?);
    let mut written = 0u64;
    for (key, value) in index {
        let frame = encode_record(&LogRecord::Put {
            key: key.clone(),
            value: value.clone(),
        })?;
        out.write_all(&frame)?;
        written += frame.len() as u64;
    }
    out.flush()?;
    out.get_ref().sync_all()?;
    drop(out);

    let file = OpenOptions::new().read(true).append(true).open(path)?;
    Ok((file, written))
}

/// Make a rename in the directory containing `path` durable.
fn sync_parent_dir(path: &Path) -> KvResult<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()?;
    Ok(())
}

/// Serialize and frame one record.
fn encode_record(record: &LogRecord) -> KvResult<Vec<u8>> {
    let payload =
        bincode::serialize(record).map_err(|e| KvError::Serialization(e.to_string()))?;
    let length = u32::try_from(payload.len()).map_err(|_| {
        KvError::Serialization(format!("record of {} bytes is too large", payload.len()))
    })?;
    let crc = crc32fast::hash(&payload);

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(&crc.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Read the log front-to-back and rebuild the live index.
///
/// Records that fail the CRC check or cannot be decoded are skipped. A
/// header or payload cut short by end-of-file, or a length field pointing
/// past the end, stops the replay.
fn replay(path: &Path, file_len: u64) -> KvResult<Replay> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut state = Replay::default();
    let mut offset: u64 = 0;

    while offset + HEADER_SIZE as u64 <= file_len {
        let mut header = [0u8; HEADER_SIZE];
        match reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }

        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        if length == 0 || offset + HEADER_SIZE as u64 + length as u64 > file_len {
            warn!(offset, length, file_len, "invalid log record length; stopping replay");
            break;
        }

        let mut payload = vec![0u8; length as usize];
        match reader.read_exact(&mut payload) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                warn!(offset, "truncated log record; stopping replay");
                break;
            }
            Err(e) => return Err(e.into()),
        }
        let next = offset + HEADER_SIZE as u64 + length as u64;

        let actual_crc = crc32fast::hash(&payload);
        if actual_crc != expected_crc {
            warn!(
                offset,
                expected = expected_crc,
                actual = actual_crc,
                "CRC mismatch; skipping log record"
            );
            state.skipped += 1;
            offset = next;
            continue;
        }

        match bincode::deserialize::<LogRecord>(&payload) {
            Ok(LogRecord::Put { key, value }) => {
                state.index.insert(key, value);
                state.applied += 1;
            }
            Ok(LogRecord::Delete { key }) => {
                state.index.remove(&key);
                state.applied += 1;
            }
            Err(e) => {
                warn!(offset, error = %e, "failed to decode log record; skipping");
                state.skipped += 1;
            }
        }
        offset = next;
    }

    state.valid_end = offset;
    Ok(state)
}

impl KvStore for LogKvStore {
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        let index = self
            .index
            .read()
            .map_err(|e| KvError::LockPoisoned(e.to_string()))?;
        Ok(index.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> KvResult<()> {
        let mut w = self.lock_writer()?;
        self.append(
            &mut w,
            &LogRecord::Put {
                key: key.to_vec(),
                value: value.to_vec(),
            },
        )?;
        let mut index = self
            .index
            .write()
            .map_err(|e| KvError::LockPoisoned(e.to_string()))?;
        index.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> KvResult<bool> {
        let mut w = self.lock_writer()?;
        let present = self
            .index
            .read()
            .map_err(|e| KvError::LockPoisoned(e.to_string()))?
            .contains_key(key);
        if !present {
            return Ok(false);
        }
        self.append(&mut w, &LogRecord::Delete { key: key.to_vec() })?;
        let mut index = self
            .index
            .write()
            .map_err(|e| KvError::LockPoisoned(e.to_string()))?;
        index.remove(key);
        Ok(true)
    }

    fn scan(&self, prefix: &[u8]) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let index = self
            .index
            .read()
            .map_err(|e| KvError::LockPoisoned(e.to_string()))?;
        Ok(scan_map(&index, prefix))
    }
}

impl std::fmt::Debug for LogKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogKvStore")
            .field("path", &self.path)
            .field("config", &self.config)
            .finish()
    }
}
