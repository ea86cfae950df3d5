use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::config::{StoreConfig, SyncMode};
use crate::error::{StoreError, StoreResult};
use crate::traits::{KvBackend, KvIter, KvPair};

/// A single mutation in the record file.
///
/// On-disk format:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized Record)]
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum Record {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

/// Internal mutable state for the record writer.
struct LogWriter {
    file: File,
    /// End of the last acknowledged record. The file never keeps bytes past
    /// this point once an append has failed.
    offset: u64,
    last_sync: Instant,
    /// Bytes of the next frame to write before failing.
    #[cfg(test)]
    fail_after: Option<usize>,
}

impl LogWriter {
    /// Write one whole frame and sync it according to `mode`.
    fn append(&mut self, frame: &[u8], mode: &SyncMode) -> io::Result<()> {
        #[cfg(test)]
        if let Some(limit) = self.fail_after.take() {
            self.file.write_all(&frame[..limit.min(frame.len())])?;
            return Err(io::Error::other("no space left on device"));
        }
        self.file.write_all(frame)?;
        self.sync(mode)?;
        self.offset += frame.len() as u64;
        Ok(())
    }

    /// Cut the file back to the last acknowledged record.
    fn rewind(&mut self) -> io::Result<()> {
        self.file.set_len(self.offset)
    }

    fn sync(&mut self, mode: &SyncMode) -> io::Result<()> {
        match mode {
            SyncMode::EveryWrite => self.file.sync_data()?,
            SyncMode::Periodic { interval_ms } => {
                if self.last_sync.elapsed() >= Duration::from_millis(*interval_ms) {
                    self.file.sync_data()?;
                    self.last_sync = Instant::now();
                }
            }
            SyncMode::OsDefault => {}
        }
        Ok(())
    }
}

/// File-backed engine: an append-only record log replayed into an ordered map.
///
/// Every `put`/`delete` appends one CRC-framed record, then updates the
/// in-memory map. A failed append is cut back off the file, so a write that
/// returned an error never reappears on replay. Reads are served from the map. On open the file is read
/// front-to-back; records failing the CRC check are skipped and a torn tail
/// (from a crash mid-write) is cut off so new records start on a clean
/// boundary.
pub struct LogBackend {
    /// Path to the record file.
    path: PathBuf,
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    /// `None` once closed.
    writer: Mutex<Option<LogWriter>>,
    closed: AtomicBool,
    config: StoreConfig,
}

impl LogBackend {
    /// Open (or create) a store directory.
    pub fn open(dir: &Path, config: StoreConfig) -> StoreResult<Self> {
        let open_err = |source: io::Error| StoreError::Open {
            path: dir.to_path_buf(),
            source,
        };

        fs::create_dir_all(dir).map_err(open_err)?;
        let path = dir.join(&config.file_name);

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(open_err)?;

        let (map, valid_len) = replay(&path).map_err(open_err)?;
        let file_len = file.metadata().map_err(open_err)?.len();
        if valid_len < file_len {
            warn!(
                path = %path.display(),
                valid_len,
                file_len,
                "discarding torn tail of record file"
            );
            file.set_len(valid_len).map_err(open_err)?;
        }

        debug!(path = %path.display(), keys = map.len(), "record log opened");

        Ok(Self {
            path,
            map: RwLock::new(map),
            writer: Mutex::new(Some(LogWriter {
                file,
                offset: valid_len,
                last_sync: Instant::now(),
                #[cfg(test)]
                fail_after: None,
            })),
            closed: AtomicBool::new(false),
            config,
        })
    }

    /// Path to the record file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current write offset (size of the valid record file).
    pub fn offset(&self) -> u64 {
        self.writer
            .lock()
            .expect("lock poisoned")
            .as_ref()
            .map_or(0, |w| w.offset)
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    /// Append a record and apply it to the map.
    ///
    /// The map is updated while the writer lock is held so the map always
    /// reflects the log order.
    fn apply(&self, record: Record) -> StoreResult<()> {
        let payload =
            bincode::serialize(&record).map_err(|e| StoreError::Encode(e.to_string()))?;
        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        frame.extend_from_slice(&payload);

        let mut guard = self.writer.lock().expect("lock poisoned");
        let w = guard.as_mut().ok_or(StoreError::Closed)?;

        if let Err(e) = w.append(&frame, &self.config.sync_mode) {
            if let Err(rewind) = w.rewind() {
                error!(
                    path = %self.path.display(),
                    offset = w.offset,
                    error = %rewind,
                    "failed to discard unacknowledged record"
                );
            }
            return Err(e.into());
        }

        let mut map = self.map.write().expect("lock poisoned");
        match record {
            Record::Put { key, value } => {
                map.insert(key, value);
            }
            Record::Delete { key } => {
                map.remove(&key);
            }
        }
        Ok(())
    }

}

/// Read every valid record from `path`.
///
/// Returns the resulting map and the length of the valid prefix of the file.
fn replay(path: &Path) -> io::Result<(BTreeMap<Vec<u8>, Vec<u8>>, u64)> {
    let mut file = BufReader::new(File::open(path)?);
    let file_len = file.get_ref().metadata()?.len();
    let mut map = BTreeMap::new();
    let mut offset: u64 = 0;

    while offset + HEADER_SIZE as u64 <= file_len {
        let mut header = [0u8; HEADER_SIZE];
        match file.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }

        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        if length == 0 || offset + HEADER_SIZE as u64 + length as u64 > file_len {
            warn!(offset, length, file_len, "invalid record length; stopping replay");
            break;
        }

        let mut payload = vec![0u8; length as usize];
        match file.read_exact(&mut payload) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                warn!(offset, "truncated record; stopping replay");
                break;
            }
            Err(e) => return Err(e),
        }
        let next = offset + HEADER_SIZE as u64 + length as u64;

        let actual_crc = crc32fast::hash(&payload);
        if actual_crc != expected_crc {
            warn!(
                offset,
                expected = expected_crc,
                actual = actual_crc,
                "CRC mismatch; skipping record"
            );
            offset = next;
            continue;
        }

        match bincode::deserialize::<Record>(&payload) {
            Ok(Record::Put { key, value }) => {
                map.insert(key, value);
            }
            Ok(Record::Delete { key }) => {
                map.remove(&key);
            }
            Err(e) => {
                warn!(offset, error = %e, "failed to deserialize record; skipping");
            }
        }
        offset = next;
    }

    debug!(keys = map.len(), valid_len = offset, "record replay complete");
    Ok((map, offset))
}

impl KvBackend for LogBackend {
    fn name(&self) -> &'static str {
        "log"
    }

    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.map.read().expect("lock poisoned").get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.ensure_open()?;
        self.apply(Record::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        })
    }

    fn delete(&self, key: &[u8]) -> StoreResult<bool> {
        self.ensure_open()?;
        if !self.map.read().expect("lock poisoned").contains_key(key) {
            return Ok(false);
        }
        self.apply(Record::Delete { key: key.to_vec() })?;
        Ok(true)
    }

    fn iter(&self) -> StoreResult<KvIter> {
        self.ensure_open()?;
        let map = self.map.read().expect("lock poisoned");
        let pairs: Vec<KvPair> = map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        Ok(Box::new(pairs.into_iter()))
    }

    fn approx_count(&self) -> i64 {
        self.map.read().expect("lock poisoned").len() as i64
    }

    fn close(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::Release);
        let mut guard = self.writer.lock().expect("lock poisoned");
        if let Some(w) = guard.take() {
            w.file.sync_all()?;
            debug!(path = %self.path.display(), offset = w.offset, "record log closed");
        }
        Ok(())
    }

    fn contains(&self, key: &[u8]) -> StoreResult<bool> {
        self.ensure_open()?;
        Ok(self.map.read().expect("lock poisoned").contains_key(key))
    }
}

impl std::fmt::Debug for LogBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogBackend")
            .field("path", &self.path)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
