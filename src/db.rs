//! Database: the stream catalog and multi-stream selection.

use crate::cursor::TickCursor;
use crate::error::{Result, TickDbError};
use crate::records::{LogEntry, StreamFile};
use crate::stream::{StreamLog, TickStream};
use crate::subscriptions::Selection;
use crate::types::{SelectionOptions, StreamId, StreamOptions, Timestamp};
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Magic bytes for the database manifest.
const DB_MAGIC: &[u8; 4] = b"TDB\0";

/// Current database format version.
const DB_VERSION: u8 = 1;

/// Extension of stream files under `streams/`.
const STREAM_EXTENSION: &str = "tick";

/// Database configuration.
#[derive(Clone, Debug)]
pub struct TickDbConfig {
    /// Directory for durable storage; `None` keeps everything in memory.
    pub path: Option<PathBuf>,

    /// Whether to create the directory if it doesn't exist.
    pub create_if_missing: bool,

    /// fsync every flush and registration.
    pub sync_on_flush: bool,
}

impl Default for TickDbConfig {
    fn default() -> Self {
        Self {
            path: None,
            create_if_missing: true,
            sync_on_flush: false,
        }
    }
}

impl TickDbConfig {
    /// Durable database at `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }
}

/// A set of streams.
pub struct TickDb {
    config: TickDbConfig,

    /// Lock file for exclusive access.
    _lock_file: Option<File>,

    streams: RwLock<BTreeMap<String, TickStream>>,

    next_stream_id: AtomicU64,
}

impl TickDb {
    /// Database without durable storage.
    pub fn in_memory() -> Self {
        Self {
            config: TickDbConfig::default(),
            _lock_file: None,
            streams: RwLock::new(BTreeMap::new()),
            next_stream_id: AtomicU64::new(1),
        }
    }

    /// Open a database, replaying its stream files.
    pub fn open(config: TickDbConfig) -> Result<Self> {
        let path = match &config.path {
            None => {
                return Ok(Self {
                    config,
                    _lock_file: None,
                    streams: RwLock::new(BTreeMap::new()),
                    next_stream_id: AtomicU64::new(1),
                })
            }
            Some(path) => path.clone(),
        };

        if path.join("MANIFEST").exists() {
            Self::verify_manifest(&path)?;
        } else if config.create_if_missing {
            fs::create_dir_all(path.join("streams"))?;
            Self::write_manifest(&path)?;
        } else {
            return Err(TickDbError::NotInitialized);
        }

        let lock_file = Self::acquire_lock(&path)?;
        fs::create_dir_all(path.join("streams"))?;

        let db = Self {
            config,
            _lock_file: Some(lock_file),
            streams: RwLock::new(BTreeMap::new()),
            next_stream_id: AtomicU64::new(1),
        };
        db.load_streams(&path.join("streams"))?;

        info!(path = %path.display(), streams = db.streams.read().len(), "opened tick database");
        Ok(db)
    }

    pub fn config(&self) -> &TickDbConfig {
        &self.config
    }

    fn load_streams(&self, dir: &Path) -> Result<()> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map_or(false, |ext| ext == STREAM_EXTENSION))
            .collect();
        files.sort();

        let mut streams = self.streams.write();
        let mut ids = HashSet::new();
        for file in files {
            let (handle, entries) = StreamFile::open(&file, self.config.sync_on_flush)?;
            let log = StreamLog::restore(handle, entries)?;
            if !ids.insert(log.id()) {
                return Err(TickDbError::Corruption(format!(
                    "{}: stream id {} is already in use",
                    file.display(),
                    log.id().0
                )));
            }
            let key = log.key().to_string();
            streams.insert(key, TickStream::from_log(Arc::new(log)));
        }

        let next = ids.iter().map(|id| id.0 + 1).max().unwrap_or(1);
        self.next_stream_id.store(next, Ordering::SeqCst);
        Ok(())
    }

    fn allocate_id(&self) -> StreamId {
        StreamId(self.next_stream_id.fetch_add(1, Ordering::SeqCst))
    }

    fn stream_path(&self, key: &str) -> Option<PathBuf> {
        self.config
            .path
            .as_ref()
            .map(|p| p.join("streams").join(format!("{}.{}", key, STREAM_EXTENSION)))
    }

    /// Create a stream. Fails if the key is taken.
    pub fn create_stream(&self, key: &str, options: StreamOptions) -> Result<TickStream> {
        validate_key(key)?;

        let mut streams = self.streams.write();
        if streams.contains_key(key) {
            return Err(TickDbError::StreamExists(key.to_string()));
        }

        let id = self.allocate_id();
        let file = match self.stream_path(key) {
            Some(path) => {
                let created = LogEntry::Created {
                    id,
                    key: key.to_string(),
                    options: options.clone(),
                };
                Some(StreamFile::create(path, &created, self.config.sync_on_flush)?)
            }
            None => None,
        };

        let log = StreamLog::new(id, key.to_string(), options, file);
        let stream = TickStream::from_log(Arc::new(log));
        streams.insert(key.to_string(), stream.clone());

        info!(key, id = stream.id().0, "created stream");
        Ok(stream)
    }

    pub fn get_stream(&self, key: &str) -> Option<TickStream> {
        self.streams.read().get(key).cloned()
    }

    /// Every stream, ordered by key.
    pub fn list_streams(&self) -> Vec<TickStream> {
        self.streams.read().values().cloned().collect()
    }

    /// Delete a stream and its file. Open cursors and loaders fail with
    /// `StreamNotFound` from then on.
    pub fn delete_stream(&self, key: &str) -> Result<()> {
        let stream = self
            .streams
            .write()
            .remove(key)
            .ok_or_else(|| TickDbError::StreamNotFound(key.to_string()))?;
        stream.log().mark_deleted()?;
        info!(key, "deleted stream");
        Ok(())
    }

    /// Cursor over several streams positioned at `time`.
    ///
    /// `None` subscribes to every type (entity); an empty slice to none.
    pub fn select(
        &self,
        time: Timestamp,
        streams: &[TickStream],
        options: SelectionOptions,
        types: Option<&[&str]>,
        entities: Option<&[&str]>,
    ) -> Result<TickCursor> {
        TickCursor::open(
            streams.to_vec(),
            time,
            options,
            Selection::from_names(types),
            Selection::from_names(entities),
        )
    }

    /// Force every stream file to disk.
    pub fn sync(&self) -> Result<()> {
        for stream in self.streams.read().values() {
            stream.log().sync()?;
        }
        Ok(())
    }

    fn write_manifest(path: &Path) -> Result<()> {
        let mut file = File::create(path.join("MANIFEST"))?;
        file.write_all(DB_MAGIC)?;
        file.write_all(&[DB_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        let mut file = File::open(path.join("MANIFEST"))?;
        let mut header = [0u8; 5];
        file.read_exact(&mut header)?;

        if &header[0..4] != DB_MAGIC {
            return Err(TickDbError::InvalidFormat("Invalid manifest magic".into()));
        }
        if header[4] != DB_VERSION {
            return Err(TickDbError::InvalidFormat(format!(
                "Unsupported database version: {}",
                header[4]
            )));
        }
        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join("LOCK"))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| TickDbError::Locked)?;
        Ok(lock_file)
    }
}

impl Drop for TickDb {
    fn drop(&mut self) {
        if let Err(e) = self.sync() {
            warn!(error = %e, "failed to sync streams on close");
        }
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key == "." || key == ".." || key.contains(['/', '\\']) {
        return Err(TickDbError::InvalidOperation(format!(
            "Invalid stream key: '{}'",
            key
        )));
    }
    Ok(())
}
