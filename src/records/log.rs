//! Append-only stream file.
//!
//! Every change that must survive a restart (registrations, flushed batches,
//! truncation and space maintenance) is written as one checksummed frame.
//! Reopening a database replays the frames in order.

use crate::error::{Result, TickDbError};
use crate::types::{
    EntityId, FieldValue, StreamId, StreamOptions, Timestamp, TypeDescriptor, TypeId,
};
use memmap2::Mmap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Magic bytes for stream files.
const LOG_MAGIC: &[u8; 4] = b"TCK\0";

/// Current stream file format version.
const LOG_VERSION: u8 = 1;

/// Magic + version.
const FILE_HEADER_SIZE: usize = 4 + 1;

/// Payload length + payload checksum.
const FRAME_HEADER_SIZE: usize = 4 + 4;

/// A message as stored on disk; names are resolved through the registries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggedMessage {
    pub timestamp: Timestamp,
    pub type_id: TypeId,
    pub entity_id: EntityId,
    pub space: Option<String>,
    pub fields: Vec<(String, FieldValue)>,
}

/// One frame of a stream file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum LogEntry {
    Created {
        /// Kept across reopens; it breaks ties between streams.
        id: StreamId,
        key: String,
        options: StreamOptions,
    },
    TypeRegistered {
        id: TypeId,
        descriptor: TypeDescriptor,
    },
    EntityRegistered {
        id: EntityId,
        symbol: String,
    },
    Batch {
        messages: Vec<LoggedMessage>,
    },
    Truncated {
        time: Timestamp,
        entities: Option<Vec<EntityId>>,
    },
    Cleared {
        entities: Option<Vec<EntityId>>,
    },
    Purged {
        time: Timestamp,
    },
    SpaceRenamed {
        from: String,
        to: String,
    },
    SpacesDeleted {
        spaces: Vec<String>,
    },
}

/// Append handle on a stream file.
pub struct StreamFile {
    path: PathBuf,

    file: Mutex<File>,

    /// fsync after every append.
    sync_on_append: bool,
}

impl StreamFile {
    /// Create a new stream file whose first frame records the stream options.
    pub fn create(path: impl AsRef<Path>, created: &LogEntry, sync_on_append: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        file.write_all(LOG_MAGIC)?;
        file.write_all(&[LOG_VERSION])?;

        let log = Self {
            path,
            file: Mutex::new(file),
            sync_on_append,
        };
        log.append(created)?;
        log.sync()?;
        Ok(log)
    }

    /// Open an existing stream file, returning its replayed entries.
    pub fn open(path: impl AsRef<Path>, sync_on_append: bool) -> Result<(Self, Vec<LogEntry>)> {
        let path = path.as_ref().to_path_buf();
        let entries = Self::replay(&path)?;

        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        debug!(path = %path.display(), entries = entries.len(), "replayed stream file");

        Ok((
            Self {
                path,
                file: Mutex::new(file),
                sync_on_append,
            },
            entries,
        ))
    }

    /// Append one frame. Returns the offset it was written at.
    pub fn append(&self, entry: &LogEntry) -> Result<u64> {
        let payload = rmp_serde::to_vec(entry)?;
        let checksum = crc32fast::hash(&payload);

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&checksum.to_le_bytes());
        frame.extend_from_slice(&payload);

        let mut file = self.file.lock();
        let offset = file.seek(SeekFrom::End(0))?;
        file.write_all(&frame)?;
        if self.sync_on_append {
            file.sync_data()?;
        }

        Ok(offset)
    }

    /// Force pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file. The handle must not be used afterwards.
    pub fn remove(&self) -> Result<()> {
        fs::remove_file(&self.path)?;
        Ok(())
    }

    /// Read every frame of a stream file.
    ///
    /// Torn or corrupt frames are errors; nothing is skipped.
    pub fn replay(path: &Path) -> Result<Vec<LogEntry>> {
        let file = File::open(path)?;
        let len = file.metadata()?.len() as usize;
        if len < FILE_HEADER_SIZE {
            return Err(TickDbError::InvalidFormat(format!(
                "{}: file too short for header",
                path.display()
            )));
        }

        // SAFETY: the database directory is held under an exclusive lock, so
        // no other process writes the file while it is mapped. Appends from
        // this process go through the handle `open` creates after the map is
        // dropped.
        let map = unsafe { Mmap::map(&file)? };

        if &map[0..4] != LOG_MAGIC {
            return Err(TickDbError::InvalidFormat("Invalid stream file magic".into()));
        }
        if map[4] != LOG_VERSION {
            return Err(TickDbError::InvalidFormat(format!(
                "Unsupported stream file version: {}",
                map[4]
            )));
        }

        let mut entries = Vec::new();
        let mut offset = FILE_HEADER_SIZE;
        while offset < len {
            if len - offset < FRAME_HEADER_SIZE {
                return Err(TickDbError::Corruption(format!(
                    "torn frame header at offset {}",
                    offset
                )));
            }

            let payload_len = u32::from_le_bytes(read_array(&map, offset)) as usize;
            let stored_checksum = u32::from_le_bytes(read_array(&map, offset + 4));
            let start = offset + FRAME_HEADER_SIZE;
            let end = start + payload_len;
            if end > len {
                return Err(TickDbError::Corruption(format!(
                    "torn frame at offset {} ({} bytes missing)",
                    offset,
                    end - len
                )));
            }

            let payload = &map[start..end];
            let computed_checksum = crc32fast::hash(payload);
            if stored_checksum != computed_checksum {
                return Err(TickDbError::ChecksumMismatch {
                    expected: stored_checksum,
                    got: computed_checksum,
                });
            }

            entries.push(rmp_serde::from_slice(payload)?);
            offset = end;
        }

        Ok(entries)
    }
}

fn read_array(bytes: &[u8], offset: usize) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&bytes[offset..offset + 4]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn created() -> LogEntry {
        LogEntry::Created {
            id: StreamId(1),
            key: "bars".into(),
            options: StreamOptions::default(),
        }
    }

    fn batch(n: i64) -> LogEntry {
        LogEntry::Batch {
            messages: (0..n)
                .map(|i| LoggedMessage {
                    timestamp: Timestamp(i),
                    type_id: TypeId(0),
                    entity_id: EntityId(0),
                    space: None,
                    fields: vec![("close".into(), FieldValue::Float(i as f64))],
                })
                .collect(),
        }
    }

    #[test]
    fn test_append_and_replay() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bars.tick");

        {
            let log = StreamFile::create(&path, &created(), false).unwrap();
            log.append(&batch(3)).unwrap();
            log.append(&LogEntry::EntityRegistered {
                id: EntityId(0),
                symbol: "AAPL".into(),
            })
            .unwrap();
        }

        let (_log, entries) = StreamFile::open(&path, false).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(matches!(entries[0], LogEntry::Created { .. }));
        match &entries[1] {
            LogEntry::Batch { messages } => assert_eq!(messages.len(), 3),
            other => panic!("Expected batch, got {:?}", other),
        }
    }

    #[test]
    fn test_checksum_mismatch_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bars.tick");
        {
            let log = StreamFile::create(&path, &created(), false).unwrap();
            log.append(&batch(2)).unwrap();
        }

        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let result = StreamFile::replay(&path);
        assert!(matches!(result, Err(TickDbError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_torn_tail_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bars.tick");
        {
            let log = StreamFile::create(&path, &created(), false).unwrap();
            log.append(&batch(5)).unwrap();
        }

        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

        let result = StreamFile::replay(&path);
        assert!(matches!(result, Err(TickDbError::Corruption(_))));
    }

    #[test]
    fn test_bad_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("junk.tick");
        fs::write(&path, b"NOPE\x01").unwrap();
        assert!(matches!(
            StreamFile::replay(&path),
            Err(TickDbError::InvalidFormat(_))
        ));
    }
}
