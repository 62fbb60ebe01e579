// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sled-backed durable event queue.
//!
//! Two trees live in one database:
//! - [`TREE_EVENTS`]: 8-byte big-endian sequence number -> binary event.
//! - [`TREE_UPLOAD_MARKERS`]: same key as the event it marks -> 8-byte
//!   big-endian unix time of the upload.
//!
//! Events are retired in two phases. A batch is marked after the collector
//! accepted it, and every marked event is deleted together with its marker
//! afterwards. A crash between the two phases leaves markers behind, and the
//! next [`EventStore::retire_marked`] call picks them up.

use std::fs;
use std::ops::Bound;
use std::path::{Path, PathBuf};

use sled::transaction::{TransactionError, Transactional};
use sled::{Config as SledConfig, Db, IVec, Tree};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, error};

use crate::event::Event;

/// Name of the tree storing binary events keyed by sequence number.
pub const TREE_EVENTS: &str = "events";
/// Name of the tree storing upload markers.
pub const TREE_UPLOAD_MARKERS: &str = "uploadedEvents";

/// Default on-disk location of the store.
pub const DEFAULT_DB_PATH: &str = "./logs.db";

/// Errors emitted by the [`EventStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transaction failed: {0}")]
    Transaction(String),
    #[error("upload marker for key {key} is not an 8-byte timestamp")]
    CorruptMarker { key: u64 },
}

/// A persisted event as selected for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    pub key: u64,
    pub payload: Vec<u8>,
}

/// Durable, ordered event queue with upload bookkeeping.
///
/// Cloning is cheap and every clone shares the same database.
#[derive(Debug, Clone)]
pub struct EventStore {
    db: Db,
    events: Tree,
    markers: Tree,
    path: PathBuf,
}

impl EventStore {
    /// Opens (or creates) the store at `path` along with both trees.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                // sled does not create intermediate directories automatically.
                fs::create_dir_all(parent)?;
            }
        }

        let db = sled_config(&path).open()?;
        let store = Self::from_db(db, path)?;
        debug!("STORE | Opened event store at {}", store.path.display());
        Ok(store)
    }

    /// Opens an in-memory store that disappears when dropped.
    pub fn open_ephemeral() -> Result<Self, StoreError> {
        let db = SledConfig::new().temporary(true).open()?;
        Self::from_db(db, PathBuf::new())
    }

    fn from_db(db: Db, path: PathBuf) -> Result<Self, StoreError> {
        let events = db.open_tree(TREE_EVENTS)?;
        let markers = db.open_tree(TREE_UPLOAD_MARKERS)?;
        db.flush()?;
        Ok(Self {
            db,
            events,
            markers,
            path,
        })
    }

    /// Returns the filesystem path backing the store.
    ///
    /// Ephemeral stores return an empty path because data resides in memory only.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persists `event` under the next sequence number.
    ///
    /// An event that cannot be encoded is logged and dropped: `Ok(None)` is
    /// returned and nothing is written.
    pub fn record(&self, event: &dyn Event) -> Result<Option<u64>, StoreError> {
        let payload = match event.to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                error!(
                    "STORE | Unable to encode event, dropping it: {} ({e})",
                    event.detail()
                );
                return Ok(None);
            }
        };

        let key = self.db.generate_id()?;
        self.events.insert(key.to_be_bytes(), payload)?;
        Ok(Some(key))
    }

    /// Returns up to `limit` events that follow the last marked key, in key order.
    ///
    /// Without any marker the selection starts at the first stored event. The
    /// last marked key itself is never re-selected.
    pub fn select_for_upload(&self, limit: usize) -> Result<Vec<StoredEvent>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let start = match self.markers.last()? {
            Some((key, _)) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };

        let mut batch = Vec::with_capacity(limit.min(1024));
        for entry in self
            .events
            .range::<IVec, _>((start, Bound::Unbounded))
            .take(limit)
        {
            let (key, value) = entry?;
            batch.push(StoredEvent {
                key: key_to_u64(&key),
                payload: value.to_vec(),
            });
        }
        Ok(batch)
    }

    /// Writes an upload marker stamped with the current time for every key.
    ///
    /// All markers land in a single atomic batch. Re-marking a key only
    /// overwrites its timestamp.
    pub fn mark_uploaded(&self, keys: &[u64]) -> Result<(), StoreError> {
        let now = now_secs().to_be_bytes();
        let mut batch = sled::Batch::default();
        for key in keys {
            batch.insert(&key.to_be_bytes()[..], &now[..]);
        }
        self.markers.apply_batch(batch)?;
        Ok(())
    }

    /// Time of the most recent upload, or the unix epoch if nothing is marked.
    pub fn last_upload_time(&self) -> Result<OffsetDateTime, StoreError> {
        let Some((key, value)) = self.markers.last()? else {
            return Ok(OffsetDateTime::UNIX_EPOCH);
        };
        let Ok(raw) = <[u8; 8]>::try_from(value.as_ref()) else {
            return Err(StoreError::CorruptMarker {
                key: key_to_u64(&key),
            });
        };
        let secs = i64::try_from(u64::from_be_bytes(raw)).unwrap_or(i64::MAX);
        Ok(OffsetDateTime::from_unix_timestamp(secs).unwrap_or(OffsetDateTime::UNIX_EPOCH))
    }

    /// Deletes every marked event together with its marker.
    ///
    /// Returns the number of markers retired. Deleting keys that are already
    /// gone is a no-op, so the call is safe to repeat.
    pub fn retire_marked(&self) -> Result<usize, StoreError> {
        let keys = self
            .markers
            .iter()
            .keys()
            .collect::<Result<Vec<IVec>, _>>()?;
        if keys.is_empty() {
            return Ok(0);
        }

        (&self.events, &self.markers)
            .transaction(|(events, markers)| {
                for key in &keys {
                    events.remove(key.clone())?;
                    markers.remove(key.clone())?;
                }
                Ok(())
            })
            .map_err(|err: TransactionError<()>| match err {
                TransactionError::Storage(err) => StoreError::Db(err),
                TransactionError::Abort(()) => {
                    StoreError::Transaction("retirement aborted".to_string())
                }
            })?;

        Ok(keys.len())
    }

    /// Number of events currently held, uploaded or not.
    pub fn pending_len(&self) -> usize {
        self.events.len()
    }

    /// Number of upload markers awaiting retirement.
    pub fn marked_len(&self) -> usize {
        self.markers.len()
    }

    /// Flushes pending writes to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

/// Builds a sled configuration using the provided filesystem path.
fn sled_config(path: &Path) -> SledConfig {
    SledConfig::new()
        .path(path)
        .cache_capacity(16 * 1024 * 1024)
}

/// Decodes a big-endian sequence key. Keys are always written as 8 bytes.
fn key_to_u64(key: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let len = key.len().min(8);
    buf[8 - len..].copy_from_slice(&key[key.len() - len..]);
    u64::from_be_bytes(buf)
}

fn now_secs() -> u64 {
    u64::try_from(OffsetDateTime::now_utc().unix_timestamp()).unwrap_or_default()
}
