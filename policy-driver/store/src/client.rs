//! The abstract datastore contract consumed by the resync engine.
//!
//! Concrete network clients live outside this crate; the engine only needs a
//! linearisable snapshot and a watch stream that reports when its cursor has
//! been invalidated.

use async_trait::async_trait;

/// One leaf entry in a snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub key: String,
    pub value: String,
    /// The index at which this entry was last modified.
    pub mod_index: u64,
}

/// A point-in-time view of the store, linearisable at `index`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub index: u64,
    pub entries: Vec<SnapshotEntry>,
}

/// A single event from a watch stream. Directories are never reported; every
/// event names a leaf key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchEvent {
    Set {
        key: String,
        value: String,
        mod_index: u64,
    },
    Delete {
        key: String,
        mod_index: u64,
    },
}

impl WatchEvent {
    pub fn mod_index(&self) -> u64 {
        match self {
            WatchEvent::Set { mod_index, .. } | WatchEvent::Delete { mod_index, .. } => *mod_index,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The server dropped this watcher; the consumer must re-watch from a
    /// fresh snapshot.
    #[error("watcher cleared by the store")]
    WatcherCleared,

    /// The watch cursor points below the server's compaction horizon.
    #[error("watch index compacted by the store")]
    EventIndexCleared,

    /// Recoverable: retry with backoff, emit nothing.
    #[error("transient store error: {0}")]
    Transient(#[source] anyhow::Error),

    /// Unrecoverable: surfaced to the caller, terminates the driver.
    #[error("fatal store error: {0}")]
    Fatal(#[source] anyhow::Error),
}

impl StoreError {
    /// True for the errors that invalidate watch continuity and force a
    /// resync.
    pub fn is_lost_sync(&self) -> bool {
        matches!(self, StoreError::WatcherCleared | StoreError::EventIndexCleared)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Fatal(_))
    }
}

/// A live watch over the store. `next` resolves with events strictly after
/// the index the watch was opened at, in index order.
#[async_trait]
pub trait Watch: Send {
    async fn next(&mut self) -> Result<WatchEvent, StoreError>;
}

/// A handle to the remote store, scoped to the driver's root prefix.
#[async_trait]
pub trait StoreClient: Send + Sync + 'static {
    /// Takes a snapshot of every leaf under the root prefix. May block; may
    /// be retried freely.
    async fn snapshot(&self) -> Result<Snapshot, StoreError>;

    /// Opens a watch delivering events strictly after `after_index`. An
    /// `after_index` of zero means "from the store's current index".
    async fn watch(&self, after_index: u64) -> Result<Box<dyn Watch>, StoreError>;
}
