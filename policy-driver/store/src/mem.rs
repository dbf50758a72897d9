//! An in-memory store client.
//!
//! Implements the full `StoreClient` contract (watch backlog replay, cursor
//! compaction, forced watcher drops and scripted snapshot responses) so the
//! resync engine's failure handling can be exercised without a network
//! server. Registered under the `mem` scheme.

use crate::client::{Snapshot, SnapshotEntry, StoreClient, StoreError, Watch, WatchEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Clone, Default)]
pub struct MemStore {
    inner: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    changed: Notify,
}

#[derive(Default)]
struct State {
    index: u64,
    entries: BTreeMap<String, (String, u64)>,
    log: Vec<WatchEvent>,
    /// Events at or below this index have been discarded; watches behind it
    /// fail with `EventIndexCleared`.
    compacted_index: u64,
    /// Bumped by `drop_watches`; open watches notice and fail with
    /// `WatcherCleared`.
    watch_epoch: u64,
    /// Snapshot responses to serve before falling back to live state.
    scripted_snapshots: Vec<Snapshot>,
}

// === impl MemStore ===

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a key, returning the new modification index.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) -> u64 {
        let key = key.into();
        let value = value.into();
        let mut state = self.inner.state.lock();
        state.index += 1;
        let mod_index = state.index;
        state.entries.insert(key.clone(), (value.clone(), mod_index));
        state.log.push(WatchEvent::Set {
            key,
            value,
            mod_index,
        });
        drop(state);
        self.inner.changed.notify_waiters();
        mod_index
    }

    /// Deletes a key if present, returning the deletion's index.
    pub fn delete(&self, key: impl AsRef<str>) -> Option<u64> {
        let key = key.as_ref();
        let mut state = self.inner.state.lock();
        state.entries.remove(key)?;
        state.index += 1;
        let mod_index = state.index;
        state.log.push(WatchEvent::Delete {
            key: key.to_string(),
            mod_index,
        });
        drop(state);
        self.inner.changed.notify_waiters();
        Some(mod_index)
    }

    pub fn index(&self) -> u64 {
        self.inner.state.lock().index
    }

    /// Forces every open watch to fail with `WatcherCleared`.
    pub fn drop_watches(&self) {
        self.inner.state.lock().watch_epoch += 1;
        self.inner.changed.notify_waiters();
    }

    /// Discards watch history up to and including `index`.
    pub fn compact(&self, index: u64) {
        let mut state = self.inner.state.lock();
        state.compacted_index = state.compacted_index.max(index);
        state.log.retain(|e| e.mod_index() > index);
        drop(state);
        self.inner.changed.notify_waiters();
    }

    /// Queues a canned snapshot response, served before live state. Lets
    /// tests present stale or otherwise doctored snapshots.
    pub fn push_snapshot(&self, snapshot: Snapshot) {
        self.inner.state.lock().scripted_snapshots.push(snapshot);
    }

    fn live_snapshot(&self) -> Snapshot {
        let state = self.inner.state.lock();
        Snapshot {
            index: state.index,
            entries: state
                .entries
                .iter()
                .map(|(key, (value, mod_index))| SnapshotEntry {
                    key: key.clone(),
                    value: value.clone(),
                    mod_index: *mod_index,
                })
                .collect(),
        }
    }
}

#[async_trait]
impl StoreClient for MemStore {
    async fn snapshot(&self) -> Result<Snapshot, StoreError> {
        let scripted = {
            let mut state = self.inner.state.lock();
            if state.scripted_snapshots.is_empty() {
                None
            } else {
                Some(state.scripted_snapshots.remove(0))
            }
        };
        Ok(scripted.unwrap_or_else(|| self.live_snapshot()))
    }

    async fn watch(&self, after_index: u64) -> Result<Box<dyn Watch>, StoreError> {
        let state = self.inner.state.lock();
        let cursor = if after_index == 0 {
            state.index
        } else {
            after_index
        };
        Ok(Box::new(MemWatch {
            shared: self.inner.clone(),
            cursor,
            epoch: state.watch_epoch,
        }))
    }
}

struct MemWatch {
    shared: Arc<Shared>,
    cursor: u64,
    epoch: u64,
}

#[async_trait]
impl Watch for MemWatch {
    async fn next(&mut self) -> Result<WatchEvent, StoreError> {
        loop {
            let notified = self.shared.changed.notified();
            {
                let state = self.shared.state.lock();
                if state.watch_epoch != self.epoch {
                    return Err(StoreError::WatcherCleared);
                }
                if self.cursor < state.compacted_index {
                    return Err(StoreError::EventIndexCleared);
                }
                if let Some(event) = state
                    .log
                    .iter()
                    .find(|e| e.mod_index() > self.cursor)
                {
                    self.cursor = event.mod_index();
                    return Ok(event.clone());
                }
            }
            notified.await;
        }
    }
}
