//! The resync engine: three cooperating tasks that turn a lossy watch stream
//! plus periodic snapshots into a totally ordered, eventually consistent
//! stream of raw key/value updates.
//!
//! - The *watcher* consumes the watch stream and requests a resync whenever
//!   the store invalidates its cursor.
//! - The *snapshotter* takes one snapshot at start of day, then serves resync
//!   requests, rejecting stale reads.
//! - The *merger* owns the high-water-mark tracker and decides, per event,
//!   whether anything is emitted downstream.

use crate::{
    client::{Snapshot, StoreClient, StoreError, WatchEvent},
    hwm::HighWatermarkTracker,
};
use anyhow::{Context, Result};
use policy_driver_core::DriverStatus;
use std::sync::Arc;
use tokio::{sync::mpsc, time};
use tracing::{debug, info, info_span, warn, Instrument};

/// Sized to absorb a full snapshot burst without stalling the watcher.
const WATCHER_QUEUE: usize = 20_000;
/// A single-slot queue back-pressures snapshot streaming naturally.
const SNAPSHOT_QUEUE: usize = 1;
const RESYNC_QUEUE: usize = 5;

/// What the merger hands to the control plane.
#[derive(Clone, Debug, PartialEq)]
pub enum MergedUpdate {
    /// A raw update; `value: None` is a deletion.
    Update {
        key: String,
        value: Option<String>,
    },
    Status(DriverStatus),
}

/// Internal event form shared by the watcher and snapshotter streams.
#[derive(Clone, Debug)]
enum Event {
    Set {
        key: String,
        value: String,
        mod_index: u64,
        /// Present when this entry came from a snapshot; the snapshot's own
        /// index is then what gets stored in the tracker.
        snapshot_index: Option<u64>,
        /// True on the first watcher event after a loss of sync.
        snapshot_starting: bool,
    },
    Delete {
        key: String,
        mod_index: u64,
        snapshot_starting: bool,
    },
    SnapFinished {
        snapshot_index: u64,
    },
}

/// Builds and spawns the engine's tasks. The returned handle resolves when
/// the engine stops: `Ok` on shutdown, `Err` on a fatal store error.
pub struct ResyncEngine {
    client: Arc<dyn StoreClient>,
}

// === impl ResyncEngine ===

impl ResyncEngine {
    pub fn new(client: Arc<dyn StoreClient>) -> Self {
        Self { client }
    }

    pub fn spawn(
        self,
        merged_tx: mpsc::Sender<MergedUpdate>,
        shutdown: drain::Watch,
    ) -> tokio::task::JoinHandle<Result<()>> {
        let (watch_tx, watch_rx) = mpsc::channel(WATCHER_QUEUE);
        let (snap_tx, snap_rx) = mpsc::channel(SNAPSHOT_QUEUE);
        let (resync_tx, resync_rx) = mpsc::channel(RESYNC_QUEUE);

        let watcher = tokio::spawn(
            watch_store(self.client.clone(), watch_tx, resync_tx, shutdown.clone())
                .instrument(info_span!("watcher")),
        );
        let snapshotter = tokio::spawn(
            read_snapshots(self.client, snap_tx, resync_rx, shutdown.clone())
                .instrument(info_span!("snapshotter")),
        );
        let merger = tokio::spawn(
            merge_updates(snap_rx, watch_rx, merged_tx, shutdown).instrument(info_span!("merger")),
        );

        tokio::spawn(async move {
            for handle in [watcher, snapshotter, merger] {
                handle.await.context("engine task panicked")??;
            }
            Ok(())
        })
    }
}

/// Capped exponential backoff for transient store errors.
struct Backoff {
    delay: time::Duration,
}

impl Backoff {
    const MIN: time::Duration = time::Duration::from_millis(250);
    const MAX: time::Duration = time::Duration::from_secs(15);

    fn new() -> Self {
        Self { delay: Self::MIN }
    }

    fn reset(&mut self) {
        self.delay = Self::MIN;
    }

    async fn sleep(&mut self) {
        time::sleep(self.delay).await;
        self.delay = (self.delay * 2).min(Self::MAX);
    }
}

/// Watcher task: converts watch events into the internal form, tracking loss
/// of sync. On loss it sends a resync request carrying the last index it
/// knows it saw (less one), restarts the watch, and flags the next event so
/// the merger knows a resync window has opened.
async fn watch_store(
    client: Arc<dyn StoreClient>,
    events_tx: mpsc::Sender<Event>,
    resync_tx: mpsc::Sender<u64>,
    shutdown: drain::Watch,
) -> Result<()> {
    let mut after_index = 0u64;
    let mut lost_sync = true;
    let mut backoff = Backoff::new();
    loop {
        let mut watch = tokio::select! {
            _ = shutdown.clone().signaled() => return Ok(()),
            res = client.watch(after_index) => match res {
                Ok(watch) => {
                    backoff.reset();
                    watch
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!(error = %e, "failed to open watch, retrying");
                    backoff.sleep().await;
                    continue;
                }
            },
        };

        loop {
            let event = tokio::select! {
                _ = shutdown.clone().signaled() => return Ok(()),
                event = watch.next() => event,
            };
            match event {
                Ok(event) => {
                    backoff.reset();
                    after_index = event.mod_index();
                    let snapshot_starting = lost_sync;
                    if lost_sync {
                        lost_sync = false;
                        // The covering snapshot must be at least as new as
                        // this event; duplicate requests coalesce.
                        let floor = event.mod_index().saturating_sub(1);
                        if resync_tx.send(floor).await.is_err() {
                            return Ok(());
                        }
                    }
                    let event = match event {
                        WatchEvent::Set {
                            key,
                            value,
                            mod_index,
                        } => Event::Set {
                            key,
                            value,
                            mod_index,
                            snapshot_index: None,
                            snapshot_starting,
                        },
                        WatchEvent::Delete { key, mod_index } => Event::Delete {
                            key,
                            mod_index,
                            snapshot_starting,
                        },
                    };
                    if events_tx.send(event).await.is_err() {
                        return Ok(());
                    }
                }
                Err(e) if e.is_lost_sync() => {
                    info!(error = %e, after_index, "lost sync with the store, requesting resync");
                    lost_sync = true;
                    // The replacement snapshot must be at least as new as the
                    // last event we saw.
                    let floor = after_index.saturating_sub(1);
                    if resync_tx.send(floor).await.is_err() {
                        return Ok(());
                    }
                    if matches!(e, StoreError::EventIndexCleared) {
                        // The cursor is below the compaction horizon; events
                        // up to the head are unrecoverable from the watch and
                        // must come from the snapshot instead.
                        after_index = 0;
                    }
                    break;
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!(error = %e, "transient watch error, retrying");
                    backoff.sleep().await;
                }
            }
        }
    }
}

/// Snapshotter task: one start-of-day snapshot, then snapshots on demand.
/// Requests are coalesced by taking the highest floor queued; snapshots older
/// than the floor are stale reads (we may be talking to a follower) and are
/// retried.
async fn read_snapshots(
    client: Arc<dyn StoreClient>,
    snap_tx: mpsc::Sender<Event>,
    mut resync_rx: mpsc::Receiver<u64>,
    shutdown: drain::Watch,
) -> Result<()> {
    let mut highest_snapshot_index = 0u64;
    let mut have_snapshotted = false;
    let mut backoff = Backoff::new();
    loop {
        let mut min_index = 0u64;
        if have_snapshotted {
            let floor = tokio::select! {
                _ = shutdown.clone().signaled() => return Ok(()),
                floor = resync_rx.recv() => floor,
            };
            let Some(floor) = floor else { return Ok(()) };
            min_index = floor;
            while let Ok(floor) = resync_rx.try_recv() {
                min_index = min_index.max(floor);
            }
            if highest_snapshot_index >= min_index {
                debug!(
                    min_index,
                    highest_snapshot_index, "snapshot already covers requested index"
                );
                // Nothing to stream, but the merger still needs the marker to
                // close its resync window.
                if snap_tx
                    .send(Event::SnapFinished {
                        snapshot_index: min_index,
                    })
                    .await
                    .is_err()
                {
                    return Ok(());
                }
                continue;
            }
        }

        let snapshot = loop {
            let res = tokio::select! {
                _ = shutdown.clone().signaled() => return Ok(()),
                res = client.snapshot() => res,
            };
            match res {
                Ok(snapshot) if snapshot.index < min_index => {
                    info!(
                        snapshot_index = snapshot.index,
                        min_index, "retrieved stale snapshot, rereading"
                    );
                    backoff.sleep().await;
                }
                Ok(snapshot) => {
                    backoff.reset();
                    break snapshot;
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!(error = %e, "error reading snapshot, retrying");
                    backoff.sleep().await;
                }
            }
        };

        let Snapshot { index, entries } = snapshot;
        debug!(snapshot_index = index, entries = entries.len(), "streaming snapshot");
        for entry in entries {
            let event = Event::Set {
                key: entry.key,
                value: entry.value,
                mod_index: entry.mod_index,
                snapshot_index: Some(index),
                snapshot_starting: false,
            };
            if snap_tx.send(event).await.is_err() {
                return Ok(());
            }
        }
        if snap_tx
            .send(Event::SnapFinished {
                snapshot_index: index,
            })
            .await
            .is_err()
        {
            return Ok(());
        }
        highest_snapshot_index = highest_snapshot_index.max(index);
        have_snapshotted = true;
    }
}

/// Merger task: the single owner of the high-water-mark tracker. Applies the
/// HWM protocol to both input streams and emits raw updates plus status
/// transitions downstream.
async fn merge_updates(
    mut snap_rx: mpsc::Receiver<Event>,
    mut watch_rx: mpsc::Receiver<Event>,
    merged_tx: mpsc::Sender<MergedUpdate>,
    shutdown: drain::Watch,
) -> Result<()> {
    let mut hwms = HighWatermarkTracker::new();
    // Bootstrapping counts as a resync: deletions are tracked until the first
    // snapshot completes.
    hwms.start_tracking_deletions();
    let mut min_snapshot_index = 0u64;
    let mut status = DriverStatus::WaitForDatastore;

    send_status(&merged_tx, &mut status, DriverStatus::ResyncInProgress).await?;

    loop {
        let event = tokio::select! {
            _ = shutdown.clone().signaled() => return Ok(()),
            event = snap_rx.recv() => event,
            event = watch_rx.recv() => event,
        };
        // Either input closing means the producing task is gone; its join
        // result carries any error.
        let Some(event) = event else { return Ok(()) };

        match event {
            Event::Set {
                key,
                value,
                mod_index,
                snapshot_index,
                snapshot_starting,
            } => {
                if snapshot_starting {
                    on_loss_of_sync(&mut hwms, &mut min_snapshot_index, mod_index);
                    send_status(&merged_tx, &mut status, DriverStatus::ResyncInProgress).await?;
                }
                // Snapshot entries are stored at the snapshot's index so that
                // a later scan can spot keys the snapshot no longer contains.
                let idx_to_store = snapshot_index.unwrap_or(mod_index);
                let old = hwms.store_update(&key, idx_to_store);
                if old.map_or(true, |old| old < mod_index) {
                    let update = MergedUpdate::Update {
                        key,
                        value: Some(value),
                    };
                    merged_tx.send(update).await.context("downstream closed")?;
                }
            }
            Event::Delete {
                key,
                mod_index,
                snapshot_starting,
            } => {
                if snapshot_starting {
                    on_loss_of_sync(&mut hwms, &mut min_snapshot_index, mod_index);
                    send_status(&merged_tx, &mut status, DriverStatus::ResyncInProgress).await?;
                }
                for deleted in hwms.store_deletion(&key, mod_index) {
                    let update = MergedUpdate::Update {
                        key: deleted,
                        value: None,
                    };
                    merged_tx.send(update).await.context("downstream closed")?;
                }
            }
            Event::SnapFinished { snapshot_index } => {
                if snapshot_index >= min_snapshot_index {
                    // This snapshot covers every loss-of-sync window we know
                    // about: flush keys it proved absent and declare sync.
                    hwms.stop_tracking_deletions();
                    let deleted = hwms.delete_old_keys(snapshot_index);
                    info!(
                        snapshot_index,
                        deleted = deleted.len(),
                        "snapshot finished"
                    );
                    for key in deleted {
                        let update = MergedUpdate::Update { key, value: None };
                        merged_tx.send(update).await.context("downstream closed")?;
                    }
                    send_status(&merged_tx, &mut status, DriverStatus::InSync).await?;
                }
            }
        }
    }
}

fn on_loss_of_sync(hwms: &mut HighWatermarkTracker, min_snapshot_index: &mut u64, mod_index: u64) {
    // Matches the floor the watcher sent with its resync request, so a
    // snapshot exactly at the floor completes the resync.
    *min_snapshot_index = mod_index.saturating_sub(1);
    if !hwms.tracking_deletions() {
        hwms.start_tracking_deletions();
    }
}

async fn send_status(
    merged_tx: &mpsc::Sender<MergedUpdate>,
    current: &mut DriverStatus,
    status: DriverStatus,
) -> Result<()> {
    if *current != status {
        *current = status;
        merged_tx
            .send(MergedUpdate::Status(status))
            .await
            .context("downstream closed")?;
    }
    Ok(())
}
