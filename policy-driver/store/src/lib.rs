//! Datastore plumbing for the policy driver.
//!
//! The resync engine turns the abstract watch/snapshot contract into a
//! totally ordered stream of raw updates that is eventually consistent with
//! the remote store; the dispatcher parses that stream and fans it out to
//! typed listeners. See `engine` for the high-water-mark protocol that makes
//! resynchronisation loss-free.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod client;
mod dispatch;
mod engine;
mod hwm;
pub mod mem;
mod registry;

pub use self::{
    client::{Snapshot, SnapshotEntry, StoreClient, StoreError, Watch, WatchEvent},
    dispatch::{Dispatcher, ParsedUpdate},
    engine::{MergedUpdate, ResyncEngine},
    hwm::{HighWatermarkTracker, Trie},
    registry::Registry,
};

#[cfg(test)]
mod engine_tests {
    use super::{mem::MemStore, MergedUpdate, ResyncEngine};
    use policy_driver_core::DriverStatus;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Harness {
        rx: mpsc::Receiver<MergedUpdate>,
        signal: drain::Signal,
    }

    impl Harness {
        fn start(store: &MemStore) -> Self {
            let (tx, rx) = mpsc::channel(1024);
            let (signal, watch) = drain::channel();
            ResyncEngine::new(Arc::new(store.clone())).spawn(tx, watch);
            Self { rx, signal }
        }

        async fn next(&mut self) -> MergedUpdate {
            tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
                .await
                .expect("timed out waiting for an update")
                .expect("engine closed its output")
        }

        /// Collects everything up to and including the next `InSync`.
        async fn collect_until_in_sync(&mut self) -> Vec<MergedUpdate> {
            let mut updates = Vec::new();
            loop {
                let update = self.next().await;
                let in_sync = update == MergedUpdate::Status(DriverStatus::InSync);
                updates.push(update);
                if in_sync {
                    return updates;
                }
            }
        }

        /// Collects events until none arrive for `idle`.
        async fn collect_until_quiet(&mut self, idle: Duration) -> Vec<MergedUpdate> {
            let mut updates = Vec::new();
            while let Ok(Some(update)) = tokio::time::timeout(idle, self.rx.recv()).await {
                updates.push(update);
            }
            updates
        }

        async fn assert_quiet(&mut self) {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if let Ok(update) = self.rx.try_recv() {
                panic!("unexpected update: {:?}", update);
            }
        }

        async fn stop(self) {
            drop(self.rx);
            self.signal.drain().await;
        }
    }

    fn updates_only(events: &[MergedUpdate]) -> Vec<(String, Option<String>)> {
        events
            .iter()
            .filter_map(|e| match e {
                MergedUpdate::Update { key, value } => Some((key.clone(), value.clone())),
                MergedUpdate::Status(_) => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn bootstraps_from_initial_snapshot() {
        let store = MemStore::new();
        store.set("/calico/v1/a", "1");
        store.set("/calico/v1/b", "2");

        let mut harness = Harness::start(&store);
        let events = harness.collect_until_in_sync().await;

        assert_eq!(
            events.first(),
            Some(&MergedUpdate::Status(DriverStatus::ResyncInProgress))
        );
        let mut updates = updates_only(&events);
        updates.sort();
        assert_eq!(
            updates,
            vec![
                ("/calico/v1/a".to_string(), Some("1".to_string())),
                ("/calico/v1/b".to_string(), Some("2".to_string())),
            ]
        );
        harness.stop().await;
    }

    #[tokio::test]
    async fn watch_deletes_are_emitted_exactly_once() {
        let store = MemStore::new();
        store.set("/calico/v1/a", "1");
        store.set("/calico/v1/b", "2");

        let mut harness = Harness::start(&store);
        harness.collect_until_in_sync().await;

        store.delete("/calico/v1/b");
        let events = harness.collect_until_quiet(Duration::from_millis(400)).await;
        let updates = updates_only(&events);
        assert_eq!(
            updates,
            vec![("/calico/v1/b".to_string(), None)],
            "{:?}",
            events
        );
        harness.assert_quiet().await;
        harness.stop().await;
    }

    /// A deletion that the watcher never observes (it happens behind a
    /// compaction while disconnected) is proven absent by the post-reconnect
    /// snapshot and emitted exactly once.
    #[tokio::test]
    async fn resync_after_lost_watch_reports_missed_deletion() {
        let store = MemStore::new();
        store.set("/calico/v1/a", "1");
        store.set("/calico/v1/b", "2");

        let mut harness = Harness::start(&store);
        harness.collect_until_in_sync().await;

        // Drop the watch, delete behind its back, and compact the history so
        // the deletion can never be replayed.
        store.drop_watches();
        let deletion_index = store.delete("/calico/v1/b").expect("b exists");
        store.compact(deletion_index);
        // Let the watcher finish failing over before the next write so the
        // write is observed live.
        tokio::time::sleep(Duration::from_millis(200)).await;

        // The next write opens a resync window that forces a fresh snapshot.
        store.set("/calico/v1/c", "3");

        let events = harness.collect_until_quiet(Duration::from_millis(600)).await;
        let updates = updates_only(&events);
        let b_deletes = updates
            .iter()
            .filter(|(k, v)| k == "/calico/v1/b" && v.is_none())
            .count();
        assert_eq!(b_deletes, 1, "exactly one delete for b: {:?}", updates);
        // The update for c is emitted once, not duplicated by the snapshot.
        let c_updates = updates.iter().filter(|(k, _)| k == "/calico/v1/c").count();
        assert_eq!(c_updates, 1, "{:?}", updates);
        assert_eq!(
            events.iter().rev().find_map(|e| match e {
                MergedUpdate::Status(s) => Some(*s),
                _ => None,
            }),
            Some(DriverStatus::InSync)
        );
        harness.stop().await;
    }

    /// Stale snapshots (from a lagging follower) are rejected: nothing they
    /// contain reaches the downstream stream.
    #[tokio::test]
    async fn stale_snapshots_are_retried_without_emitting() {
        let store = MemStore::new();
        store.set("/calico/v1/a", "1");
        store.set("/calico/v1/b", "2");

        let mut harness = Harness::start(&store);
        harness.collect_until_in_sync().await;

        // A stale snapshot: older than the resync floor and carrying a key
        // that must never surface.
        store.push_snapshot(super::Snapshot {
            index: 1,
            entries: vec![super::SnapshotEntry {
                key: "/calico/v1/phantom".to_string(),
                value: "boo".to_string(),
                mod_index: 1,
            }],
        });

        store.drop_watches();
        let deletion_index = store.delete("/calico/v1/b").expect("b exists");
        store.compact(deletion_index);
        tokio::time::sleep(Duration::from_millis(200)).await;
        store.set("/calico/v1/c", "3");

        let events = harness.collect_until_quiet(Duration::from_millis(800)).await;
        let updates = updates_only(&events);
        assert!(
            !updates.iter().any(|(k, _)| k == "/calico/v1/phantom"),
            "stale snapshot leaked: {:?}",
            updates
        );
        assert!(
            updates.contains(&("/calico/v1/b".to_string(), None)),
            "{:?}",
            updates
        );
        harness.stop().await;
    }

    #[tokio::test]
    async fn status_drops_to_resync_on_loss_of_sync() {
        let store = MemStore::new();
        store.set("/calico/v1/a", "1");

        let mut harness = Harness::start(&store);
        harness.collect_until_in_sync().await;

        store.drop_watches();
        tokio::time::sleep(Duration::from_millis(200)).await;
        store.set("/calico/v1/b", "2");

        let events = harness.collect_until_quiet(Duration::from_millis(600)).await;
        assert!(
            events.contains(&MergedUpdate::Status(DriverStatus::ResyncInProgress)),
            "{:?}",
            events
        );
        assert_eq!(
            events.iter().rev().find_map(|e| match e {
                MergedUpdate::Status(s) => Some(*s),
                _ => None,
            }),
            Some(DriverStatus::InSync),
            "{:?}",
            events
        );
        assert!(
            updates_only(&events).contains(&("/calico/v1/b".to_string(), Some("2".to_string()))),
            "{:?}",
            events
        );
        harness.stop().await;
    }
}
