//! The policy datastore driver.
//!
//! Watches a hierarchical key/value store holding network-policy state
//! (endpoints, policies, profiles, tiers), maintains an eventually
//! consistent mirror of it, and emits a derived event stream telling the
//! dataplane which selectors are active, which endpoints match them, and
//! which IPs are in each selector's IP set.
//!
//! ```text
//! store ─► resync engine ─► control plane (dispatcher + resolver) ─► dataplane
//! ```
//!
//! The resync engine runs its own tasks (see the store crate); everything
//! downstream of it runs on a single serial control-plane task, so each raw
//! update is fully processed, including all derived events, before the next
//! one is dequeued.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use policy_driver_core::{DriverEvent, DriverStatus};
use policy_driver_index::Resolver;
use policy_driver_store::{Dispatcher, MergedUpdate, ResyncEngine, StoreClient};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info_span, Instrument};

/// Sized generously: the control plane should stall the merger only under
/// sustained pressure from the outbound side.
const CONTROL_PLANE_QUEUE: usize = 1024;

/// Configuration reported to the dataplane in the initial `config_loaded`
/// event.
#[derive(Clone, Debug, Default)]
pub struct DriverConfig {
    pub global_config: BTreeMap<String, String>,
    pub host_config: BTreeMap<String, String>,
}

/// Runs the driver against `client`, emitting events on `events_tx` until
/// shut down or a fatal error occurs.
///
/// `config_loaded` is always the first event, followed by the
/// `wait-for-ready` status; everything else is derived from the store.
pub async fn run(
    client: Arc<dyn StoreClient>,
    config: DriverConfig,
    events_tx: mpsc::UnboundedSender<DriverEvent>,
    shutdown: drain::Watch,
) -> Result<()> {
    events_tx
        .send(DriverEvent::ConfigLoaded {
            global: config.global_config,
            host: config.host_config,
        })
        .context("downstream closed")?;
    events_tx
        .send(DriverEvent::Status {
            status: DriverStatus::WaitForDatastore,
        })
        .context("downstream closed")?;

    let (merged_tx, merged_rx) = mpsc::channel(CONTROL_PLANE_QUEUE);
    let engine = ResyncEngine::new(client).spawn(merged_tx, shutdown.clone());
    let control_plane = tokio::spawn(
        control_plane(merged_rx, events_tx, shutdown).instrument(info_span!("control-plane")),
    );

    tokio::select! {
        res = engine => res.context("engine task panicked")??,
        res = control_plane => res.context("control-plane task panicked")??,
    }
    Ok(())
}

/// The serial control-plane loop: parse, fan out, forward.
async fn control_plane(
    mut merged_rx: mpsc::Receiver<MergedUpdate>,
    events_tx: mpsc::UnboundedSender<DriverEvent>,
    shutdown: drain::Watch,
) -> Result<()> {
    let mut dispatcher = Dispatcher::new();
    let resolver = Resolver::shared(events_tx.clone());
    Resolver::register(&resolver, &mut dispatcher);

    loop {
        let update = tokio::select! {
            _ = shutdown.clone().signaled() => return Ok(()),
            update = merged_rx.recv() => update,
        };
        let Some(update) = update else { return Ok(()) };
        match update {
            MergedUpdate::Update { key, value } => {
                let forwarded = dispatcher.dispatch(&key, value);
                events_tx
                    .send(DriverEvent::KeyUpdate {
                        k: key,
                        v: forwarded,
                    })
                    .context("downstream closed")?;
            }
            MergedUpdate::Status(status) => {
                events_tx
                    .send(DriverEvent::Status { status })
                    .context("downstream closed")?;
            }
        }
    }
}
