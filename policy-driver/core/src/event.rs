use serde::Serialize;
use std::collections::BTreeMap;

/// The driver's view of its datastore synchronisation state, as reported to
/// the dataplane. Transitions are monotone except that a loss of watch
/// continuity drops `InSync` back to `ResyncInProgress`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum DriverStatus {
    #[serde(rename = "wait-for-ready")]
    WaitForDatastore,
    #[serde(rename = "resync")]
    ResyncInProgress,
    #[serde(rename = "in-sync")]
    InSync,
}

/// An event destined for the dataplane.
///
/// Serialised field names are the wire names the dataplane expects; the
/// framing around them belongs to the transport, not to this crate.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum DriverEvent {
    /// Sent once, before any other event.
    #[serde(rename = "config_loaded")]
    ConfigLoaded {
        global: BTreeMap<String, String>,
        host: BTreeMap<String, String>,
    },

    #[serde(rename = "stat")]
    Status { status: DriverStatus },

    /// A raw key/value update, post-normalisation: rule bodies carry selector
    /// UIDs rather than raw selector expressions. `v: None` is a deletion.
    #[serde(rename = "u")]
    KeyUpdate { k: String, v: Option<String> },

    #[serde(rename = "sel_added")]
    SelectorAdded { sel_id: String },

    #[serde(rename = "sel_removed")]
    SelectorRemoved { sel_id: String },

    #[serde(rename = "ip_added")]
    IpAdded { sel_id: String, ip: String },

    #[serde(rename = "ip_removed")]
    IpRemoved { sel_id: String, ip: String },
}
