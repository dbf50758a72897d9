//! Core domain model for the policy datastore driver.
//!
//! This crate defines the parsed forms of everything that crosses the driver's
//! boundaries: store keys and their typed values on the way in, and the
//! derived event stream on the way out. It has no opinion about where updates
//! come from or where events go; the store and index crates supply that.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod event;
mod key;
mod resource;

pub use self::{
    event::{DriverEvent, DriverStatus},
    key::{
        HostEndpointKey, Key, KeyKind, PolicyKey, ProfileKey, ProfilePart, TierKey,
        WorkloadEndpointKey,
    },
    resource::{
        HostEndpoint, Labels, Policy, ProfileRules, Rule, TierMetadata, Value, ValueParseError,
        WorkloadEndpoint,
    },
};

/// Identifies a labelled endpoint in the indices.
///
/// Workload and host endpoints share the label/ipset machinery, so the indices
/// key their tables by this sum rather than by either key type alone.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EndpointId {
    Workload(WorkloadEndpointKey),
    Host(HostEndpointKey),
}

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Workload(k) => write!(f, "{}", Key::WorkloadEndpoint(k.clone())),
            Self::Host(k) => write!(f, "{}", Key::HostEndpoint(k.clone())),
        }
    }
}

/// Identifies a rule-bearing resource (something whose rules can reference
/// selectors): a tiered policy or a profile.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResourceId {
    Policy(PolicyKey),
    Profile(String),
}

/// Identifies a profile in its role as an inheritance parent for endpoint
/// labels.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProfileId(pub String);

impl std::fmt::Display for ProfileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
