//! Derived-state calculators for the policy driver.
//!
//! Consumes typed datastore updates (endpoints, policies, profiles) and
//! maintains three interlocking indices: which selectors are active, which
//! endpoints match each selector, and which IPs are therefore in each
//! selector's IP set. The resolver wires them together and emits the derived
//! event stream.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod active_selector;
mod inherit;
mod ipset;
mod label_index;
mod multimap;
mod resolver;

pub use self::{
    active_selector::{ActiveSelectorCalculator, ResourceSelectors},
    inherit::InheritIndex,
    ipset::IpsetCalculator,
    label_index::LabelIndex,
    multimap::MultiMap,
    resolver::{Resolver, SharedResolver},
};

use policy_driver_core::EndpointId;
use policy_driver_selector::Selector;

/// A selector/endpoint match transition from the label index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchEvent {
    Started { uid: String, endpoint: EndpointId },
    Stopped { uid: String, endpoint: EndpointId },
}

/// A selector lifecycle transition from the active-selector calculator.
#[derive(Clone, Debug)]
pub enum SelectorEvent {
    Active(Selector),
    Inactive(Selector),
}

/// A membership transition of a selector's IP set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IpEvent {
    Added { uid: String, ip: String },
    Removed { uid: String, ip: String },
}
