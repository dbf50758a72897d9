//! Top-level wiring of the calculators.
//!
//! The resolver listens to typed datastore updates and drives the event
//! flow between its tables:
//!
//! ```text
//! policy/profile rules ──► ActiveSelectorCalculator
//!                             selector active   ──► InheritIndex.update_selector
//!                             selector inactive ──► InheritIndex.delete_selector
//! endpoint updates ─────► IpsetCalculator.update_endpoint
//!                   └───► InheritIndex.update_labels (profiles as parents)
//! profile labels ───────► InheritIndex.update_parent_labels
//! match started/stopped ► IpsetCalculator.on_match_*
//! ```
//!
//! Its externally visible output is exactly four event kinds: selector
//! added/removed and ip added/removed, emitted on the outbound channel in
//! the order the transitions occur.

use crate::{
    active_selector::ActiveSelectorCalculator, inherit::InheritIndex, ipset::IpsetCalculator,
    IpEvent, MatchEvent, SelectorEvent,
};
use parking_lot::RwLock;
use policy_driver_core::{
    DriverEvent, EndpointId, Key, KeyKind, ProfileId, ProfilePart, ResourceId, Value,
};
use policy_driver_store::{Dispatcher, ParsedUpdate};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub type SharedResolver = Arc<RwLock<Resolver>>;

pub struct Resolver {
    active_sel: ActiveSelectorCalculator,
    label_index: InheritIndex,
    ipset: IpsetCalculator,
    events_tx: mpsc::UnboundedSender<DriverEvent>,
}

// === impl Resolver ===

impl Resolver {
    pub fn shared(events_tx: mpsc::UnboundedSender<DriverEvent>) -> SharedResolver {
        Arc::new(RwLock::new(Resolver {
            active_sel: ActiveSelectorCalculator::new(),
            label_index: InheritIndex::new(),
            ipset: IpsetCalculator::new(),
            events_tx,
        }))
    }

    /// Registers the resolver's listeners with the dispatcher.
    pub fn register(resolver: &SharedResolver, dispatcher: &mut Dispatcher) {
        for kind in [
            KeyKind::WorkloadEndpoint,
            KeyKind::HostEndpoint,
            KeyKind::Policy,
            KeyKind::Profile,
        ] {
            let resolver = resolver.clone();
            dispatcher.register(kind, move |update| resolver.write().handle_update(update));
        }
    }

    fn handle_update(&mut self, update: &mut ParsedUpdate) {
        let key = update.key.clone();
        match (key, update.value.take()) {
            (Key::WorkloadEndpoint(key), value) => {
                let id = EndpointId::Workload(key.clone());
                match value {
                    Some(Value::WorkloadEndpoint(endpoint)) => {
                        let mut ips = endpoint.ipv4_nets.clone();
                        ips.extend(endpoint.ipv6_nets.iter().cloned());
                        let parents =
                            endpoint.profile_ids.iter().cloned().map(ProfileId).collect();
                        self.on_endpoint_update(id, ips, endpoint.labels.clone(), parents);
                        update.value = Some(Value::WorkloadEndpoint(endpoint));
                    }
                    _ => self.on_endpoint_delete(&id),
                }
            }
            (Key::HostEndpoint(key), value) => {
                let id = EndpointId::Host(key.clone());
                match value {
                    Some(Value::HostEndpoint(endpoint)) => {
                        let mut ips = endpoint.expected_ipv4_addrs.clone();
                        ips.extend(endpoint.expected_ipv6_addrs.iter().cloned());
                        let parents =
                            endpoint.profile_ids.iter().cloned().map(ProfileId).collect();
                        self.on_endpoint_update(id, ips, endpoint.labels.clone(), parents);
                        update.value = Some(Value::HostEndpoint(endpoint));
                    }
                    _ => self.on_endpoint_delete(&id),
                }
            }
            (Key::Policy(key), value) => {
                let id = ResourceId::Policy(key.clone());
                match value {
                    Some(Value::Policy(mut policy)) => {
                        debug!(key = %update.key, "policy updated");
                        let out = self.active_sel.update_resource(
                            id,
                            &policy.inbound_rules,
                            &policy.outbound_rules,
                        );
                        policy.inbound_rules = out.inbound;
                        policy.outbound_rules = out.outbound;
                        self.apply_selector_events(out.events);
                        update.replace_value(Value::Policy(policy));
                    }
                    _ => {
                        debug!(key = %update.key, "policy deleted");
                        let events = self.active_sel.delete_resource(&id);
                        self.apply_selector_events(events);
                    }
                }
            }
            (Key::Profile(key), value) => match key.part {
                ProfilePart::Rules => {
                    let id = ResourceId::Profile(key.name.clone());
                    match value {
                        Some(Value::ProfileRules(mut rules)) => {
                            debug!(key = %update.key, "profile rules updated");
                            let out = self.active_sel.update_resource(
                                id,
                                &rules.inbound_rules,
                                &rules.outbound_rules,
                            );
                            rules.inbound_rules = out.inbound;
                            rules.outbound_rules = out.outbound;
                            self.apply_selector_events(out.events);
                            update.replace_value(Value::ProfileRules(rules));
                        }
                        _ => {
                            debug!(key = %update.key, "profile rules deleted");
                            let events = self.active_sel.delete_resource(&id);
                            self.apply_selector_events(events);
                        }
                    }
                }
                ProfilePart::Labels => {
                    let id = ProfileId(key.name.clone());
                    let events = match value {
                        Some(Value::ProfileLabels(labels)) => {
                            debug!(key = %update.key, "profile labels updated");
                            let events = self.label_index.update_parent_labels(id, labels.clone());
                            update.value = Some(Value::ProfileLabels(labels));
                            events
                        }
                        _ => {
                            debug!(key = %update.key, "profile labels deleted");
                            self.label_index.delete_parent_labels(&id)
                        }
                    };
                    self.apply_match_events(events);
                }
                // Tags don't participate in selector resolution; they pass
                // through to the dataplane untouched.
                ProfilePart::Tags => update.value = value,
            },
            (Key::TierMetadata(_), value) => update.value = value,
        }
    }

    fn on_endpoint_update(
        &mut self,
        id: EndpointId,
        ips: Vec<String>,
        labels: policy_driver_core::Labels,
        parents: Vec<ProfileId>,
    ) {
        debug!(endpoint = %id, "endpoint updated");
        let ip_events = self.ipset.update_endpoint(id.clone(), ips);
        self.emit_ip_events(ip_events);
        let match_events = self.label_index.update_labels(id, labels, parents);
        self.apply_match_events(match_events);
    }

    fn on_endpoint_delete(&mut self, id: &EndpointId) {
        debug!(endpoint = %id, "endpoint deleted");
        let ip_events = self.ipset.delete_endpoint(id);
        self.emit_ip_events(ip_events);
        let match_events = self.label_index.delete_labels(id);
        self.apply_match_events(match_events);
    }

    fn apply_selector_events(&mut self, events: Vec<SelectorEvent>) {
        for event in events {
            match event {
                SelectorEvent::Active(selector) => {
                    info!(selector = %selector, uid = selector.uid(), "selector now active");
                    self.emit(DriverEvent::SelectorAdded {
                        sel_id: selector.uid().to_string(),
                    });
                    let match_events = self.label_index.update_selector(&selector);
                    self.apply_match_events(match_events);
                }
                SelectorEvent::Inactive(selector) => {
                    info!(selector = %selector, uid = selector.uid(), "selector now inactive");
                    let match_events = self.label_index.delete_selector(selector.uid());
                    self.apply_match_events(match_events);
                    self.emit(DriverEvent::SelectorRemoved {
                        sel_id: selector.uid().to_string(),
                    });
                }
            }
        }
    }

    fn apply_match_events(&mut self, events: Vec<MatchEvent>) {
        for event in events {
            let ip_events = match event {
                MatchEvent::Started { uid, endpoint } => {
                    debug!(%endpoint, %uid, "match started");
                    self.ipset.on_match_started(&endpoint, &uid)
                }
                MatchEvent::Stopped { uid, endpoint } => {
                    debug!(%endpoint, %uid, "match stopped");
                    self.ipset.on_match_stopped(&endpoint, &uid)
                }
            };
            self.emit_ip_events(ip_events);
        }
    }

    fn emit_ip_events(&mut self, events: Vec<IpEvent>) {
        for event in events {
            let event = match event {
                IpEvent::Added { uid, ip } => DriverEvent::IpAdded { sel_id: uid, ip },
                IpEvent::Removed { uid, ip } => DriverEvent::IpRemoved { sel_id: uid, ip },
            };
            self.emit(event);
        }
    }

    fn emit(&mut self, event: DriverEvent) {
        if self.events_tx.send(event).is_err() {
            debug!("event channel closed, dropping event");
        }
    }
}
