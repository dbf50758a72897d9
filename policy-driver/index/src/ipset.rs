//! Merges per-endpoint IP lists into per-selector IP sets.
//!
//! An IP belongs to a selector's set while at least one endpoint matching
//! the selector carries it. Events fire only on the empty/non-empty
//! transitions of the backing endpoint set, so overlapping endpoints never
//! produce duplicate adds or removes.

use crate::{multimap::MultiMap, IpEvent};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use policy_driver_core::EndpointId;
use tracing::debug;

#[derive(Default)]
pub struct IpsetCalculator {
    ips_by_endpoint: HashMap<EndpointId, Vec<String>>,
    sels_by_endpoint: MultiMap<EndpointId, String>,
    /// selector uid → ip → endpoints contributing that ip.
    endpoints_by_sel_ip: HashMap<String, HashMap<String, HashSet<EndpointId>>>,
}

// === impl IpsetCalculator ===

impl IpsetCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_match_started(&mut self, id: &EndpointId, uid: &str) -> Vec<IpEvent> {
        self.sels_by_endpoint.put(id.clone(), uid.to_string());
        let ips = self.ips_by_endpoint.get(id).cloned().unwrap_or_default();
        let mut events = Vec::new();
        self.add_contribution(uid, id, &ips, &mut events);
        events
    }

    pub fn on_match_stopped(&mut self, id: &EndpointId, uid: &str) -> Vec<IpEvent> {
        self.sels_by_endpoint.discard(id, &uid.to_string());
        let ips = self.ips_by_endpoint.get(id).cloned().unwrap_or_default();
        let mut events = Vec::new();
        self.remove_contribution(uid, id, &ips, &mut events);
        events
    }

    pub fn update_endpoint(&mut self, id: EndpointId, ips: Vec<String>) -> Vec<IpEvent> {
        // Deduplicate while keeping order; duplicate list entries must not
        // unbalance the per-ip refcounts.
        let mut seen = HashSet::new();
        let ips: Vec<String> = ips.into_iter().filter(|ip| seen.insert(ip.clone())).collect();
        debug!(endpoint = %id, ?ips, "endpoint ips updated");

        let old_ips = if ips.is_empty() {
            self.ips_by_endpoint.remove(&id).unwrap_or_default()
        } else {
            self.ips_by_endpoint
                .insert(id.clone(), ips.clone())
                .unwrap_or_default()
        };

        let old_set: HashSet<&String> = old_ips.iter().collect();
        let new_set: HashSet<&String> = ips.iter().collect();
        let added: Vec<String> = ips
            .iter()
            .filter(|ip| !old_set.contains(ip))
            .cloned()
            .collect();
        let removed: Vec<String> = old_ips
            .iter()
            .filter(|ip| !new_set.contains(ip))
            .cloned()
            .collect();

        let matching: Vec<String> = self.sels_by_endpoint.get(&id).cloned().collect();
        let mut events = Vec::new();
        for uid in matching {
            self.add_contribution(&uid, &id, &added, &mut events);
            self.remove_contribution(&uid, &id, &removed, &mut events);
        }
        events
    }

    pub fn delete_endpoint(&mut self, id: &EndpointId) -> Vec<IpEvent> {
        self.update_endpoint(id.clone(), Vec::new())
    }

    fn add_contribution(
        &mut self,
        uid: &str,
        id: &EndpointId,
        ips: &[String],
        events: &mut Vec<IpEvent>,
    ) {
        if ips.is_empty() {
            return;
        }
        let ip_map = self.endpoints_by_sel_ip.entry(uid.to_string()).or_default();
        for ip in ips {
            let endpoints = ip_map.entry(ip.clone()).or_default();
            if endpoints.is_empty() {
                events.push(IpEvent::Added {
                    uid: uid.to_string(),
                    ip: ip.clone(),
                });
            }
            endpoints.insert(id.clone());
        }
    }

    fn remove_contribution(
        &mut self,
        uid: &str,
        id: &EndpointId,
        ips: &[String],
        events: &mut Vec<IpEvent>,
    ) {
        let Some(ip_map) = self.endpoints_by_sel_ip.get_mut(uid) else {
            return;
        };
        for ip in ips {
            if let Some(endpoints) = ip_map.get_mut(ip) {
                endpoints.remove(id);
                if endpoints.is_empty() {
                    ip_map.remove(ip);
                    events.push(IpEvent::Removed {
                        uid: uid.to_string(),
                        ip: ip.clone(),
                    });
                }
            }
        }
        if ip_map.is_empty() {
            self.endpoints_by_sel_ip.remove(uid);
        }
    }
}
