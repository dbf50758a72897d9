//! The inner, non-inheriting label/selector match index.
//!
//! Matching is a linear scan: every selector update is evaluated against
//! every known label set and vice versa. That is O(selectors × endpoints)
//! per update, which is acceptable at the cluster sizes this driver targets;
//! a smarter index can replace this as long as the emitted match
//! transitions are identical.

use crate::{multimap::MultiMap, MatchEvent};
use ahash::AHashMap as HashMap;
use policy_driver_core::{EndpointId, Labels};
use policy_driver_selector::Selector;
use tracing::debug;

#[derive(Default)]
pub struct LabelIndex {
    labels_by_id: HashMap<EndpointId, Labels>,
    selectors_by_uid: HashMap<String, Selector>,

    // Current matches, kept in both directions.
    endpoints_by_sel: MultiMap<String, EndpointId>,
    sels_by_endpoint: MultiMap<EndpointId, String>,
}

// === impl LabelIndex ===

impl LabelIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_selector(&mut self, selector: &Selector) -> Vec<MatchEvent> {
        let uid = selector.uid();
        if self.selectors_by_uid.contains_key(uid) {
            // Selectors are content-addressed: same UID, same behaviour.
            return Vec::new();
        }
        debug!(%selector, uid, "updating selector");

        let matched: Vec<EndpointId> = self
            .labels_by_id
            .iter()
            .filter(|(_, labels)| selector.evaluate(labels))
            .map(|(id, _)| id.clone())
            .collect();

        let mut events = Vec::new();
        for id in matched {
            self.store_match(uid, id, &mut events);
        }
        self.selectors_by_uid
            .insert(uid.to_string(), selector.clone());
        events
    }

    pub fn delete_selector(&mut self, uid: &str) -> Vec<MatchEvent> {
        debug!(uid, "deleting selector");
        let matched: Vec<EndpointId> = self
            .endpoints_by_sel
            .get(&uid.to_string())
            .cloned()
            .collect();
        let mut events = Vec::new();
        for id in matched {
            self.delete_match(uid, &id, &mut events);
        }
        self.selectors_by_uid.remove(uid);
        events
    }

    pub fn update_labels(&mut self, id: EndpointId, labels: Labels) -> Vec<MatchEvent> {
        if self.labels_by_id.get(&id) == Some(&labels) {
            return Vec::new();
        }
        debug!(endpoint = %id, "updating labels");

        let decisions: Vec<(String, bool)> = self
            .selectors_by_uid
            .iter()
            .map(|(uid, sel)| (uid.clone(), sel.evaluate(&labels)))
            .collect();

        let mut events = Vec::new();
        for (uid, now_matches) in decisions {
            if now_matches {
                self.store_match(&uid, id.clone(), &mut events);
            } else {
                self.delete_match(&uid, &id, &mut events);
            }
        }
        self.labels_by_id.insert(id, labels);
        events
    }

    pub fn delete_labels(&mut self, id: &EndpointId) -> Vec<MatchEvent> {
        debug!(endpoint = %id, "deleting labels");
        let matched: Vec<String> = self.sels_by_endpoint.get(id).cloned().collect();
        let mut events = Vec::new();
        for uid in matched {
            self.delete_match(&uid, id, &mut events);
        }
        self.labels_by_id.remove(id);
        events
    }

    fn store_match(&mut self, uid: &str, id: EndpointId, events: &mut Vec<MatchEvent>) {
        if self.endpoints_by_sel.put(uid.to_string(), id.clone()) {
            self.sels_by_endpoint.put(id.clone(), uid.to_string());
            events.push(MatchEvent::Started {
                uid: uid.to_string(),
                endpoint: id,
            });
        }
    }

    fn delete_match(&mut self, uid: &str, id: &EndpointId, events: &mut Vec<MatchEvent>) {
        if self.endpoints_by_sel.discard(&uid.to_string(), id) {
            self.sels_by_endpoint.discard(id, &uid.to_string());
            events.push(MatchEvent::Stopped {
                uid: uid.to_string(),
                endpoint: id.clone(),
            });
        }
    }
}
