//! Tracks which selectors are referenced by the current set of policies and
//! profiles, firing lifecycle events as selectors come into and out of use.
//!
//! Selectors are deduplicated by UID across all resources: a selector
//! becomes active when the first rule referencing it appears and inactive
//! when the last one goes. As a side effect, the selector strings in rule
//! bodies are rewritten to their UIDs so downstream consumers see rules that
//! reference the same identities the lifecycle events carry; the rewritten
//! rules are returned rather than mutated in place.

use crate::{multimap::MultiMap, SelectorEvent};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use policy_driver_core::{ResourceId, Rule};
use policy_driver_selector::Selector;
use tracing::{debug, warn};

#[derive(Default)]
pub struct ActiveSelectorCalculator {
    selectors_by_uid: HashMap<String, Selector>,
    active_uids_by_resource: HashMap<ResourceId, HashSet<String>>,
    active_resources_by_uid: MultiMap<String, ResourceId>,
}

/// The result of applying one resource update: the rules with selector
/// strings replaced by UIDs, plus the selector lifecycle transitions the
/// update caused.
pub struct ResourceSelectors {
    pub inbound: Vec<Rule>,
    pub outbound: Vec<Rule>,
    pub events: Vec<SelectorEvent>,
}

// === impl ActiveSelectorCalculator ===

impl ActiveSelectorCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_resource(
        &mut self,
        id: ResourceId,
        inbound: &[Rule],
        outbound: &[Rule],
    ) -> ResourceSelectors {
        let mut current: HashMap<String, Selector> = HashMap::new();
        let inbound = rewrite_rules(inbound, &mut current);
        let outbound = rewrite_rules(outbound, &mut current);
        let events = self.apply(id, current);
        ResourceSelectors {
            inbound,
            outbound,
            events,
        }
    }

    pub fn delete_resource(&mut self, id: &ResourceId) -> Vec<SelectorEvent> {
        self.apply(id.clone(), HashMap::new())
    }

    fn apply(
        &mut self,
        id: ResourceId,
        current: HashMap<String, Selector>,
    ) -> Vec<SelectorEvent> {
        let known = self.active_uids_by_resource.entry(id.clone()).or_default();
        debug!(resource = ?id, known = known.len(), current = current.len(), "updating resource selectors");

        let added: Vec<&Selector> = current
            .iter()
            .filter(|(uid, _)| !known.contains(*uid))
            .map(|(_, sel)| sel)
            .collect();
        let removed: Vec<String> = known
            .iter()
            .filter(|uid| !current.contains_key(*uid))
            .cloned()
            .collect();

        let mut events = Vec::new();
        for sel in added {
            known.insert(sel.uid().to_string());
            if self.active_resources_by_uid.put(sel.uid().to_string(), id.clone()) {
                if !self.selectors_by_uid.contains_key(sel.uid()) {
                    debug!(uid = sel.uid(), "selector became active");
                    self.selectors_by_uid
                        .insert(sel.uid().to_string(), sel.clone());
                    events.push(SelectorEvent::Active(sel.clone()));
                }
            }
        }
        for uid in removed {
            known.remove(&uid);
            self.active_resources_by_uid.discard(&uid, &id);
            if !self.active_resources_by_uid.contains_key(&uid) {
                debug!(%uid, "selector became inactive");
                if let Some(sel) = self.selectors_by_uid.remove(&uid) {
                    events.push(SelectorEvent::Inactive(sel));
                }
            }
        }
        if self
            .active_uids_by_resource
            .get(&id)
            .is_some_and(|s| s.is_empty())
        {
            self.active_uids_by_resource.remove(&id);
        }
        events
    }
}

/// Parses the selector slots of each rule, collecting the selectors by UID
/// and returning copies of the rules with the slots rewritten to UIDs.
/// Unparseable selectors are logged and treated as absent.
fn rewrite_rules(rules: &[Rule], selectors: &mut HashMap<String, Selector>) -> Vec<Rule> {
    rules
        .iter()
        .map(|rule| {
            let mut rewritten = rule.clone();
            for slot in rewritten.selector_slots_mut() {
                let Some(expr) = slot.as_deref() else { continue };
                if expr.is_empty() {
                    continue;
                }
                match Selector::parse(expr) {
                    Ok(sel) => {
                        *slot = Some(sel.uid().to_string());
                        selectors.insert(sel.uid().to_string(), sel);
                    }
                    Err(e) => {
                        warn!(selector = expr, error = %e, "ignoring unparseable selector");
                        *slot = None;
                    }
                }
            }
            rewritten
        })
        .collect()
}
