//! Label inheritance on top of the inner match index.
//!
//! Endpoints inherit labels from their parent profiles: an endpoint's
//! effective label set is the union of its parents' labels overridden by its
//! own. Parent changes mark the affected endpoints dirty; the dirty set is
//! flushed synchronously at the end of every public mutation, so match
//! events are fully emitted before the call returns.

use crate::{label_index::LabelIndex, multimap::MultiMap, MatchEvent};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use policy_driver_core::{EndpointId, Labels, ProfileId};
use policy_driver_selector::Selector;
use tracing::debug;

#[derive(Default)]
pub struct InheritIndex {
    index: LabelIndex,

    labels_by_item: HashMap<EndpointId, Labels>,
    labels_by_parent: HashMap<ProfileId, Labels>,
    parents_by_item: HashMap<EndpointId, Vec<ProfileId>>,
    items_by_parent: MultiMap<ProfileId, EndpointId>,
    dirty_items: HashSet<EndpointId>,
}

// === impl InheritIndex ===

impl InheritIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_selector(&mut self, selector: &Selector) -> Vec<MatchEvent> {
        self.index.update_selector(selector)
    }

    pub fn delete_selector(&mut self, uid: &str) -> Vec<MatchEvent> {
        self.index.delete_selector(uid)
    }

    pub fn update_labels(
        &mut self,
        id: EndpointId,
        labels: Labels,
        parents: Vec<ProfileId>,
    ) -> Vec<MatchEvent> {
        debug!(endpoint = %id, ?parents, "updating inherited labels");
        self.labels_by_item.insert(id.clone(), labels);
        self.on_item_parents_update(&id, parents);
        self.dirty_items.insert(id);
        self.flush()
    }

    pub fn delete_labels(&mut self, id: &EndpointId) -> Vec<MatchEvent> {
        debug!(endpoint = %id, "deleting inherited labels");
        self.labels_by_item.remove(id);
        self.on_item_parents_update(id, Vec::new());
        self.dirty_items.insert(id.clone());
        self.flush()
    }

    pub fn update_parent_labels(&mut self, parent: ProfileId, labels: Labels) -> Vec<MatchEvent> {
        debug!(%parent, "updating parent labels");
        self.labels_by_parent.insert(parent.clone(), labels);
        self.flush_children(&parent)
    }

    pub fn delete_parent_labels(&mut self, parent: &ProfileId) -> Vec<MatchEvent> {
        debug!(%parent, "deleting parent labels");
        self.labels_by_parent.remove(parent);
        self.flush_children(parent)
    }

    fn on_item_parents_update(&mut self, id: &EndpointId, parents: Vec<ProfileId>) {
        if let Some(old_parents) = self.parents_by_item.remove(id) {
            for parent in old_parents {
                self.items_by_parent.discard(&parent, id);
            }
        }
        for parent in &parents {
            self.items_by_parent.put(parent.clone(), id.clone());
        }
        if !parents.is_empty() {
            self.parents_by_item.insert(id.clone(), parents);
        }
    }

    fn flush_children(&mut self, parent: &ProfileId) -> Vec<MatchEvent> {
        let children: Vec<EndpointId> = self.items_by_parent.get(parent).cloned().collect();
        self.dirty_items.extend(children);
        self.flush()
    }

    /// Recomputes effective labels for every dirty item and pushes them into
    /// the inner index.
    fn flush(&mut self) -> Vec<MatchEvent> {
        let mut events = Vec::new();
        for id in std::mem::take(&mut self.dirty_items) {
            match self.labels_by_item.get(&id) {
                None => {
                    events.extend(self.index.delete_labels(&id));
                }
                Some(own_labels) => {
                    let mut combined = Labels::new();
                    if let Some(parents) = self.parents_by_item.get(&id) {
                        for parent in parents {
                            if let Some(parent_labels) = self.labels_by_parent.get(parent) {
                                combined
                                    .extend(parent_labels.iter().map(|(k, v)| (k.clone(), v.clone())));
                            }
                        }
                    }
                    combined.extend(own_labels.iter().map(|(k, v)| (k.clone(), v.clone())));
                    events.extend(self.index.update_labels(id, combined));
                }
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{endpoint_id, labels};

    fn sel(expr: &str) -> Selector {
        Selector::parse(expr).unwrap()
    }

    fn prof(name: &str) -> ProfileId {
        ProfileId(name.to_string())
    }

    #[test]
    fn inherits_parent_labels() {
        let mut index = InheritIndex::new();
        let prod_web = sel(r#"env == "prod" && role == "web""#);
        index.update_selector(&prod_web);
        index.update_parent_labels(prof("q"), labels(&[("env", "prod")]));

        let events = index.update_labels(
            endpoint_id("e1"),
            labels(&[("role", "web")]),
            vec![prof("q")],
        );
        assert_eq!(
            events,
            vec![MatchEvent::Started {
                uid: prod_web.uid().to_string(),
                endpoint: endpoint_id("e1"),
            }]
        );
    }

    #[test]
    fn own_labels_override_parents() {
        let mut index = InheritIndex::new();
        let prod = sel(r#"env == "prod""#);
        index.update_selector(&prod);
        index.update_parent_labels(prof("q"), labels(&[("env", "prod")]));

        // The endpoint's own env=dev wins over the parent's env=prod.
        let events = index.update_labels(
            endpoint_id("e1"),
            labels(&[("env", "dev")]),
            vec![prof("q")],
        );
        assert!(events.is_empty(), "{:?}", events);
    }

    #[test]
    fn later_parents_override_earlier_ones() {
        let mut index = InheritIndex::new();
        let prod = sel(r#"env == "prod""#);
        index.update_selector(&prod);
        index.update_parent_labels(prof("a"), labels(&[("env", "dev")]));
        index.update_parent_labels(prof("b"), labels(&[("env", "prod")]));

        let events = index.update_labels(
            endpoint_id("e1"),
            labels(&[]),
            vec![prof("a"), prof("b")],
        );
        assert_eq!(events.len(), 1, "{:?}", events);
    }

    #[test]
    fn parent_label_change_reflows_children() {
        let mut index = InheritIndex::new();
        let prod = sel(r#"env == "prod""#);
        index.update_selector(&prod);
        index.update_parent_labels(prof("q"), labels(&[("env", "prod")]));
        index.update_labels(endpoint_id("e1"), labels(&[("role", "web")]), vec![prof("q")]);

        let events = index.update_parent_labels(prof("q"), labels(&[("env", "dev")]));
        assert_eq!(
            events,
            vec![MatchEvent::Stopped {
                uid: prod.uid().to_string(),
                endpoint: endpoint_id("e1"),
            }]
        );

        // And back again.
        let events = index.update_parent_labels(prof("q"), labels(&[("env", "prod")]));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], MatchEvent::Started { .. }));
    }

    #[test]
    fn deleting_parent_labels_reflows_children() {
        let mut index = InheritIndex::new();
        let prod = sel(r#"env == "prod""#);
        index.update_selector(&prod);
        index.update_parent_labels(prof("q"), labels(&[("env", "prod")]));
        index.update_labels(endpoint_id("e1"), labels(&[]), vec![prof("q")]);

        let events = index.delete_parent_labels(&prof("q"));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], MatchEvent::Stopped { .. }));
    }

    #[test]
    fn removing_a_parent_removes_its_labels() {
        let mut index = InheritIndex::new();
        let prod = sel(r#"env == "prod""#);
        index.update_selector(&prod);
        index.update_parent_labels(prof("q"), labels(&[("env", "prod")]));
        index.update_labels(endpoint_id("e1"), labels(&[]), vec![prof("q")]);

        let events = index.update_labels(endpoint_id("e1"), labels(&[]), vec![]);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], MatchEvent::Stopped { .. }));

        // A parent update no longer touches the detached endpoint.
        assert!(index
            .update_parent_labels(prof("q"), labels(&[("env", "prod")]))
            .is_empty());
    }

    #[test]
    fn delete_labels_tears_down_matches() {
        let mut index = InheritIndex::new();
        let any = sel("all()");
        index.update_selector(&any);
        index.update_labels(endpoint_id("e1"), labels(&[]), vec![]);

        let events = index.delete_labels(&endpoint_id("e1"));
        assert_eq!(
            events,
            vec![MatchEvent::Stopped {
                uid: any.uid().to_string(),
                endpoint: endpoint_id("e1"),
            }]
        );
    }
}
