//! In-memory view of the lifecycle nodes and their last confirmed states.
//!
//! This struct is PURE data. It does not do I/O. The directory decides
//! membership, the poller overlays states, the presentation layer and the
//! orchestrator only read.

use lifecycle_protocol::{LifecycleState, NodeState, QueryError, StateResults};
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub type SharedRegistry = Arc<RwLock<NodeRegistry>>;

/// Names added and removed by one `reconcile` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDelta {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl MembershipDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    /// A query confirmed a different state than the one recorded.
    Changed {
        node: String,
        from: LifecycleState,
        to: LifecycleState,
    },
    /// The first failed query after a confirmed (or initial) state.
    Stale { node: String, error: QueryError },
    /// A stale node answered again with the state it had before.
    Recovered { node: String, state: LifecycleState },
}

#[derive(Debug, Clone, Copy, Default)]
struct Entry {
    state: LifecycleState,
    stale: bool,
}

#[derive(Debug, Default)]
pub struct NodeRegistry {
    // BTreeMap keeps snapshots in lexicographic order.
    entries: BTreeMap<String, Entry>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    /// Makes membership equal to `names`. New nodes start as `Unknown`,
    /// vanished nodes are dropped with their state.
    pub fn reconcile(&mut self, names: &BTreeSet<String>) -> MembershipDelta {
        let removed: Vec<String> = self
            .entries
            .keys()
            .filter(|name| !names.contains(*name))
            .cloned()
            .collect();
        for name in &removed {
            self.entries.remove(name);
            info!("Registry: Node '{}' left", name);
        }

        let mut added = Vec::new();
        for name in names {
            if !self.entries.contains_key(name) {
                self.entries.insert(name.clone(), Entry::default());
                info!("Registry: Node '{}' joined", name);
                added.push(name.clone());
            }
        }

        MembershipDelta { added, removed }
    }

    /// Overlays query results on the current membership.
    ///
    /// A failed query keeps the recorded state and marks it stale. Results
    /// for names that are not members are ignored.
    pub fn apply_states(&mut self, results: &StateResults) -> Vec<StateChange> {
        let mut changes = Vec::new();

        for (name, result) in results {
            let Some(entry) = self.entries.get_mut(name) else {
                debug!("Registry: Ignoring state of non-member '{}'", name);
                continue;
            };

            match result {
                Ok(state) => {
                    if entry.state != *state {
                        changes.push(StateChange::Changed {
                            node: name.clone(),
                            from: entry.state,
                            to: *state,
                        });
                        entry.state = *state;
                    } else if entry.stale {
                        changes.push(StateChange::Recovered {
                            node: name.clone(),
                            state: *state,
                        });
                    }
                    entry.stale = false;
                }
                Err(error) => {
                    if entry.stale {
                        debug!("Registry: '{}' still unreachable: {}", name, error);
                    } else {
                        warn!("Registry: State query for '{}' failed: {}", name, error);
                        entry.stale = true;
                        changes.push(StateChange::Stale {
                            node: name.clone(),
                            error: error.clone(),
                        });
                    }
                }
            }
        }

        changes
    }

    pub fn snapshot(&self) -> Vec<NodeState> {
        self.entries
            .iter()
            .map(|(name, entry)| NodeState {
                name: name.clone(),
                state: entry.state,
                stale: entry.stale,
            })
            .collect()
    }

    pub fn state_of(&self, name: &str) -> Option<LifecycleState> {
        self.entries.get(name).map(|entry| entry.state)
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// The registry holds no invariant that a panicking writer could break
// halfway, so a poisoned lock is still usable.
pub(crate) fn read(registry: &SharedRegistry) -> RwLockReadGuard<'_, NodeRegistry> {
    registry.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write(registry: &SharedRegistry) -> RwLockWriteGuard<'_, NodeRegistry> {
    registry.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn snapshot_names(registry: &NodeRegistry) -> Vec<String> {
        registry.snapshot().into_iter().map(|n| n.name).collect()
    }

    #[test]
    fn test_snapshot_follows_every_directory_poll() {
        let mut registry = NodeRegistry::new();
        let polls = [
            vec!["/b", "/a"],
            vec!["/a", "/c"],
            vec![],
            vec!["/z", "/a", "/m"],
        ];

        for poll in polls {
            let expected = names(&poll);
            registry.reconcile(&expected);
            assert_eq!(
                snapshot_names(&registry),
                expected.into_iter().collect::<Vec<_>>()
            );
        }
    }

    #[test]
    fn test_reconcile_reports_delta() {
        let mut registry = NodeRegistry::new();
        let delta = registry.reconcile(&names(&["/a", "/b"]));
        assert_eq!(delta.added, vec!["/a", "/b"]);
        assert!(delta.removed.is_empty());

        let delta = registry.reconcile(&names(&["/b", "/c"]));
        assert_eq!(delta.added, vec!["/c"]);
        assert_eq!(delta.removed, vec!["/a"]);

        assert!(registry.reconcile(&names(&["/b", "/c"])).is_empty());
    }

    #[test]
    fn test_new_nodes_start_unknown() {
        let mut registry = NodeRegistry::new();
        registry.reconcile(&names(&["/a"]));
        assert_eq!(registry.state_of("/a"), Some(LifecycleState::Unknown));
        assert_eq!(registry.state_of("/missing"), None);
    }

    #[test]
    fn test_failed_query_keeps_state_and_marks_stale() {
        let mut registry = NodeRegistry::new();
        registry.reconcile(&names(&["/a", "/b"]));

        let mut results = StateResults::new();
        results.insert("/a".into(), Ok(LifecycleState::Active));
        results.insert("/b".into(), Err(QueryError::Missing));
        let changes = registry.apply_states(&results);

        assert_eq!(registry.state_of("/a"), Some(LifecycleState::Active));
        assert_eq!(registry.state_of("/b"), Some(LifecycleState::Unknown));
        assert_eq!(changes.len(), 2);

        let mut results = StateResults::new();
        results.insert("/a".into(), Err(QueryError::Timeout { millis: 10 }));
        let changes = registry.apply_states(&results);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].state, LifecycleState::Active);
        assert!(snapshot[0].stale);
        assert!(matches!(&changes[..], [StateChange::Stale { node, .. }] if node == "/a"));

        // A second failure is not reported again.
        assert!(registry.apply_states(&results).is_empty());

        let mut results = StateResults::new();
        results.insert("/a".into(), Ok(LifecycleState::Active));
        assert_eq!(
            registry.apply_states(&results),
            vec![StateChange::Recovered {
                node: "/a".into(),
                state: LifecycleState::Active
            }]
        );
        assert!(!registry.snapshot()[0].stale);
    }

    #[test]
    fn test_results_for_non_members_are_ignored() {
        let mut registry = NodeRegistry::new();
        registry.reconcile(&names(&["/a"]));

        let mut results = StateResults::new();
        results.insert("/ghost".into(), Ok(LifecycleState::Active));
        assert!(registry.apply_states(&results).is_empty());
        assert!(!registry.contains("/ghost"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_removed_node_loses_state() {
        let mut registry = NodeRegistry::new();
        registry.reconcile(&names(&["/a"]));
        let mut results = StateResults::new();
        results.insert("/a".into(), Ok(LifecycleState::Inactive));
        registry.apply_states(&results);

        registry.reconcile(&names(&[]));
        registry.reconcile(&names(&["/a"]));
        assert_eq!(registry.state_of("/a"), Some(LifecycleState::Unknown));
    }
}
