use crate::config::SimConfig;
use async_trait::async_trait;
use lifecycle_protocol::{
    DiscoveryError, DiscoveryService, LifecycleState, QueryError, StateQueryService,
    Transition, TransitionService, TransitionStepError,
};
use log::{debug, info};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

struct SimNode {
    state: LifecycleState,
    unreachable: bool,
    reject: Vec<Transition>,
}

/// An in-memory fleet of lifecycle nodes.
///
/// Nodes follow the same state machine as the engine. Latency and failures
/// can be injected per fleet and per node, which makes this the backend for
/// demos and tests.
pub struct SimulatedFleet {
    nodes: Mutex<BTreeMap<String, SimNode>>,
    latency: Duration,
    transition_latency: Duration,
    discovery_down: AtomicBool,
    transition_calls: Mutex<Vec<(String, Transition)>>,
}

impl Default for SimulatedFleet {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedFleet {
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(BTreeMap::new()),
            latency: Duration::ZERO,
            transition_latency: Duration::ZERO,
            discovery_down: AtomicBool::new(false),
            transition_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(config: &SimConfig) -> Self {
        let fleet = Self::new()
            .with_latency(Duration::from_millis(config.latency_ms))
            .with_transition_latency(Duration::from_millis(config.transition_latency_ms));
        for node in &config.nodes {
            fleet.nodes().insert(
                node.name.clone(),
                SimNode {
                    state: node.state,
                    unreachable: node.unreachable,
                    reject: node.reject.clone(),
                },
            );
        }
        info!("Sim: Fleet of {} nodes", config.nodes.len());
        fleet
    }

    /// Delay applied to every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Extra delay applied to transition calls.
    pub fn with_transition_latency(mut self, latency: Duration) -> Self {
        self.transition_latency = latency;
        self
    }

    fn nodes(&self) -> MutexGuard<'_, BTreeMap<String, SimNode>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts (or restarts) a node in `state`.
    pub fn add_node(&self, name: &str, state: LifecycleState) {
        self.nodes().insert(
            name.to_string(),
            SimNode {
                state,
                unreachable: false,
                reject: Vec::new(),
            },
        );
    }

    pub fn remove_node(&self, name: &str) -> bool {
        self.nodes().remove(name).is_some()
    }

    /// Changes a node's state behind the engine's back.
    pub fn set_state(&self, name: &str, state: LifecycleState) {
        if let Some(node) = self.nodes().get_mut(name) {
            node.state = state;
        }
    }

    pub fn set_unreachable(&self, name: &str, unreachable: bool) {
        if let Some(node) = self.nodes().get_mut(name) {
            node.unreachable = unreachable;
        }
    }

    pub fn reject(&self, name: &str, transition: Transition) {
        if let Some(node) = self.nodes().get_mut(name) {
            node.reject.push(transition);
        }
    }

    pub fn set_discovery_down(&self, down: bool) {
        self.discovery_down.store(down, Ordering::Relaxed);
    }

    pub fn state(&self, name: &str) -> Option<LifecycleState> {
        self.nodes().get(name).map(|node| node.state)
    }

    /// Every transition call received, in order.
    pub fn transition_calls(&self) -> Vec<(String, Transition)> {
        self.transition_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn is_hidden(name: &str) -> bool {
    name.rsplit('/')
        .next()
        .is_some_and(|segment| segment.starts_with('_'))
}

#[async_trait]
impl DiscoveryService for SimulatedFleet {
    async fn list_nodes(&self, include_hidden: bool) -> Result<Vec<String>, DiscoveryError> {
        tokio::time::sleep(self.latency).await;
        if self.discovery_down.load(Ordering::Relaxed) {
            return Err(DiscoveryError::Unavailable(
                "simulated discovery outage".to_string(),
            ));
        }
        Ok(self
            .nodes()
            .keys()
            .filter(|name| include_hidden || !is_hidden(name))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl StateQueryService for SimulatedFleet {
    async fn get_states(
        &self,
        names: &[String],
    ) -> HashMap<String, Result<LifecycleState, QueryError>> {
        tokio::time::sleep(self.latency).await;
        let nodes = self.nodes();
        names
            .iter()
            .filter_map(|name| {
                let node = nodes.get(name)?;
                let result = if node.unreachable {
                    Err(QueryError::Unavailable(format!("'{}' does not answer", name)))
                } else {
                    Ok(node.state)
                };
                Some((name.clone(), result))
            })
            .collect()
    }
}

#[async_trait]
impl TransitionService for SimulatedFleet {
    async fn change_state(
        &self,
        node: &str,
        transition: Transition,
    ) -> Result<bool, TransitionStepError> {
        self.transition_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((node.to_string(), transition));
        tokio::time::sleep(self.latency + self.transition_latency).await;

        let mut nodes = self.nodes();
        let Some(sim) = nodes.get_mut(node) else {
            return Err(TransitionStepError::Service(format!(
                "node '{}' not found",
                node
            )));
        };
        if sim.unreachable {
            return Err(TransitionStepError::Service(format!(
                "'{}' does not answer",
                node
            )));
        }
        if sim.reject.contains(&transition) {
            debug!("Sim: '{}' refuses {}", node, transition);
            return Ok(false);
        }
        match sim.state.after(transition) {
            Some(next) => {
                debug!("Sim: '{}' {} -> {}", node, sim.state, next);
                sim.state = next;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimNodeConfig;

    #[tokio::test]
    async fn test_hidden_nodes_are_filtered() {
        let fleet = SimulatedFleet::new();
        fleet.add_node("/camera", LifecycleState::Active);
        fleet.add_node("/ns/_hidden", LifecycleState::Active);

        assert_eq!(fleet.list_nodes(false).await.unwrap(), vec!["/camera"]);
        assert_eq!(fleet.list_nodes(true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_transitions_follow_state_machine() {
        let fleet = SimulatedFleet::new();
        fleet.add_node("/a", LifecycleState::Unconfigured);

        assert_eq!(fleet.change_state("/a", Transition::Activate).await, Ok(false));
        assert_eq!(fleet.change_state("/a", Transition::Configure).await, Ok(true));
        assert_eq!(fleet.state("/a"), Some(LifecycleState::Inactive));
        assert!(matches!(
            fleet.change_state("/ghost", Transition::Configure).await,
            Err(TransitionStepError::Service(_))
        ));
        assert_eq!(fleet.transition_calls().len(), 3);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let fleet = SimulatedFleet::from_config(&SimConfig {
            latency_ms: 0,
            transition_latency_ms: 0,
            nodes: vec![
                SimNodeConfig {
                    name: "/a".into(),
                    state: LifecycleState::Inactive,
                    unreachable: false,
                    reject: vec![Transition::Activate],
                },
                SimNodeConfig {
                    name: "/b".into(),
                    state: LifecycleState::Inactive,
                    unreachable: true,
                    reject: vec![],
                },
            ],
        });

        assert_eq!(fleet.change_state("/a", Transition::Activate).await, Ok(false));
        assert_eq!(fleet.state("/a"), Some(LifecycleState::Inactive));

        let states = fleet
            .get_states(&["/a".to_string(), "/b".to_string(), "/c".to_string()])
            .await;
        assert_eq!(states["/a"], Ok(LifecycleState::Inactive));
        assert!(states["/b"].is_err());
        assert!(!states.contains_key("/c"));

        fleet.set_discovery_down(true);
        assert!(fleet.list_nodes(false).await.is_err());
    }
}
