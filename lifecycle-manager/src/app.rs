//! # Lifecycle Manager
//!
//! The process-wide application state. It owns the registry and wires the
//! directory, the poller and the orchestrator to one backend.
//!
//! Two timers keep the registry current:
//! 1. **Directory refresh**: lists the running nodes and reconciles
//!    membership. A change in membership triggers a state refresh right away
//!    and cancels requests for nodes that left.
//! 2. **State refresh**: queries every member and overlays the results.
//!
//! Both run at the configured update frequency until the `ManagerHandle`
//! returned by `start` is shut down or dropped.

use crate::config::ManagerConfig;
use crate::directory::NodeDirectory;
use crate::event_bus::{EventBus, ManagerEvent};
use crate::orchestrator::{TransitionOrchestrator, TransitionTicket};
use crate::poller::StatePoller;
use crate::presentation::{self, PresentationAdapter};
use crate::registry::{self, MembershipDelta, NodeRegistry, SharedRegistry, StateChange};
use lifecycle_protocol::{Action, LifecycleBackend, NodeRow, NodeState, SubmitError};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

pub struct LifecycleManager<B: ?Sized> {
    registry: SharedRegistry,
    directory: NodeDirectory<B>,
    poller: StatePoller<B>,
    orchestrator: Arc<TransitionOrchestrator<B>>,
    event_bus: EventBus,
    poll_interval: Duration,
    discovery_failures: AtomicU32,
    // Held for a whole state poll so an older poll never lands after a newer one.
    state_poll: Mutex<()>,
}

impl<B: LifecycleBackend + ?Sized + 'static> LifecycleManager<B> {
    pub fn new(backend: Arc<B>, config: &ManagerConfig) -> Self {
        let registry = NodeRegistry::new().shared();
        let event_bus = EventBus::new();
        let call_timeout = config.call_timeout();

        Self {
            directory: NodeDirectory::new(
                Arc::clone(&backend),
                config.include_hidden,
                call_timeout,
            ),
            poller: StatePoller::new(Arc::clone(&backend), call_timeout),
            orchestrator: Arc::new(TransitionOrchestrator::new(
                backend,
                registry.clone(),
                event_bus.clone(),
                call_timeout,
            )),
            registry,
            event_bus,
            poll_interval: config.poll_interval(),
            discovery_failures: AtomicU32::new(0),
            state_poll: Mutex::new(()),
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Arc<TransitionOrchestrator<B>> {
        &self.orchestrator
    }

    pub fn snapshot(&self) -> Vec<NodeState> {
        registry::read(&self.registry).snapshot()
    }

    pub fn rows(&self) -> Vec<NodeRow> {
        presentation::render(&self.snapshot())
    }

    /// A table view over the current snapshot.
    pub fn presentation(&self) -> PresentationAdapter<B> {
        let mut adapter = PresentationAdapter::new(Arc::clone(&self.orchestrator));
        adapter.refresh(&self.snapshot());
        adapter
    }

    pub fn submit(&self, node: &str, action: Action) -> Result<TransitionTicket, SubmitError> {
        self.orchestrator.submit(node, action.steps())
    }

    /// One directory poll.
    ///
    /// On failure membership is left untouched and `None` is returned; the
    /// next tick retries.
    pub async fn refresh_directory(&self) -> Option<MembershipDelta> {
        let names = match self.directory.list().await {
            Ok(names) => names,
            Err(e) => {
                let consecutive = self.discovery_failures.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "Manager: Discovery failed ({} in a row), keeping {} known nodes: {}",
                    consecutive,
                    registry::read(&self.registry).len(),
                    e
                );
                self.event_bus.publish(ManagerEvent::DiscoveryFailed {
                    error: e.to_string(),
                    consecutive,
                });
                return None;
            }
        };

        let failures = self.discovery_failures.swap(0, Ordering::Relaxed);
        if failures > 0 {
            info!("Manager: Discovery recovered after {} failed polls", failures);
        }

        let delta = registry::write(&self.registry).reconcile(&names);
        for node in &delta.removed {
            self.orchestrator.cancel(node);
            self.event_bus
                .publish(ManagerEvent::NodeRemoved { node: node.clone() });
        }
        for node in &delta.added {
            self.event_bus
                .publish(ManagerEvent::NodeDiscovered { node: node.clone() });
        }
        Some(delta)
    }

    /// One state poll over the current membership.
    ///
    /// Polls are serialized: a poll started while another is running waits
    /// for it, then samples the nodes itself.
    pub async fn refresh_states(&self) -> Vec<StateChange> {
        let _poll = self.state_poll.lock().await;
        let names = registry::read(&self.registry).names();
        if names.is_empty() {
            return Vec::new();
        }

        let results = self.poller.query(&names).await;
        let changes = registry::write(&self.registry).apply_states(&results);

        for change in &changes {
            let event = match change {
                StateChange::Changed { node, from, to } => {
                    info!("Manager: '{}' {} -> {}", node, from, to);
                    ManagerEvent::StateChanged {
                        node: node.clone(),
                        from: *from,
                        to: *to,
                    }
                }
                StateChange::Stale { node, error } => ManagerEvent::QueryFailed {
                    node: node.clone(),
                    error: error.to_string(),
                },
                StateChange::Recovered { node, state } => ManagerEvent::NodeRecovered {
                    node: node.clone(),
                    state: *state,
                },
            };
            self.event_bus.publish(event);
        }
        changes
    }

    /// Spawns the directory and state timers.
    pub fn start(self: Arc<Self>) -> ManagerHandle<B> {
        info!(
            "Manager: Starting timers every {:?}",
            self.poll_interval
        );

        let directory_task = tokio::spawn({
            let manager = Arc::clone(&self);
            async move { manager.directory_loop().await }
        });
        let state_task = tokio::spawn({
            let manager = Arc::clone(&self);
            async move { manager.state_loop().await }
        });

        ManagerHandle {
            manager: self,
            tasks: vec![directory_task, state_task],
        }
    }

    async fn directory_loop(&self) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Some(delta) = self.refresh_directory().await {
                if !delta.is_empty() {
                    debug!(
                        "Manager: Membership changed (+{} -{}), refreshing states",
                        delta.added.len(),
                        delta.removed.len()
                    );
                    self.refresh_states().await;
                }
            }
        }
    }

    async fn state_loop(&self) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.refresh_states().await;
        }
    }
}

/// Owns the timer tasks. Dropping it stops them and cancels every
/// in-flight transition request.
pub struct ManagerHandle<B: LifecycleBackend + ?Sized + 'static> {
    manager: Arc<LifecycleManager<B>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<B: LifecycleBackend + ?Sized + 'static> ManagerHandle<B> {
    pub fn manager(&self) -> &Arc<LifecycleManager<B>> {
        &self.manager
    }

    /// Stops both timers and waits for them to wind down.
    pub async fn shutdown(mut self) {
        let tasks = self.stop();
        for task in tasks {
            // Aborted tasks resolve to a cancellation error.
            let _ = task.await;
        }
        info!("Manager: Stopped");
    }

    fn stop(&mut self) -> Vec<JoinHandle<()>> {
        let tasks = std::mem::take(&mut self.tasks);
        for task in &tasks {
            task.abort();
        }
        let cancelled = self.manager.orchestrator.cancel_all();
        if cancelled > 0 {
            info!("Manager: Cancelled {} in-flight requests", cancelled);
        }
        tasks
    }
}

impl<B: LifecycleBackend + ?Sized + 'static> Drop for ManagerHandle<B> {
    fn drop(&mut self) {
        self.stop();
    }
}
