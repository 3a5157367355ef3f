//! Validates and executes operator-requested lifecycle transitions.
//!
//! A request is checked against the node's last-known state before anything
//! is sent. Accepted requests run as their own task: steps go out one at a
//! time, the first failure stops the sequence, and the outcome comes back
//! through a [`TransitionTicket`]. At most one request per node is in flight;
//! a second one is refused, not queued.
//!
//! Outcomes are never written into the registry. The next state poll is what
//! confirms the new state.

mod lease;

use crate::event_bus::{EventBus, ManagerEvent};
use crate::registry::{self, SharedRegistry};
use chrono::Utc;
use lease::{InFlightTable, NodeLease};
use lifecycle_protocol::{
    StepFailure, SubmitError, Transition, TransitionOutcome, TransitionRequest,
    TransitionService, TransitionStepError,
};
use log::{info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::time::timeout;

/// Handle on an accepted request.
#[derive(Debug)]
pub struct TransitionTicket {
    request: TransitionRequest,
    outcome: oneshot::Receiver<TransitionOutcome>,
}

impl TransitionTicket {
    pub fn request(&self) -> &TransitionRequest {
        &self.request
    }

    /// Waits for the request to finish.
    ///
    /// `None` only if the executing task was torn down with the runtime.
    pub async fn outcome(self) -> Option<TransitionOutcome> {
        self.outcome.await.ok()
    }
}

pub struct TransitionOrchestrator<S: ?Sized> {
    service: Arc<S>,
    registry: SharedRegistry,
    event_bus: EventBus,
    in_flight: Arc<InFlightTable>,
    last_seq: AtomicU64,
    call_timeout: Duration,
}

impl<S: TransitionService + ?Sized + 'static> TransitionOrchestrator<S> {
    pub fn new(
        service: Arc<S>,
        registry: SharedRegistry,
        event_bus: EventBus,
        call_timeout: Duration,
    ) -> Self {
        Self {
            service,
            registry,
            event_bus,
            in_flight: Arc::new(InFlightTable::default()),
            last_seq: AtomicU64::new(0),
            call_timeout,
        }
    }

    /// Validates `steps` for `node` and starts executing them.
    ///
    /// Rejections happen here, before the transition service is contacted.
    /// Must be called from within a tokio runtime.
    pub fn submit(
        &self,
        node: &str,
        steps: &[Transition],
    ) -> Result<TransitionTicket, SubmitError> {
        if steps.is_empty() {
            return Err(SubmitError::EmptySequence {
                node: node.to_string(),
            });
        }

        // Held until the lease is taken: a node removed from the registry is
        // cancelled after removal, so it must not be leased once gone.
        let registry = registry::read(&self.registry);
        let state = registry
            .state_of(node)
            .ok_or_else(|| SubmitError::UnknownNode {
                node: node.to_string(),
            })?;

        if let Err((step, transition)) = state.walk(steps) {
            return Err(SubmitError::IllegalTransition {
                node: node.to_string(),
                state,
                step,
                transition,
            });
        }

        let seq = self.last_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let (lease, cancelled) = self
            .in_flight
            .try_acquire(node, seq)
            .map_err(|in_flight| SubmitError::NodeBusy {
                node: node.to_string(),
                in_flight,
            })?;
        drop(registry);

        let request = TransitionRequest {
            seq,
            node: node.to_string(),
            steps: steps.to_vec(),
            submitted_at: Utc::now(),
        };
        info!(
            "Orchestrator: Request #{} for '{}' ({}): {:?}",
            seq, node, state, steps
        );
        self.event_bus.publish(ManagerEvent::TransitionSubmitted {
            request: request.clone(),
        });

        let (reply, outcome) = oneshot::channel();
        let execution = Execution {
            service: Arc::clone(&self.service),
            request: request.clone(),
            call_timeout: self.call_timeout,
            event_bus: self.event_bus.clone(),
        };
        tokio::spawn(execution.run(lease, cancelled, reply));

        Ok(TransitionTicket { request, outcome })
    }

    /// Best-effort cancellation of the request running for `node`.
    ///
    /// A remote call already on the wire is abandoned, not undone.
    pub fn cancel(&self, node: &str) -> bool {
        let cancelled = self.in_flight.cancel(node);
        if cancelled {
            info!("Orchestrator: Cancelling in-flight request for '{}'", node);
        }
        cancelled
    }

    pub fn cancel_all(&self) -> usize {
        self.in_flight.cancel_all()
    }

    /// Sequence number of the request currently running for `node`.
    pub fn in_flight(&self, node: &str) -> Option<u64> {
        self.in_flight.holder(node)
    }
}

struct Execution<S: ?Sized> {
    service: Arc<S>,
    request: TransitionRequest,
    call_timeout: Duration,
    event_bus: EventBus,
}

impl<S: TransitionService + ?Sized> Execution<S> {
    async fn run(
        self,
        lease: NodeLease,
        mut cancelled: watch::Receiver<bool>,
        reply: oneshot::Sender<TransitionOutcome>,
    ) {
        let mut completed = Vec::new();
        let mut failure = None;

        for (index, &transition) in self.request.steps.iter().enumerate() {
            match self.step(transition, &mut cancelled).await {
                Ok(()) => {
                    info!(
                        "Orchestrator: #{} '{}' {} succeeded",
                        self.request.seq, self.request.node, transition
                    );
                    completed.push(transition);
                }
                Err(error) => {
                    warn!(
                        "Orchestrator: #{} '{}' {} failed: {}",
                        self.request.seq, self.request.node, transition, error
                    );
                    failure = Some(StepFailure {
                        index,
                        transition,
                        error,
                    });
                    break;
                }
            }
        }

        // Free the node before anyone can observe the outcome.
        drop(lease);

        let outcome = TransitionOutcome {
            request: self.request,
            completed,
            failure,
            finished_at: Utc::now(),
        };
        self.event_bus.publish(ManagerEvent::TransitionCompleted {
            outcome: outcome.clone(),
        });
        // The submitter may have dropped the ticket.
        let _ = reply.send(outcome);
    }

    async fn step(
        &self,
        transition: Transition,
        cancelled: &mut watch::Receiver<bool>,
    ) -> Result<(), TransitionStepError> {
        let already_cancelled = *cancelled.borrow();
        if already_cancelled {
            return Err(TransitionStepError::Cancelled);
        }

        let call = timeout(
            self.call_timeout,
            self.service.change_state(&self.request.node, transition),
        );

        tokio::select! {
            biased;
            _ = cancellation(cancelled) => Err(TransitionStepError::Cancelled),
            result = call => match result {
                Ok(Ok(true)) => Ok(()),
                Ok(Ok(false)) => Err(TransitionStepError::Rejected),
                Ok(Err(error)) => Err(error),
                Err(_) => Err(TransitionStepError::Timeout {
                    millis: self.call_timeout.as_millis() as u64,
                }),
            },
        }
    }
}

/// Resolves once the request is cancelled. Never resolves if the sender is gone.
async fn cancellation(cancelled: &mut watch::Receiver<bool>) {
    if cancelled.wait_for(|flag| *flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::NodeRegistry;
    use async_trait::async_trait;
    use lifecycle_protocol::{LifecycleState, StateResults};
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    /// Records every call. Steps listed in `failing` return `Ok(false)`;
    /// every call takes `delay`.
    struct RecordingService {
        calls: Mutex<Vec<Transition>>,
        failing: Vec<Transition>,
        delay: Duration,
    }

    impl RecordingService {
        fn new(failing: Vec<Transition>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                failing,
                delay,
            })
        }

        fn calls(&self) -> Vec<Transition> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TransitionService for RecordingService {
        async fn change_state(
            &self,
            _node: &str,
            transition: Transition,
        ) -> Result<bool, TransitionStepError> {
            self.calls.lock().unwrap().push(transition);
            tokio::time::sleep(self.delay).await;
            Ok(!self.failing.contains(&transition))
        }
    }

    fn registry_with(node: &str, state: LifecycleState) -> SharedRegistry {
        let mut registry = NodeRegistry::new();
        registry.reconcile(&BTreeSet::from([node.to_string()]));
        let mut results = StateResults::new();
        results.insert(node.to_string(), Ok(state));
        registry.apply_states(&results);
        registry.shared()
    }

    fn orchestrator(
        service: Arc<RecordingService>,
        registry: SharedRegistry,
        call_timeout: Duration,
    ) -> TransitionOrchestrator<RecordingService> {
        TransitionOrchestrator::new(service, registry, EventBus::new(), call_timeout)
    }

    #[tokio::test]
    async fn test_illegal_first_step_is_rejected_without_calling_service() {
        let service = RecordingService::new(vec![], Duration::ZERO);
        let orch = orchestrator(
            service.clone(),
            registry_with("n", LifecycleState::Unconfigured),
            Duration::from_secs(1),
        );

        let err = orch.submit("n", &[Transition::Activate]).unwrap_err();
        assert_eq!(
            err,
            SubmitError::IllegalTransition {
                node: "n".into(),
                state: LifecycleState::Unconfigured,
                step: 0,
                transition: Transition::Activate,
            }
        );
        assert!(service.calls().is_empty());
        assert_eq!(orch.in_flight("n"), None);
    }

    #[tokio::test]
    async fn test_unknown_state_and_unknown_node_are_rejected() {
        let service = RecordingService::new(vec![], Duration::ZERO);
        let orch = orchestrator(
            service.clone(),
            registry_with("n", LifecycleState::Unknown),
            Duration::from_secs(1),
        );

        assert!(matches!(
            orch.submit("n", &[Transition::Shutdown]),
            Err(SubmitError::IllegalTransition { .. })
        ));
        assert!(matches!(
            orch.submit("other", &[Transition::Configure]),
            Err(SubmitError::UnknownNode { .. })
        ));
        assert!(matches!(
            orch.submit("n", &[]),
            Err(SubmitError::EmptySequence { .. })
        ));
        assert!(service.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_first_step_aborts_sequence() {
        let service = RecordingService::new(vec![Transition::Configure], Duration::ZERO);
        let orch = orchestrator(
            service.clone(),
            registry_with("n", LifecycleState::Unconfigured),
            Duration::from_secs(1),
        );

        let outcome = orch
            .submit("n", &[Transition::Configure, Transition::Activate])
            .unwrap()
            .outcome()
            .await
            .unwrap();

        assert_eq!(outcome.failed_step(), Some(0));
        assert_eq!(
            outcome.failure.as_ref().map(|f| &f.error),
            Some(&TransitionStepError::Rejected)
        );
        assert!(outcome.completed.is_empty());
        assert_eq!(outcome.not_attempted(), &[Transition::Activate]);
        assert_eq!(service.calls(), vec![Transition::Configure]);
    }

    #[tokio::test]
    async fn test_second_step_failure_keeps_first_step() {
        let service = RecordingService::new(vec![Transition::Cleanup], Duration::ZERO);
        let orch = orchestrator(
            service.clone(),
            registry_with("n", LifecycleState::Active),
            Duration::from_secs(1),
        );

        let outcome = orch
            .submit("n", &[Transition::Deactivate, Transition::Cleanup])
            .unwrap()
            .outcome()
            .await
            .unwrap();

        assert_eq!(outcome.completed, vec![Transition::Deactivate]);
        assert_eq!(outcome.failed_step(), Some(1));
        assert!(outcome.not_attempted().is_empty());
        assert_eq!(
            service.calls(),
            vec![Transition::Deactivate, Transition::Cleanup]
        );
    }

    #[tokio::test]
    async fn test_busy_node_rejects_then_frees() {
        let service = RecordingService::new(vec![], Duration::from_millis(100));
        let orch = orchestrator(
            service.clone(),
            registry_with("n", LifecycleState::Unconfigured),
            Duration::from_secs(1),
        );

        let first = orch.submit("n", &[Transition::Configure]).unwrap();
        let first_seq = first.request().seq;

        assert_eq!(
            orch.submit("n", &[Transition::Configure]).unwrap_err(),
            SubmitError::NodeBusy {
                node: "n".into(),
                in_flight: first_seq,
            }
        );

        assert!(first.outcome().await.unwrap().succeeded());
        assert_eq!(orch.in_flight("n"), None);

        // The registry was not written through, so the node still reads as
        // unconfigured and configure is legal again.
        let third = orch.submit("n", &[Transition::Configure]).unwrap();
        assert!(third.request().seq > first_seq);
        assert!(third.outcome().await.unwrap().succeeded());
    }

    #[tokio::test]
    async fn test_step_timeout_is_a_failure() {
        let service = RecordingService::new(vec![], Duration::from_secs(5));
        let orch = orchestrator(
            service.clone(),
            registry_with("n", LifecycleState::Inactive),
            Duration::from_millis(30),
        );

        let outcome = orch
            .submit("n", &[Transition::Activate])
            .unwrap()
            .outcome()
            .await
            .unwrap();

        assert_eq!(
            outcome.failure.map(|f| f.error),
            Some(TransitionStepError::Timeout { millis: 30 })
        );
        assert_eq!(orch.in_flight("n"), None);
    }

    #[tokio::test]
    async fn test_cancel_abandons_pending_call_and_releases_node() {
        let service = RecordingService::new(vec![], Duration::from_secs(5));
        let orch = orchestrator(
            service.clone(),
            registry_with("n", LifecycleState::Active),
            Duration::from_secs(10),
        );

        let ticket = orch
            .submit("n", &[Transition::Deactivate, Transition::Cleanup])
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(orch.cancel("n"));

        let outcome = tokio::time::timeout(Duration::from_secs(1), ticket.outcome())
            .await
            .expect("cancellation should be prompt")
            .unwrap();

        assert_eq!(outcome.failed_step(), Some(0));
        assert_eq!(
            outcome.failure.as_ref().map(|f| &f.error),
            Some(&TransitionStepError::Cancelled)
        );
        assert_eq!(service.calls(), vec![Transition::Deactivate]);
        assert_eq!(orch.in_flight("n"), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_submit_racing_node_removal_is_cancelled_or_rejected() {
        for _ in 0..200 {
            let service = RecordingService::new(vec![], Duration::from_secs(5));
            let registry = registry_with("n", LifecycleState::Inactive);
            let orch = Arc::new(orchestrator(service, registry.clone(), Duration::from_secs(10)));

            let removal = {
                let orch = Arc::clone(&orch);
                tokio::spawn(async move {
                    registry::write(&registry).reconcile(&BTreeSet::new());
                    orch.cancel("n");
                })
            };
            let submitted = orch.submit("n", &[Transition::Activate]);
            removal.await.unwrap();

            match submitted {
                Err(err) => assert!(matches!(err, SubmitError::UnknownNode { .. })),
                Ok(ticket) => {
                    let outcome = tokio::time::timeout(Duration::from_secs(1), ticket.outcome())
                        .await
                        .expect("removed node kept running")
                        .unwrap();
                    assert_eq!(
                        outcome.failure.map(|f| f.error),
                        Some(TransitionStepError::Cancelled)
                    );
                }
            }
            assert_eq!(orch.in_flight("n"), None);
        }
    }

    #[tokio::test]
    async fn test_different_nodes_run_concurrently() {
        let service = RecordingService::new(vec![], Duration::from_millis(100));
        let mut registry = NodeRegistry::new();
        registry.reconcile(&BTreeSet::from(["a".to_string(), "b".to_string()]));
        let mut results = StateResults::new();
        results.insert("a".into(), Ok(LifecycleState::Inactive));
        results.insert("b".into(), Ok(LifecycleState::Inactive));
        registry.apply_states(&results);
        let orch = orchestrator(service, registry.shared(), Duration::from_secs(1));

        let a = orch.submit("a", &[Transition::Activate]).unwrap();
        let b = orch.submit("b", &[Transition::Activate]).unwrap();
        assert_ne!(a.request().seq, b.request().seq);

        let (a, b) = tokio::join!(a.outcome(), b.outcome());
        assert!(a.unwrap().succeeded());
        assert!(b.unwrap().succeeded());
    }
}
