//! The external collaborators of the engine.
//!
//! Implement these for a real middleware (see the ros2 CLI backend), a
//! simulator, or a test double.

use crate::error::{DiscoveryError, QueryError, TransitionStepError};
use crate::model::{LifecycleState, Transition};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};

/// Per-node state query results. Every queried name maps to exactly one entry.
pub type StateResults = BTreeMap<String, Result<LifecycleState, QueryError>>;

#[async_trait]
pub trait DiscoveryService: Send + Sync {
    /// Names of the lifecycle nodes currently running.
    async fn list_nodes(&self, include_hidden: bool) -> Result<Vec<String>, DiscoveryError>;
}

#[async_trait]
pub trait StateQueryService: Send + Sync {
    /// Current state of each requested node. Names may be missing from the
    /// answer; the poller reports those as `QueryError::Missing`.
    async fn get_states(
        &self,
        names: &[String],
    ) -> HashMap<String, Result<LifecycleState, QueryError>>;
}

#[async_trait]
pub trait TransitionService: Send + Sync {
    /// Triggers one transition. `Ok(false)` means the node refused it.
    async fn change_state(
        &self,
        node: &str,
        transition: Transition,
    ) -> Result<bool, TransitionStepError>;
}

/// A backend that provides all three services.
pub trait LifecycleBackend: DiscoveryService + StateQueryService + TransitionService {}

impl<T> LifecycleBackend for T where T: DiscoveryService + StateQueryService + TransitionService {}
