//! Error taxonomy shared by the engine, its backends and its API.
//!
//! None of these are fatal. Discovery and query errors are absorbed by the
//! polling loops and retried on the next tick; submit and step errors are
//! reported back to the operator.

use crate::model::{LifecycleState, Transition};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The directory service could not produce a node list.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("discovery service unavailable: {0}")]
    Unavailable(String),

    #[error("discovery timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("malformed discovery response: {0}")]
    Malformed(String),
}

/// The state of a single node could not be retrieved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("state service unavailable: {0}")]
    Unavailable(String),

    #[error("state query timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("malformed state response: {0}")]
    Malformed(String),

    /// The service answered but did not mention the node.
    #[error("no state reported for node")]
    Missing,
}

/// A remote transition call did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TransitionStepError {
    /// The node answered and refused the transition.
    #[error("transition rejected by node")]
    Rejected,

    #[error("transition service error: {0}")]
    Service(String),

    #[error("transition timed out after {millis}ms")]
    Timeout { millis: u64 },

    /// The node left the directory, or the manager shut down, mid-request.
    #[error("request cancelled")]
    Cancelled,
}

/// A transition request refused before anything was dispatched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("no transitions requested for '{node}'")]
    EmptySequence { node: String },

    #[error("node '{node}' is not known")]
    UnknownNode { node: String },

    #[error("'{transition}' (step {step}) is not legal for '{node}' in state {state}")]
    IllegalTransition {
        node: String,
        state: LifecycleState,
        step: usize,
        transition: Transition,
    },

    #[error("node '{node}' is busy with request #{in_flight}")]
    NodeBusy { node: String, in_flight: u64 },
}
