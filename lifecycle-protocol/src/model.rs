use crate::error::TransitionStepError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a managed node.
///
/// `Unknown` is not a lifecycle state: it marks a node that was discovered
/// but whose state has never been confirmed by a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Unconfigured,
    Inactive,
    Active,
    Finalized,
    #[default]
    Unknown,
}

impl LifecycleState {
    pub const fn label(self) -> &'static str {
        match self {
            LifecycleState::Unconfigured => "unconfigured",
            LifecycleState::Inactive => "inactive",
            LifecycleState::Active => "active",
            LifecycleState::Finalized => "finalized",
            LifecycleState::Unknown => "unknown",
        }
    }

    /// Parses one of the four primary state labels.
    ///
    /// Transitional states ("configuring", "activating", ...) and anything else
    /// return `None`; callers treat that as a malformed response.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "unconfigured" => Some(LifecycleState::Unconfigured),
            "inactive" => Some(LifecycleState::Inactive),
            "active" => Some(LifecycleState::Active),
            "finalized" => Some(LifecycleState::Finalized),
            _ => None,
        }
    }

    pub fn is_known(self) -> bool {
        self != LifecycleState::Unknown
    }

    /// The state machine table. Every legality decision, including the
    /// action menus, is derived from this function.
    pub const fn after(self, transition: Transition) -> Option<LifecycleState> {
        use LifecycleState::*;
        match (self, transition) {
            (Unconfigured, Transition::Configure) => Some(Inactive),
            (Inactive, Transition::Activate) => Some(Active),
            (Active, Transition::Deactivate) => Some(Inactive),
            (Inactive, Transition::Cleanup) => Some(Unconfigured),
            (Unconfigured | Inactive | Active, Transition::Shutdown) => Some(Finalized),
            _ => None,
        }
    }

    /// Walks `steps` through the state machine starting at `self`.
    ///
    /// Returns the expected final state, or the index and transition of the
    /// first step that is not legal from the state reached before it.
    pub fn walk(self, steps: &[Transition]) -> Result<LifecycleState, (usize, Transition)> {
        steps
            .iter()
            .enumerate()
            .try_fold(self, |state, (index, &step)| {
                state.after(step).ok_or((index, step))
            })
    }

    /// Operator actions legal from this state, in menu order.
    pub fn actions(self) -> Vec<Action> {
        Action::ALL
            .iter()
            .copied()
            .filter(|action| self.walk(action.steps()).is_ok())
            .collect()
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single lifecycle transition as understood by the transition service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Configure,
    Activate,
    Deactivate,
    Cleanup,
    Shutdown,
}

impl Transition {
    pub const fn label(self) -> &'static str {
        match self {
            Transition::Configure => "configure",
            Transition::Activate => "activate",
            Transition::Deactivate => "deactivate",
            Transition::Cleanup => "cleanup",
            Transition::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Transition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "configure" => Ok(Transition::Configure),
            "activate" => Ok(Transition::Activate),
            "deactivate" => Ok(Transition::Deactivate),
            "cleanup" => Ok(Transition::Cleanup),
            "shutdown" => Ok(Transition::Shutdown),
            other => Err(format!("unknown transition '{}'", other)),
        }
    }
}

/// An entry of the per-node action menu. Combined actions expand to
/// more than one transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Configure,
    ConfigureAndActivate,
    Activate,
    Cleanup,
    Deactivate,
    DeactivateAndCleanup,
    Shutdown,
}

impl Action {
    pub const ALL: [Action; 7] = [
        Action::Configure,
        Action::ConfigureAndActivate,
        Action::Activate,
        Action::Cleanup,
        Action::Deactivate,
        Action::DeactivateAndCleanup,
        Action::Shutdown,
    ];

    pub const fn steps(self) -> &'static [Transition] {
        match self {
            Action::Configure => &[Transition::Configure],
            Action::ConfigureAndActivate => &[Transition::Configure, Transition::Activate],
            Action::Activate => &[Transition::Activate],
            Action::Cleanup => &[Transition::Cleanup],
            Action::Deactivate => &[Transition::Deactivate],
            Action::DeactivateAndCleanup => &[Transition::Deactivate, Transition::Cleanup],
            Action::Shutdown => &[Transition::Shutdown],
        }
    }

    /// Menu text.
    pub const fn label(self) -> &'static str {
        match self {
            Action::Configure => "Configure",
            Action::ConfigureAndActivate => "Configure and Activate",
            Action::Activate => "Activate",
            Action::Cleanup => "Cleanup",
            Action::Deactivate => "Deactivate",
            Action::DeactivateAndCleanup => "Deactivate and cleanup",
            Action::Shutdown => "Shutdown",
        }
    }

    /// State the node ends up in when every step succeeds.
    pub const fn target(self) -> LifecycleState {
        match self {
            Action::Configure | Action::Deactivate => LifecycleState::Inactive,
            Action::ConfigureAndActivate | Action::Activate => LifecycleState::Active,
            Action::Cleanup | Action::DeactivateAndCleanup => LifecycleState::Unconfigured,
            Action::Shutdown => LifecycleState::Finalized,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        match normalized.as_str() {
            "configure" => Ok(Action::Configure),
            "configure-and-activate" => Ok(Action::ConfigureAndActivate),
            "activate" => Ok(Action::Activate),
            "cleanup" => Ok(Action::Cleanup),
            "deactivate" => Ok(Action::Deactivate),
            "deactivate-and-cleanup" => Ok(Action::DeactivateAndCleanup),
            "shutdown" => Ok(Action::Shutdown),
            _ => Err(format!("unknown action '{}'", s)),
        }
    }
}

/// Snapshot of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    pub name: String,
    pub state: LifecycleState,
    /// The most recent state query for this node failed; `state` is the
    /// last confirmed value.
    pub stale: bool,
}

impl NodeState {
    pub fn new(name: impl Into<String>, state: LifecycleState) -> Self {
        Self {
            name: name.into(),
            state,
            stale: false,
        }
    }
}

/// An accepted operator intent for one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub seq: u64,
    pub node: String,
    pub steps: Vec<Transition>,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub index: usize,
    pub transition: Transition,
    pub error: TransitionStepError,
}

/// Result of executing a `TransitionRequest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub request: TransitionRequest,
    pub completed: Vec<Transition>,
    pub failure: Option<StepFailure>,
    pub finished_at: DateTime<Utc>,
}

impl TransitionOutcome {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    pub fn failed_step(&self) -> Option<usize> {
        self.failure.as_ref().map(|f| f.index)
    }

    /// Steps that were never dispatched because an earlier one failed.
    pub fn not_attempted(&self) -> &[Transition] {
        match &self.failure {
            Some(failure) => &self.request.steps[failure.index + 1..],
            None => &[],
        }
    }
}
