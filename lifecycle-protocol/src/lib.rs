//! # Lifecycle Protocol
//!
//! Types shared between the lifecycle manager engine, its backends, the
//! dashboard API and the controller CLI.
//!
//! ## Modules
//! - `model`: lifecycle states, transitions, operator actions and the state machine table.
//! - `error`: discovery, query, submit and step errors.
//! - `service`: traits for the discovery, state query and transition services.
//! - `view`: the two column row model with per-row action menus.
//! - `messages`: request/response payloads of the dashboard API.

pub mod error;
pub mod messages;
pub mod model;
pub mod service;
pub mod view;

pub use error::{DiscoveryError, QueryError, SubmitError, TransitionStepError};
pub use messages::{ActionRequest, ManagerResponse};
pub use model::{
    Action, LifecycleState, NodeState, StepFailure, Transition, TransitionOutcome,
    TransitionRequest,
};
pub use service::{
    DiscoveryService, LifecycleBackend, StateQueryService, StateResults, TransitionService,
};
pub use view::{NodeRow, StatusIcon};
