//! # Lifecycle Manager
//!
//! Keeps a live view of the lifecycle nodes running in a fleet and lets an
//! operator drive their state transitions.
//!
//! ## Modules
//! - `directory`: lists the running nodes.
//! - `poller`: queries node states concurrently, one timeout per node.
//! - `registry`: membership and last confirmed states.
//! - `orchestrator`: validates and executes transition requests.
//! - `presentation`: the node table and per-row action menus.
//! - `app`: the `LifecycleManager` that owns all of the above and its timers.
//! - `runtime`: the ros2 CLI and simulated backends.
//! - `api`: the HTTP/websocket dashboard API.

pub mod api;
pub mod app;
pub mod config;
pub mod directory;
pub mod event_bus;
pub mod orchestrator;
pub mod poller;
pub mod presentation;
pub mod registry;
pub mod runtime;

pub use app::{LifecycleManager, ManagerHandle};
pub use config::{BackendKind, ManagerConfig, SettingsError};
pub use event_bus::{EventBus, ManagerEvent};
pub use orchestrator::{TransitionOrchestrator, TransitionTicket};
pub use presentation::{PresentationAdapter, PresentationError};
pub use registry::{MembershipDelta, NodeRegistry, SharedRegistry, StateChange};
