//! Backends that provide the discovery, state query and transition services.

pub mod ros2;
pub mod sim;

pub use ros2::Ros2Cli;
pub use sim::SimulatedFleet;

use crate::config::{BackendKind, ManagerConfig};
use lifecycle_protocol::LifecycleBackend;
use log::info;
use std::sync::Arc;

pub fn build_backend(config: &ManagerConfig) -> Arc<dyn LifecycleBackend> {
    match config.backend {
        BackendKind::Ros2 => {
            info!("Runtime: Using '{} lifecycle'", config.ros2_executable);
            Arc::new(Ros2Cli::new(config.ros2_executable.clone()))
        }
        BackendKind::Sim => {
            info!("Runtime: Using the simulated fleet");
            Arc::new(SimulatedFleet::from_config(&config.sim))
        }
    }
}
