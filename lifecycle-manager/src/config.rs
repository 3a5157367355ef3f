use config::{Config, ConfigBuilder, Environment, File};
use config::builder::DefaultState;
use lifecycle_protocol::{LifecycleState, Transition};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "lifecycle-manager";

/// Prefix of environment overrides, e.g. `LCM__API_PORT=3001`.
pub const ENV_PREFIX: &str = "LCM";

/// Bounds on the timer period derived from `update_freq_hz`.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Shell out to the `ros2 lifecycle` command line tools.
    #[default]
    Ros2,
    /// In-memory fleet described by the `[sim]` section.
    Sim,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ManagerConfig {
    pub api_port: u16,
    pub log_level: String,

    // Polling
    pub update_freq_hz: f64,
    pub call_timeout_ms: u64,
    pub include_hidden: bool,

    pub backend: BackendKind,
    pub ros2_executable: String,
    pub sim: SimConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            api_port: 3000,
            log_level: "info".to_string(),

            update_freq_hz: 1.0,
            call_timeout_ms: 2000,
            include_hidden: false,

            backend: BackendKind::Ros2,
            ros2_executable: "ros2".to_string(),
            sim: SimConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct SimConfig {
    /// Delay added to every simulated call.
    pub latency_ms: u64,
    /// Extra delay added to transition calls only.
    pub transition_latency_ms: u64,
    pub nodes: Vec<SimNodeConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SimNodeConfig {
    pub name: String,
    #[serde(default = "default_sim_state")]
    pub state: LifecycleState,
    /// State queries and transitions against this node fail.
    #[serde(default)]
    pub unreachable: bool,
    /// Transitions this node refuses.
    #[serde(default)]
    pub reject: Vec<Transition>,
}

fn default_sim_state() -> LifecycleState {
    LifecycleState::Unconfigured
}

impl ManagerConfig {
    /// Defaults, then the config file, then `LCM__*` environment variables.
    ///
    /// An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let file = match path {
            Some(p) => File::from(p),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let builder = Config::builder().add_source(file).add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        );
        Self::from_builder(builder)
    }

    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, SettingsError> {
        let config: ManagerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if interval_for(self.update_freq_hz).is_none() {
            return Err(SettingsError::Invalid(format!(
                "update_freq_hz must give a poll interval between {:?} and {:?}, got {}",
                MIN_POLL_INTERVAL, MAX_POLL_INTERVAL, self.update_freq_hz
            )));
        }
        if self.call_timeout_ms == 0 {
            return Err(SettingsError::Invalid(
                "call_timeout_ms must be positive".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for node in &self.sim.nodes {
            if node.name.trim().is_empty() {
                return Err(SettingsError::Invalid("sim node with empty name".to_string()));
            }
            if !node.state.is_known() {
                return Err(SettingsError::Invalid(format!(
                    "sim node '{}' must start in a lifecycle state",
                    node.name
                )));
            }
            if !seen.insert(node.name.as_str()) {
                return Err(SettingsError::Invalid(format!(
                    "duplicate sim node '{}'",
                    node.name
                )));
            }
        }
        Ok(())
    }

    /// Falls back to one second for a rate `validate` would reject.
    pub fn poll_interval(&self) -> Duration {
        interval_for(self.update_freq_hz).unwrap_or(DEFAULT_POLL_INTERVAL)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

fn interval_for(freq_hz: f64) -> Option<Duration> {
    if !freq_hz.is_finite() || freq_hz <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(1.0 / freq_hz)
        .ok()
        .filter(|interval| (MIN_POLL_INTERVAL..=MAX_POLL_INTERVAL).contains(interval))
}
