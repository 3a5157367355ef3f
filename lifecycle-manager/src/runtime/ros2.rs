use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use lifecycle_protocol::{
    DiscoveryError, DiscoveryService, LifecycleState, QueryError, StateQueryService,
    Transition, TransitionService, TransitionStepError,
};
use log::debug;
use std::collections::HashMap;
use std::process::Output;
use tokio::process::Command;

/// Talks to ROS 2 lifecycle nodes through the `ros2 lifecycle` command line.
///
/// Every call spawns one process. Timeouts are applied by the engine; a call
/// that is abandoned kills its child process.
pub struct Ros2Cli {
    executable: String,
}

impl Ros2Cli {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        debug!("Ros2: {} lifecycle {}", self.executable, args.join(" "));
        Command::new(&self.executable)
            .arg("lifecycle")
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run '{}'", self.executable))
    }

    /// Stdout of a command that must exit successfully.
    async fn lifecycle(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args).await?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            bail!("'lifecycle {}' exited with {}: {}", args.join(" "), output.status, detail);
        }
        Ok(stdout)
    }

    async fn get_one(&self, node: &str) -> Result<LifecycleState, QueryError> {
        let stdout = self
            .lifecycle(&["get", node])
            .await
            .map_err(|e| QueryError::Unavailable(format!("{:#}", e)))?;
        parse_state(&stdout)
    }
}

/// One node name per line.
pub fn parse_node_list(stdout: &str) -> Result<Vec<String>, DiscoveryError> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            if line.starts_with('/') {
                Ok(line.to_string())
            } else {
                Err(DiscoveryError::Malformed(line.to_string()))
            }
        })
        .collect()
}

/// Parses `"<label> [<id>]"`, e.g. `"active [3]"`.
pub fn parse_state(stdout: &str) -> Result<LifecycleState, QueryError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| QueryError::Malformed("empty reply".to_string()))?;

    let label = match line.split_once('[') {
        Some((label, id)) if id.trim_end().ends_with(']') => label,
        _ => line,
    };
    LifecycleState::from_label(label).ok_or_else(|| QueryError::Malformed(line.to_string()))
}

pub fn parse_transition_reply(stdout: &str) -> Result<bool, TransitionStepError> {
    let reply = stdout.trim();
    if reply.contains("Transitioning successful") {
        Ok(true)
    } else if reply.contains("Transitioning failed")
        || reply.starts_with("Unknown transition requested")
    {
        Ok(false)
    } else if reply.is_empty() {
        Err(TransitionStepError::Service("empty reply".to_string()))
    } else {
        Err(TransitionStepError::Service(reply.to_string()))
    }
}

#[async_trait]
impl DiscoveryService for Ros2Cli {
    async fn list_nodes(&self, include_hidden: bool) -> Result<Vec<String>, DiscoveryError> {
        let args: &[&str] = if include_hidden {
            &["nodes", "-a"]
        } else {
            &["nodes"]
        };
        let stdout = self
            .lifecycle(args)
            .await
            .map_err(|e| DiscoveryError::Unavailable(format!("{:#}", e)))?;
        parse_node_list(&stdout)
    }
}

#[async_trait]
impl StateQueryService for Ros2Cli {
    async fn get_states(
        &self,
        names: &[String],
    ) -> HashMap<String, Result<LifecycleState, QueryError>> {
        let results = join_all(names.iter().map(|name| self.get_one(name))).await;
        names.iter().cloned().zip(results).collect()
    }
}

#[async_trait]
impl TransitionService for Ros2Cli {
    async fn change_state(
        &self,
        node: &str,
        transition: Transition,
    ) -> Result<bool, TransitionStepError> {
        // A refused transition may exit non-zero, so the reply is read first.
        let output = self
            .run(&["set", node, transition.label()])
            .await
            .map_err(|e| TransitionStepError::Service(format!("{:#}", e)))?;
        match parse_transition_reply(&String::from_utf8_lossy(&output.stdout)) {
            Err(_) if !output.status.success() => Err(TransitionStepError::Service(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            )),
            reply => reply,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_node_list() {
        let nodes = parse_node_list("/camera\n\n  /lidar  \n").unwrap();
        assert_eq!(nodes, vec!["/camera", "/lidar"]);
        assert_eq!(parse_node_list("").unwrap(), Vec::<String>::new());
        assert!(matches!(
            parse_node_list("/camera\nWARNING: daemon not running"),
            Err(DiscoveryError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_state() {
        assert_eq!(parse_state("active [3]\n"), Ok(LifecycleState::Active));
        assert_eq!(parse_state("unconfigured [1]"), Ok(LifecycleState::Unconfigured));
        assert_eq!(parse_state("finalized"), Ok(LifecycleState::Finalized));
        assert!(matches!(parse_state("configuring [10]"), Err(QueryError::Malformed(_))));
        assert!(matches!(parse_state("  \n"), Err(QueryError::Malformed(_))));
    }

    #[test]
    fn test_parse_transition_reply() {
        assert_eq!(parse_transition_reply("Transitioning successful\n"), Ok(true));
        assert_eq!(parse_transition_reply("Transitioning failed"), Ok(false));
        assert_eq!(
            parse_transition_reply("Unknown transition requested, available ones are:\n- shutdown [7]"),
            Ok(false)
        );
        assert!(matches!(
            parse_transition_reply("Node not found"),
            Err(TransitionStepError::Service(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_executable_is_an_error_value() {
        let cli = Ros2Cli::new("/nonexistent/ros2");
        assert!(matches!(
            cli.list_nodes(false).await,
            Err(DiscoveryError::Unavailable(_))
        ));
        let states = cli.get_states(&["/a".to_string()]).await;
        assert!(matches!(states["/a"], Err(QueryError::Unavailable(_))));
    }
}
