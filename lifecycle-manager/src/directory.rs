use lifecycle_protocol::{DiscoveryError, DiscoveryService};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Lists the lifecycle nodes that are currently running.
///
/// Each call is independent. A failure says nothing about membership; the
/// caller keeps whatever it knew before.
pub struct NodeDirectory<S: ?Sized> {
    service: Arc<S>,
    include_hidden: bool,
    call_timeout: Duration,
}

impl<S: DiscoveryService + ?Sized> NodeDirectory<S> {
    pub fn new(service: Arc<S>, include_hidden: bool, call_timeout: Duration) -> Self {
        Self {
            service,
            include_hidden,
            call_timeout,
        }
    }

    /// Blank names are dropped and duplicates collapse.
    pub async fn list(&self) -> Result<BTreeSet<String>, DiscoveryError> {
        let names = timeout(
            self.call_timeout,
            self.service.list_nodes(self.include_hidden),
        )
        .await
        .map_err(|_| DiscoveryError::Timeout {
            millis: self.call_timeout.as_millis() as u64,
        })??;

        Ok(names
            .into_iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect())
    }
}
