use futures::future::join_all;
use lifecycle_protocol::{LifecycleState, QueryError, StateQueryService, StateResults};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Queries the lifecycle state of a set of nodes.
///
/// Every node is queried on its own, concurrently and under its own timeout,
/// so one unreachable node never delays or hides the others.
pub struct StatePoller<S: ?Sized> {
    service: Arc<S>,
    call_timeout: Duration,
}

impl<S: StateQueryService + ?Sized> StatePoller<S> {
    pub fn new(service: Arc<S>, call_timeout: Duration) -> Self {
        Self {
            service,
            call_timeout,
        }
    }

    /// The result holds exactly one entry per requested name.
    pub async fn query(&self, names: &BTreeSet<String>) -> StateResults {
        join_all(names.iter().map(|name| self.query_one(name)))
            .await
            .into_iter()
            .collect()
    }

    async fn query_one(&self, name: &str) -> (String, Result<LifecycleState, QueryError>) {
        let request = [name.to_string()];
        let result = match timeout(self.call_timeout, self.service.get_states(&request)).await {
            Ok(mut states) => states.remove(name).unwrap_or(Err(QueryError::Missing)),
            Err(_) => Err(QueryError::Timeout {
                millis: self.call_timeout.as_millis() as u64,
            }),
        };
        (name.to_string(), result)
    }
}
