use crate::model::{Action, TransitionOutcome, TransitionRequest};
use crate::view::NodeRow;
use serde::{Deserialize, Serialize};

/// Body of `POST /nodes/:name/actions`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ActionRequest {
    pub action: Action,
    /// Hold the response until the request has finished.
    #[serde(default)]
    pub wait: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum ManagerResponse {
    Nodes(Vec<NodeRow>),
    Accepted(TransitionRequest),
    Completed(TransitionOutcome),
    Error(String),
}
