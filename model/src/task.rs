use crate::cluster::{ClusterSnapshot, ClusterState};
use crate::load_balancer::LoadBalancerSnapshot;
use crate::workflow::Workflow;
use serde::{Deserialize, Serialize};

/// A unit of work for one cluster handed out by the task store. The store never hands out a second
/// task for a cluster while one is outstanding.
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    /// Name of the config (project) the cluster belongs to.
    pub config: String,
    pub cluster: String,
    /// The state last committed for the cluster, `None` if nothing has been built yet.
    #[serde(default)]
    pub current: Option<ClusterState>,
    pub event: TaskEvent,
    #[serde(default)]
    pub workflow: Workflow,
}

#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TaskEvent {
    Create { desired: ClusterState },
    Update(UpdateEvent),
    Delete(DeleteEvent),
}

impl TaskEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TaskEvent::Create { .. } => "create",
            TaskEvent::Update(UpdateEvent::ApiEndpoint { .. }) => "update (api endpoint)",
            TaskEvent::Update(UpdateEvent::State { .. }) => "update",
            TaskEvent::Delete(DeleteEvent::Nodes { .. }) => "delete (nodes)",
            TaskEvent::Delete(DeleteEvent::Cluster) => "delete",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
#[serde(tag = "variant", rename_all = "camelCase")]
pub enum UpdateEvent {
    /// Move the api endpoint to `node` of `nodepool` and nothing else.
    ApiEndpoint { nodepool: String, node: String },
    /// Reconcile the cluster towards `desired`.
    #[serde(rename_all = "camelCase")]
    State {
        desired: ClusterState,
        #[serde(default)]
        deleted_load_balancers: Vec<LoadBalancerSnapshot>,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
#[serde(tag = "variant", rename_all = "camelCase")]
pub enum DeleteEvent {
    /// Remove the nodes that `desired` no longer has.
    Nodes { desired: ClusterSnapshot },
    /// Remove the whole cluster.
    Cluster,
}
