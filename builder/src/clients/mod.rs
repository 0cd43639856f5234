/*!

This module provides the clients that the builder uses to talk to the external engines and to the
task store.

Each collaborator is a trait so that fake implementations can be injected into the [`Builder`] and
[`Dispatcher`] for testing. In practice you will use [`HttpEngineClient`] and [`HttpTaskStore`],
which talk JSON over HTTP.

!*/

mod error;
mod http_status_code;
mod implementation;

pub use error::{EngineError, EngineResult, ErrorMessage, StoreError, StoreResult};
pub use http_status_code::{HttpStatusCode, StatusCode};
pub use implementation::{HttpEngineClient, HttpTaskStore};

use reconciler_model::{ClusterSnapshot, ClusterState, LoadBalancerSnapshot, Task, Workflow};
use serde::{Deserialize, Serialize};

/// The four states the infrastructure engine works with. The same shape is returned on success
/// and on partial failure; on failure it describes what was actually reached.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureState {
    pub current: Option<ClusterSnapshot>,
    pub desired: Option<ClusterSnapshot>,
    #[serde(default)]
    pub current_load_balancers: Vec<LoadBalancerSnapshot>,
    #[serde(default)]
    pub desired_load_balancers: Vec<LoadBalancerSnapshot>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
#[serde(tag = "outcome", content = "state", rename_all = "camelCase")]
pub enum InfrastructureOutcome {
    /// All resources for the desired state exist.
    Built(InfrastructureState),
    /// Only some resources could be created or destroyed.
    Failed(InfrastructureState),
}

/// The answer of a safe delete. A failure still carries the cluster as far as the engine got, that
/// is without the nodes it removed before it stopped.
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum NodeDeletionOutcome {
    Deleted {
        cluster: ClusterSnapshot,
    },
    Failed {
        cluster: ClusterSnapshot,
        reason: String,
    },
}

/// Realizes and destroys compute, network and load balancer resources.
#[async_trait::async_trait]
pub trait InfrastructureEngine: Send + Sync {
    async fn build_infrastructure(
        &self,
        state: InfrastructureState,
    ) -> EngineResult<InfrastructureOutcome>;

    async fn destroy_infrastructure(
        &self,
        current: &ClusterSnapshot,
        current_lbs: &[LoadBalancerSnapshot],
    ) -> EngineResult<()>;
}

/// Configures the machines: VPN mesh, node prerequisites, load balancers and the api endpoint.
#[async_trait::async_trait]
pub trait ConfigurationEngine: Send + Sync {
    /// Remove the configuration of load balancers that are going away. If one of them was the
    /// api endpoint, the returned cluster has the endpoint moved back onto a node.
    async fn teardown_load_balancers(
        &self,
        desired: &ClusterSnapshot,
        deleted_lbs: &[LoadBalancerSnapshot],
    ) -> EngineResult<ClusterSnapshot>;

    async fn install_mesh(
        &self,
        desired: &ClusterSnapshot,
        desired_lbs: &[LoadBalancerSnapshot],
    ) -> EngineResult<ClusterState>;

    async fn install_node_requirements(
        &self,
        desired: &ClusterSnapshot,
    ) -> EngineResult<ClusterSnapshot>;

    async fn set_up_load_balancers(
        &self,
        desired: &ClusterSnapshot,
        desired_lbs: &[LoadBalancerSnapshot],
        current_lbs: &[LoadBalancerSnapshot],
    ) -> EngineResult<ClusterState>;

    /// Move the api endpoint of `current` to `node` of `nodepool`.
    async fn update_api_endpoint(
        &self,
        current: &ClusterSnapshot,
        nodepool: &str,
        node: &str,
    ) -> EngineResult<ClusterSnapshot>;
}

/// Brings up, changes and resets the Kubernetes control plane and workers.
#[async_trait::async_trait]
pub trait BootstrapEngine: Send + Sync {
    /// Returns `desired` with its kubeconfig populated.
    async fn build_cluster(
        &self,
        desired: &ClusterSnapshot,
        desired_lbs: &[LoadBalancerSnapshot],
    ) -> EngineResult<ClusterSnapshot>;

    async fn destroy_cluster(
        &self,
        current: &ClusterSnapshot,
        current_lbs: &[LoadBalancerSnapshot],
    ) -> EngineResult<ClusterSnapshot>;
}

/// Configures things that live inside (or are stored for) a running cluster.
#[async_trait::async_trait]
pub trait InClusterEngine: Send + Sync {
    async fn set_up_storage(&self, cluster: &ClusterSnapshot) -> EngineResult<ClusterSnapshot>;

    async fn store_kubeconfig(&self, cluster: &ClusterSnapshot) -> EngineResult<()>;

    async fn delete_kubeconfig(&self, cluster: &ClusterSnapshot) -> EngineResult<()>;

    async fn store_cluster_metadata(
        &self,
        cluster: &ClusterSnapshot,
        lbs: &[LoadBalancerSnapshot],
    ) -> EngineResult<()>;

    async fn delete_cluster_metadata(&self, cluster: &ClusterSnapshot) -> EngineResult<()>;

    async fn store_lb_scrape_config(
        &self,
        cluster: &ClusterSnapshot,
        lbs: &[LoadBalancerSnapshot],
    ) -> EngineResult<()>;

    async fn remove_lb_scrape_config(&self, cluster: &ClusterSnapshot) -> EngineResult<()>;

    /// Set provider identifiers and labels on the Kubernetes node objects.
    async fn patch_nodes(&self, cluster: &ClusterSnapshot) -> EngineResult<()>;

    async fn set_up_autoscaler(&self, cluster: &ClusterSnapshot) -> EngineResult<()>;

    async fn destroy_autoscaler(&self, cluster: &ClusterSnapshot) -> EngineResult<()>;

    /// Point the cluster-info discovery config map at the cluster's current api endpoint.
    async fn patch_discovery_config_map(&self, cluster: &ClusterSnapshot) -> EngineResult<()>;

    /// Update the certificate SAN list of the bootstrap (kubeadm) config map.
    async fn patch_kubeadm_config_map(
        &self,
        cluster: &ClusterSnapshot,
        lbs: &[LoadBalancerSnapshot],
    ) -> EngineResult<()>;

    /// Drain and remove the named nodes, returning the cluster without the ones that are gone.
    async fn safe_delete_nodes(
        &self,
        masters: &[String],
        workers: &[String],
        cluster: &ClusterSnapshot,
    ) -> EngineResult<NodeDeletionOutcome>;
}

/// The persistent store of cluster state and pending tasks.
#[async_trait::async_trait]
pub trait TaskStore: Send + Sync {
    /// The next task that is ready to be worked on, `None` if there is nothing to do.
    async fn next_task(&self) -> StoreResult<Option<Task>>;

    /// Replace the committed current state of a cluster. `None` clears it.
    async fn update_current_state(
        &self,
        config: &str,
        cluster: &str,
        state: Option<&ClusterState>,
    ) -> StoreResult<()>;

    async fn update_task_status(
        &self,
        config: &str,
        cluster: &str,
        task_id: &str,
        workflow: &Workflow,
    ) -> StoreResult<()>;
}
