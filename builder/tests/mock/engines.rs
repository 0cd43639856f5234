use builder::clients::{
    BootstrapEngine, ConfigurationEngine, EngineError, EngineResult, InClusterEngine,
    InfrastructureEngine, InfrastructureOutcome, InfrastructureState, NodeDeletionOutcome,
};
use reconciler_model::{
    api_load_balancer, ClusterSnapshot, ClusterState, LoadBalancerSnapshot, Node, NodePoolKind,
    NodeRole,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

/// One fake that plays all four engines. Every call is recorded by operation name.
#[derive(Clone, Default)]
pub(crate) struct MockEngines {
    calls: Arc<Mutex<Vec<String>>>,
    /// Remaining number of times an operation is rejected.
    failures: Arc<Mutex<HashMap<String, u32>>>,
    /// When set, infrastructure builds fail partially with this as the reached current state.
    partial: Arc<Mutex<Option<ClusterSnapshot>>>,
    /// Desired clusters handed to the infrastructure engine, in order.
    provisioned: Arc<Mutex<Vec<ClusterSnapshot>>>,
    /// Load balancer sets handed to the infrastructure engine, in order.
    provisioned_lbs: Arc<Mutex<Vec<Vec<LoadBalancerSnapshot>>>>,
    /// Masters and workers handed to safe delete, in order.
    deleted: Arc<Mutex<Vec<(Vec<String>, Vec<String>)>>>,
    /// When set, safe delete stops after removing this many nodes and reports a failure.
    deletion_stops_after: Arc<Mutex<Option<usize>>>,
    /// Nodes that the configuration engine leaves out of its answer to an endpoint update.
    forgotten: Arc<Mutex<BTreeSet<String>>>,
}

impl MockEngines {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail(&self, operation: &str, times: u32) {
        self.failures
            .lock()
            .unwrap()
            .insert(operation.to_string(), times);
    }

    pub(crate) fn fail_infrastructure_partially(&self, reached: ClusterSnapshot) {
        *self.partial.lock().unwrap() = Some(reached);
    }

    pub(crate) fn stop_node_deletion_after(&self, removed: usize) {
        *self.deletion_stops_after.lock().unwrap() = Some(removed);
    }

    /// The endpoint update answers with a cluster that no longer has `node`.
    pub(crate) fn forget_node_on_endpoint_update(&self, node: &str) {
        self.forgotten.lock().unwrap().insert(node.to_string());
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| *call == operation)
            .count()
    }

    pub(crate) fn provisioned(&self) -> Vec<ClusterSnapshot> {
        self.provisioned.lock().unwrap().clone()
    }

    pub(crate) fn provisioned_lbs(&self) -> Vec<Vec<LoadBalancerSnapshot>> {
        self.provisioned_lbs.lock().unwrap().clone()
    }

    pub(crate) fn deleted(&self) -> Vec<(Vec<String>, Vec<String>)> {
        self.deleted.lock().unwrap().clone()
    }

    fn call(&self, operation: &str) -> EngineResult<()> {
        self.calls.lock().unwrap().push(operation.to_string());
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(operation) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(EngineError::rejected(format!("{} is broken", operation)))
            }
            _ => Ok(()),
        }
    }
}

pub(crate) fn new_node(pool: &str, is_control: bool, index: u32) -> Node {
    Node {
        name: format!("{}-{}", pool, index),
        public: format!("{}.{}.nodes.example", index, pool),
        private: format!("10.0.0.{}", index),
        role: if is_control {
            NodeRole::Master
        } else {
            NodeRole::Worker
        },
    }
}

/// The kubeconfig the fake bootstrap engine hands out, naming the api endpoint it points at.
pub(crate) fn kubeconfig(cluster: &ClusterSnapshot, lbs: &[LoadBalancerSnapshot]) -> String {
    let server = match api_load_balancer(lbs, &cluster.name) {
        Some(lb) => lb.name.clone(),
        None => cluster
            .api_endpoint()
            .map(|(_, node)| node.public.clone())
            .unwrap_or_default(),
    };
    format!("server: https://{}:6443", server)
}

/// Creates or removes dynamic nodes until every pool has its declared count, and makes the first
/// control node the api endpoint when nothing else is.
fn realize(mut cluster: ClusterSnapshot, lbs: &[LoadBalancerSnapshot]) -> ClusterSnapshot {
    for pool in cluster.node_pools.iter_mut() {
        let count = match &pool.kind {
            NodePoolKind::Dynamic(dynamic) => dynamic.count as usize,
            NodePoolKind::Static(_) => continue,
        };
        let mut next = pool.nodes.len() as u32;
        while pool.nodes.len() < count {
            next += 1;
            pool.nodes.push(new_node(&pool.name, pool.is_control, next));
        }
        pool.nodes.truncate(count);
    }
    if cluster.api_endpoint().is_none() && api_load_balancer(lbs, &cluster.name).is_none() {
        let first = cluster
            .control_pools()
            .find_map(|pool| pool.nodes.first().map(|node| (pool.name.clone(), node.name.clone())));
        if let Some((pool, node)) = first {
            cluster.set_api_endpoint(&pool, &node);
        }
    }
    cluster
}

#[async_trait::async_trait]
impl InfrastructureEngine for MockEngines {
    async fn build_infrastructure(
        &self,
        state: InfrastructureState,
    ) -> EngineResult<InfrastructureOutcome> {
        self.call("build-infrastructure")?;
        if let Some(desired) = &state.desired {
            self.provisioned.lock().unwrap().push(desired.clone());
        }
        self.provisioned_lbs
            .lock()
            .unwrap()
            .push(state.desired_load_balancers.clone());
        if let Some(reached) = self.partial.lock().unwrap().clone() {
            return Ok(InfrastructureOutcome::Failed(InfrastructureState {
                current: Some(reached),
                ..state
            }));
        }
        let desired = state
            .desired
            .clone()
            .map(|desired| realize(desired, &state.desired_load_balancers));
        Ok(InfrastructureOutcome::Built(InfrastructureState { desired, ..state }))
    }

    async fn destroy_infrastructure(
        &self,
        _current: &ClusterSnapshot,
        _current_lbs: &[LoadBalancerSnapshot],
    ) -> EngineResult<()> {
        self.call("destroy-infrastructure")
    }
}

#[async_trait::async_trait]
impl ConfigurationEngine for MockEngines {
    async fn teardown_load_balancers(
        &self,
        desired: &ClusterSnapshot,
        _deleted_lbs: &[LoadBalancerSnapshot],
    ) -> EngineResult<ClusterSnapshot> {
        self.call("teardown-load-balancers")?;
        Ok(desired.clone())
    }

    async fn install_mesh(
        &self,
        desired: &ClusterSnapshot,
        desired_lbs: &[LoadBalancerSnapshot],
    ) -> EngineResult<ClusterState> {
        self.call("install-mesh")?;
        Ok(ClusterState {
            cluster: desired.clone(),
            load_balancers: desired_lbs.to_vec(),
        })
    }

    async fn install_node_requirements(
        &self,
        desired: &ClusterSnapshot,
    ) -> EngineResult<ClusterSnapshot> {
        self.call("install-node-requirements")?;
        Ok(desired.clone())
    }

    async fn set_up_load_balancers(
        &self,
        desired: &ClusterSnapshot,
        desired_lbs: &[LoadBalancerSnapshot],
        _current_lbs: &[LoadBalancerSnapshot],
    ) -> EngineResult<ClusterState> {
        self.call("set-up-load-balancers")?;
        Ok(ClusterState {
            cluster: desired.clone(),
            load_balancers: desired_lbs.to_vec(),
        })
    }

    async fn update_api_endpoint(
        &self,
        current: &ClusterSnapshot,
        nodepool: &str,
        node: &str,
    ) -> EngineResult<ClusterSnapshot> {
        self.call("update-api-endpoint")?;
        let mut updated = current.clone();
        updated.remove_nodes(&self.forgotten.lock().unwrap());
        updated.set_api_endpoint(nodepool, node);
        Ok(updated)
    }
}

#[async_trait::async_trait]
impl BootstrapEngine for MockEngines {
    async fn build_cluster(
        &self,
        desired: &ClusterSnapshot,
        desired_lbs: &[LoadBalancerSnapshot],
    ) -> EngineResult<ClusterSnapshot> {
        self.call("build-cluster")?;
        let mut built = desired.clone();
        built.kubeconfig = Some(kubeconfig(desired, desired_lbs));
        Ok(built)
    }

    async fn destroy_cluster(
        &self,
        current: &ClusterSnapshot,
        _current_lbs: &[LoadBalancerSnapshot],
    ) -> EngineResult<ClusterSnapshot> {
        self.call("destroy-cluster")?;
        let mut reset = current.clone();
        reset.kubeconfig = None;
        Ok(reset)
    }
}

#[async_trait::async_trait]
impl InClusterEngine for MockEngines {
    async fn set_up_storage(&self, cluster: &ClusterSnapshot) -> EngineResult<ClusterSnapshot> {
        self.call("set-up-storage")?;
        Ok(cluster.clone())
    }

    async fn store_kubeconfig(&self, _cluster: &ClusterSnapshot) -> EngineResult<()> {
        self.call("store-kubeconfig")
    }

    async fn delete_kubeconfig(&self, _cluster: &ClusterSnapshot) -> EngineResult<()> {
        self.call("delete-kubeconfig")
    }

    async fn store_cluster_metadata(
        &self,
        _cluster: &ClusterSnapshot,
        _lbs: &[LoadBalancerSnapshot],
    ) -> EngineResult<()> {
        self.call("store-cluster-metadata")
    }

    async fn delete_cluster_metadata(&self, _cluster: &ClusterSnapshot) -> EngineResult<()> {
        self.call("delete-cluster-metadata")
    }

    async fn store_lb_scrape_config(
        &self,
        _cluster: &ClusterSnapshot,
        _lbs: &[LoadBalancerSnapshot],
    ) -> EngineResult<()> {
        self.call("store-lb-scrape-config")
    }

    async fn remove_lb_scrape_config(&self, _cluster: &ClusterSnapshot) -> EngineResult<()> {
        self.call("remove-lb-scrape-config")
    }

    async fn patch_nodes(&self, _cluster: &ClusterSnapshot) -> EngineResult<()> {
        self.call("patch-nodes")
    }

    async fn set_up_autoscaler(&self, _cluster: &ClusterSnapshot) -> EngineResult<()> {
        self.call("set-up-autoscaler")
    }

    async fn destroy_autoscaler(&self, _cluster: &ClusterSnapshot) -> EngineResult<()> {
        self.call("destroy-autoscaler")
    }

    async fn patch_discovery_config_map(&self, _cluster: &ClusterSnapshot) -> EngineResult<()> {
        self.call("patch-discovery-config-map")
    }

    async fn patch_kubeadm_config_map(
        &self,
        _cluster: &ClusterSnapshot,
        _lbs: &[LoadBalancerSnapshot],
    ) -> EngineResult<()> {
        self.call("patch-kubeadm-config-map")
    }

    async fn safe_delete_nodes(
        &self,
        masters: &[String],
        workers: &[String],
        cluster: &ClusterSnapshot,
    ) -> EngineResult<NodeDeletionOutcome> {
        self.call("safe-delete-nodes")?;
        self.deleted
            .lock()
            .unwrap()
            .push((masters.to_vec(), workers.to_vec()));
        let stops_after = *self.deletion_stops_after.lock().unwrap();
        let names: BTreeSet<String> = masters
            .iter()
            .chain(workers)
            .take(stops_after.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        let mut remaining = cluster.clone();
        remaining.remove_nodes(&names);
        Ok(match stops_after {
            Some(_) => NodeDeletionOutcome::Failed {
                cluster: remaining,
                reason: "node did not drain in time".to_string(),
            },
            None => NodeDeletionOutcome::Deleted { cluster: remaining },
        })
    }
}
