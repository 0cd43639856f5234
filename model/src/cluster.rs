use crate::error::{self, Result};
use crate::load_balancer::{api_load_balancer, LoadBalancerSnapshot};
use serde::{Deserialize, Serialize};
use snafu::ensure;
use std::collections::BTreeSet;

/// A Kubernetes cluster as it exists (current state) or as it should exist (desired state). The
/// `hash` is fixed when the cluster is first declared and never changes afterwards, so `name` plus
/// `hash` uniquely identify the cluster across both states.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSnapshot {
    pub name: String,
    pub hash: String,
    #[serde(default)]
    pub kubernetes_version: String,
    #[serde(default)]
    pub node_pools: Vec<NodePool>,
    /// Populated by the bootstrap engine once the control plane exists.
    #[serde(default)]
    pub kubeconfig: Option<String>,
}

impl ClusterSnapshot {
    /// The `name-hash` identifier used for cluster-scoped resources.
    pub fn id(&self) -> String {
        format!("{}-{}", self.name, self.hash)
    }

    pub fn node_pool(&self, name: &str) -> Option<&NodePool> {
        self.node_pools.iter().find(|pool| pool.name == name)
    }

    pub fn node_pool_mut(&mut self, name: &str) -> Option<&mut NodePool> {
        self.node_pools.iter_mut().find(|pool| pool.name == name)
    }

    /// Node pools that participate in the control plane, in declaration order.
    pub fn control_pools(&self) -> impl Iterator<Item = &NodePool> {
        self.node_pools.iter().filter(|pool| pool.is_control)
    }

    /// The node pool and node carrying the `ApiEndpoint` role, if a node (rather than a load
    /// balancer) is the api endpoint.
    pub fn api_endpoint(&self) -> Option<(&NodePool, &Node)> {
        self.node_pools.iter().find_map(|pool| {
            pool.nodes
                .iter()
                .find(|node| node.role == NodeRole::ApiEndpoint)
                .map(|node| (pool, node))
        })
    }

    /// Moves the `ApiEndpoint` role to `node` of `nodepool`. The previous endpoint node, if any,
    /// becomes a plain `Master`. Returns `false` and leaves the snapshot untouched when the target
    /// node does not exist.
    pub fn set_api_endpoint(&mut self, nodepool: &str, node: &str) -> bool {
        let exists = self
            .node_pool(nodepool)
            .map(|pool| pool.nodes.iter().any(|n| n.name == node))
            .unwrap_or(false);
        if !exists {
            return false;
        }
        for pool in self.node_pools.iter_mut() {
            for n in pool.nodes.iter_mut() {
                if pool.name == nodepool && n.name == node {
                    n.role = NodeRole::ApiEndpoint;
                } else if n.role == NodeRole::ApiEndpoint {
                    n.role = NodeRole::Master;
                }
            }
        }
        true
    }

    /// Whether any dynamic node pool has an autoscaler range, which requires the autoscaler
    /// add-on to run in the cluster.
    pub fn is_autoscaled(&self) -> bool {
        self.node_pools.iter().any(|pool| match &pool.kind {
            NodePoolKind::Dynamic(dynamic) => dynamic.autoscaler.is_some(),
            NodePoolKind::Static(_) => false,
        })
    }

    pub fn has_static_pools(&self) -> bool {
        self.node_pools.iter().any(NodePool::is_static)
    }

    /// Checks that at most one node carries the api-endpoint role, and none does when an api
    /// server load balancer fronts the cluster.
    pub fn validate_api_endpoint(&self, load_balancers: &[LoadBalancerSnapshot]) -> Result<()> {
        let count = self
            .node_pools
            .iter()
            .flat_map(|pool| pool.nodes.iter())
            .filter(|node| node.role == NodeRole::ApiEndpoint)
            .count();
        if let Some(lb) = api_load_balancer(load_balancers, &self.name) {
            ensure!(
                count == 0,
                error::EndpointNodeWithApiLoadBalancerSnafu {
                    cluster: &self.name,
                    count,
                    load_balancer: &lb.name,
                }
            );
        }
        ensure!(
            count <= 1,
            error::MultipleEndpointNodesSnafu {
                cluster: &self.name,
                count,
            }
        );
        Ok(())
    }

    /// Removes the named nodes from their pools. Dynamic pool counts shrink by the number of
    /// nodes actually removed, so removing a node twice is harmless. Returns how many nodes were
    /// removed.
    pub fn remove_nodes(&mut self, names: &BTreeSet<String>) -> usize {
        let mut total = 0;
        for pool in self.node_pools.iter_mut() {
            let before = pool.nodes.len();
            pool.nodes.retain(|node| !names.contains(&node.name));
            let removed = before - pool.nodes.len();
            if let NodePoolKind::Dynamic(dynamic) = &mut pool.kind {
                dynamic.count = dynamic.count.saturating_sub(removed as u32);
            }
            total += removed;
        }
        total
    }
}

/// A named, homogeneous group of nodes.
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodePool {
    pub name: String,
    /// Whether the nodes of this pool run the Kubernetes control plane.
    pub is_control: bool,
    /// For dynamic pools these are the nodes realized so far, for static pools this is the
    /// user-supplied list of machines.
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(flatten)]
    pub kind: NodePoolKind,
}

impl NodePool {
    /// The number of nodes the pool should have: the declared count for dynamic pools, the length
    /// of the node list for static pools.
    pub fn node_count(&self) -> u32 {
        match &self.kind {
            NodePoolKind::Dynamic(dynamic) => dynamic.count,
            NodePoolKind::Static(_) => self.nodes.len() as u32,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self.kind, NodePoolKind::Dynamic(_))
    }

    pub fn is_static(&self) -> bool {
        matches!(self.kind, NodePoolKind::Static(_))
    }

    pub fn has_api_endpoint(&self) -> bool {
        self.nodes.iter().any(|node| node.role == NodeRole::ApiEndpoint)
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.name == name)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NodePoolKind {
    Dynamic(DynamicNodePool),
    Static(StaticNodePool),
}

/// A node pool whose machines are created by the infrastructure engine.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DynamicNodePool {
    pub count: u32,
    pub provider: ProviderSpec,
    #[serde(default)]
    pub server_type: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub autoscaler: Option<AutoscalerConfig>,
}

/// A node pool of machines that already exist and are enumerated by the user.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StaticNodePool {
    /// Name of the secret holding the SSH keys for the machines.
    #[serde(default)]
    pub key_secret: String,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    pub name: String,
    pub cloud: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub zone: String,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerConfig {
    pub min: u32,
    pub max: u32,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub name: String,
    /// Public address, also the identity of a static node.
    pub public: String,
    #[serde(default)]
    pub private: String,
    pub role: NodeRole,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    Worker,
    Master,
    ApiEndpoint,
}

impl Default for NodeRole {
    fn default() -> Self {
        Self::Worker
    }
}

/// A cluster together with the load balancers that target it.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterState {
    pub cluster: ClusterSnapshot,
    #[serde(default)]
    pub load_balancers: Vec<LoadBalancerSnapshot>,
}
