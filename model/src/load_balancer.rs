use crate::cluster::NodePool;
use serde::{Deserialize, Serialize};

/// A load balancer cluster serving a Kubernetes cluster. Load balancers are owned independently
/// of the cluster they target.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerSnapshot {
    pub name: String,
    #[serde(default)]
    pub hash: String,
    /// Name of the Kubernetes cluster this load balancer routes to.
    pub target_cluster: String,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub dns: Option<Dns>,
    /// The machines running the load balancer itself.
    #[serde(default)]
    pub node_pools: Vec<NodePool>,
}

impl LoadBalancerSnapshot {
    pub fn has_api_role(&self) -> bool {
        self.api_role().is_some()
    }

    pub fn api_role(&self) -> Option<&Role> {
        self.roles
            .iter()
            .find(|role| role.role_type == RoleType::ApiServer)
    }

    pub fn api_role_mut(&mut self) -> Option<&mut Role> {
        self.roles
            .iter_mut()
            .find(|role| role.role_type == RoleType::ApiServer)
    }
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub name: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub target_port: u16,
    pub role_type: RoleType,
    /// Node pools of the target cluster that receive traffic for this role.
    #[serde(default)]
    pub target_pools: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum RoleType {
    ApiServer,
    Ingress,
}

impl Default for RoleType {
    fn default() -> Self {
        Self::Ingress
    }
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Dns {
    pub dns_zone: String,
    #[serde(default)]
    pub hostname: String,
    /// The resolved endpoint, filled in once the record exists.
    #[serde(default)]
    pub endpoint: String,
}

/// Finds the load balancer with an `ApiServer` role that targets `cluster`.
pub fn api_load_balancer<'a>(
    load_balancers: &'a [LoadBalancerSnapshot],
    cluster: &str,
) -> Option<&'a LoadBalancerSnapshot> {
    load_balancers
        .iter()
        .find(|lb| lb.target_cluster == cluster && lb.has_api_role())
}
