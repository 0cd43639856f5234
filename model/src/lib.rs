/*!

This library provides the data model shared by the cluster builder: snapshots of a Kubernetes
cluster and its load balancers, the per-cluster `Workflow` progress record, and the tasks that the
task store hands out.

!*/

#![deny(
    clippy::expect_used,
    clippy::get_unwrap,
    clippy::panic,
    clippy::panic_in_result_fn,
    clippy::panicking_unwrap,
    clippy::unwrap_in_result,
    clippy::unwrap_used
)]

pub use cluster::{
    AutoscalerConfig, ClusterSnapshot, ClusterState, DynamicNodePool, Node, NodePool,
    NodePoolKind, NodeRole, ProviderSpec, StaticNodePool,
};
pub use error::{Error, Result};
pub use load_balancer::{api_load_balancer, Dns, LoadBalancerSnapshot, Role, RoleType};
pub use task::{DeleteEvent, Task, TaskEvent, UpdateEvent};
pub use workflow::{Stage, Workflow, WorkflowStatus};

mod cluster;
pub mod constants;
mod error;
mod load_balancer;
mod task;
mod workflow;
