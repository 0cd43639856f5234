/*!

Fake engines and a fake task store that record what they are asked to do, so that the builder and
the dispatch loop can be tested without any of the real services.

Also provided here are helpers that build clusters, load balancers and tasks for the tests.

!*/

#![allow(dead_code)]

pub(crate) mod engines;
pub(crate) mod task_store;

use builder::{Builder, Engines};
use engines::MockEngines;
use reconciler_model::{
    AutoscalerConfig, ClusterSnapshot, ClusterState, DynamicNodePool, LoadBalancerSnapshot, Node,
    NodePool, NodePoolKind, NodeRole, ProviderSpec, Role, RoleType, StaticNodePool, Task,
    TaskEvent, Workflow,
};
use std::sync::Arc;
use task_store::MockTaskStore;
use tokio_util::sync::CancellationToken;

pub(crate) const CLUSTER: &str = "alpha";

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub(crate) fn builder(
    engines: &MockEngines,
    store: &MockTaskStore,
    shutdown: CancellationToken,
) -> Builder {
    Builder::new(
        Engines {
            infrastructure: Arc::new(engines.clone()),
            configuration: Arc::new(engines.clone()),
            bootstrap: Arc::new(engines.clone()),
            in_cluster: Arc::new(engines.clone()),
            store: Arc::new(store.clone()),
        },
        shutdown,
    )
}

/// A dynamic node pool with `count` realized nodes named `{name}-{index}`. The first node of a
/// control pool is not made the api endpoint, see [`with_endpoint`].
pub(crate) fn dynamic(name: &str, is_control: bool, count: u32) -> NodePool {
    NodePool {
        name: name.into(),
        is_control,
        nodes: (1..=count)
            .map(|index| engines::new_node(name, is_control, index))
            .collect(),
        kind: NodePoolKind::Dynamic(DynamicNodePool {
            count,
            provider: ProviderSpec {
                name: "hetzner-1".into(),
                cloud: "hetzner".into(),
                region: "nbg1".into(),
                zone: "nbg1-dc3".into(),
            },
            server_type: "cpx11".into(),
            image: "ubuntu-22.04".into(),
            autoscaler: None,
        }),
    }
}

pub(crate) fn with_endpoint(mut pool: NodePool) -> NodePool {
    if let Some(node) = pool.nodes.first_mut() {
        node.role = NodeRole::ApiEndpoint;
    }
    pool
}

/// `pool` with an autoscaler range, which makes its cluster need the autoscaler add-on.
pub(crate) fn autoscaled(mut pool: NodePool) -> NodePool {
    if let NodePoolKind::Dynamic(dynamic) = &mut pool.kind {
        dynamic.autoscaler = Some(AutoscalerConfig { min: 1, max: 5 });
    }
    pool
}

pub(crate) fn metal(addresses: &[&str]) -> NodePool {
    NodePool {
        name: "metal".into(),
        is_control: false,
        nodes: addresses
            .iter()
            .enumerate()
            .map(|(i, address)| Node {
                name: format!("metal-{}", i + 1),
                public: address.to_string(),
                private: format!("192.168.0.{}", i + 1),
                role: NodeRole::Worker,
            })
            .collect(),
        kind: NodePoolKind::Static(StaticNodePool {
            key_secret: "metal-keys".into(),
        }),
    }
}

pub(crate) fn cluster(pools: Vec<NodePool>) -> ClusterSnapshot {
    ClusterSnapshot {
        name: CLUSTER.into(),
        hash: "f9k2".into(),
        kubernetes_version: "v1.27.0".into(),
        node_pools: pools,
        kubeconfig: None,
    }
}

/// `cluster` as the bootstrap engine would have left it.
pub(crate) fn built(mut cluster: ClusterSnapshot, lbs: &[LoadBalancerSnapshot]) -> ClusterSnapshot {
    cluster.kubeconfig = Some(engines::kubeconfig(&cluster, lbs));
    cluster
}

pub(crate) fn api_lb(name: &str, targets: &[&str]) -> LoadBalancerSnapshot {
    LoadBalancerSnapshot {
        name: name.into(),
        hash: "lb01".into(),
        target_cluster: CLUSTER.into(),
        roles: vec![Role {
            name: "api-server".into(),
            protocol: "tcp".into(),
            port: 6443,
            target_port: 6443,
            role_type: RoleType::ApiServer,
            target_pools: targets.iter().map(|target| target.to_string()).collect(),
        }],
        dns: None,
        node_pools: vec![],
    }
}

pub(crate) fn state(cluster: ClusterSnapshot) -> ClusterState {
    ClusterState {
        cluster,
        load_balancers: vec![],
    }
}

pub(crate) fn task(
    id: &str,
    cluster: &str,
    current: Option<ClusterState>,
    event: TaskEvent,
) -> Task {
    Task {
        id: id.into(),
        config: "prod".into(),
        cluster: cluster.into(),
        current,
        event,
        workflow: Workflow::new(),
    }
}

/// Asserts that `expected` appears in `calls` in this order, other calls in between allowed.
pub(crate) fn assert_in_order(calls: &[String], expected: &[&str]) {
    let mut remaining = calls.iter();
    for call in expected {
        assert!(
            remaining.any(|c| c == call),
            "expected '{}' in order {:?} within {:?}",
            call,
            expected,
            calls
        );
    }
}
