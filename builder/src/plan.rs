/*!

Decides whether a cluster can go from its current to its desired state in one step, and if it
cannot, computes the intermediate state to pass through first.

Two kinds of change can strand a control plane when applied together with others: resizing (growth
and shrinkage in the same infrastructure call) and moving the api endpoint away from a node pool
that is removed. [`plan`] detects those combinations. It is a pure function of its inputs.

!*/

use reconciler_model::{
    api_load_balancer, ClusterSnapshot, LoadBalancerSnapshot, NodePool, NodePoolKind,
};
use std::collections::{BTreeMap, BTreeSet};

/// A cluster and load balancer set that is applied before the real desired state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntermediateState {
    pub cluster: ClusterSnapshot,
    pub load_balancers: Vec<LoadBalancerSnapshot>,
}

/// The staged plan for one reconciliation pass. It is computed fresh for every pass and never
/// persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntermediateRepresentation {
    /// State to apply before the desired state, `None` when a direct transition is safe.
    pub intermediate: Option<IntermediateState>,
    /// Number of nodes to remove per node pool that exists in both states, once the
    /// intermediate state is in place.
    pub to_delete: BTreeMap<String, u32>,
    /// Node pools that only exist in the current state. All of their nodes are removed.
    pub removed_pools: BTreeSet<String>,
    /// The node pool holding the api endpoint goes away, so the endpoint must move first.
    pub control_plane_with_api_endpoint_replace: bool,
}

impl IntermediateRepresentation {
    /// Number of non-empty phases among intermediate apply, endpoint replacement and node
    /// deletion. Callers add one for the final apply of the desired state.
    pub fn stages(&self) -> usize {
        [
            self.intermediate.is_some(),
            self.control_plane_with_api_endpoint_replace,
            self.deletes_nodes(),
        ]
        .iter()
        .filter(|phase| **phase)
        .count()
    }

    pub fn is_empty(&self) -> bool {
        self.stages() == 0
    }

    /// Whether the node deletion phase has anything to do.
    pub fn deletes_nodes(&self) -> bool {
        !self.to_delete.is_empty() || !self.removed_pools.is_empty()
    }
}

/// Computes the plan for moving `current` to `desired`. If either side is missing the plan is
/// empty: creating and destroying a whole cluster needs no staging.
pub fn plan(
    current: Option<&ClusterSnapshot>,
    desired: Option<&ClusterSnapshot>,
    current_lbs: &[LoadBalancerSnapshot],
    desired_lbs: &[LoadBalancerSnapshot],
) -> IntermediateRepresentation {
    let (current, desired) = match (current, desired) {
        (Some(current), Some(desired)) => (current, desired),
        _ => return IntermediateRepresentation::default(),
    };

    let mut ir = desired.clone();
    let mut ir_lbs = desired_lbs.to_vec();
    let mut to_delete = BTreeMap::new();
    let mut removed_pools = BTreeSet::new();
    let mut adding = false;
    let mut deleting = false;
    let mut endpoint_replace = false;
    let mut api_lb_target_deleted = false;

    for current_pool in &current.node_pools {
        let desired_pool = match desired.node_pool(&current_pool.name) {
            Some(pool) => pool,
            None => {
                deleting = true;
                removed_pools.insert(current_pool.name.clone());
                ir.node_pools.push(current_pool.clone());
                if current_pool.has_api_endpoint() {
                    endpoint_replace = true;
                }
                if current_pool.is_control
                    && retarget_api_load_balancer(
                        current,
                        desired,
                        current_pool,
                        current_lbs,
                        &mut ir_lbs,
                    )
                {
                    api_lb_target_deleted = true;
                }
                continue;
            }
        };

        let diff = pool_diff(current_pool, desired_pool);
        adding |= diff.adding;
        if diff.removed > 0 {
            deleting = true;
            to_delete.insert(current_pool.name.clone(), diff.removed);
            if let Some(ir_pool) = ir.node_pool_mut(&current_pool.name) {
                freeze(ir_pool, current_pool);
            }
        }
    }

    // Pools that only exist in desired are new.
    adding |= desired
        .node_pools
        .iter()
        .any(|pool| current.node_pool(&pool.name).is_none());

    let api_lb_changed = api_load_balancer(current_lbs, &current.name).map(|lb| &lb.name)
        != api_load_balancer(desired_lbs, &desired.name).map(|lb| &lb.name);

    let needs_intermediate = api_lb_target_deleted
        || (adding && deleting)
        || (adding && api_lb_changed)
        || endpoint_replace;

    IntermediateRepresentation {
        intermediate: needs_intermediate.then(|| IntermediateState {
            cluster: ir,
            load_balancers: ir_lbs,
        }),
        to_delete,
        removed_pools,
        control_plane_with_api_endpoint_replace: endpoint_replace,
    }
}

/// Nodes to remove per shared node pool when going from `current` to `desired` without any
/// staging.
pub fn nodes_to_delete(current: &ClusterSnapshot, desired: &ClusterSnapshot) -> BTreeMap<String, u32> {
    current
        .node_pools
        .iter()
        .filter_map(|current_pool| {
            let desired_pool = desired.node_pool(&current_pool.name)?;
            let removed = pool_diff(current_pool, desired_pool).removed;
            (removed > 0).then(|| (current_pool.name.clone(), removed))
        })
        .collect()
}

/// Node pools of `current` that `desired` no longer has.
pub fn removed_pools(current: &ClusterSnapshot, desired: &ClusterSnapshot) -> BTreeSet<String> {
    current
        .node_pools
        .iter()
        .filter(|pool| desired.node_pool(&pool.name).is_none())
        .map(|pool| pool.name.clone())
        .collect()
}

struct PoolDiff {
    adding: bool,
    removed: u32,
}

/// Dynamic pools are compared by count. Static pools are compared by membership, a static node
/// being identified by its public address.
fn pool_diff(current: &NodePool, desired: &NodePool) -> PoolDiff {
    match (&current.kind, &desired.kind) {
        (NodePoolKind::Static(_), NodePoolKind::Static(_)) => {
            let current_addrs = addresses(current);
            let desired_addrs = addresses(desired);
            PoolDiff {
                adding: desired_addrs.difference(&current_addrs).next().is_some(),
                removed: current_addrs.difference(&desired_addrs).count() as u32,
            }
        }
        _ => {
            let (c, d) = (current.node_count(), desired.node_count());
            PoolDiff {
                adding: d > c,
                removed: c.saturating_sub(d),
            }
        }
    }
}

fn addresses(pool: &NodePool) -> BTreeSet<&str> {
    pool.nodes.iter().map(|node| node.public.as_str()).collect()
}

/// Keeps a shrinking pool at its current size in the intermediate state. Static pools keep the
/// union of both node lists so that additions still happen.
fn freeze(ir_pool: &mut NodePool, current_pool: &NodePool) {
    if let (NodePoolKind::Dynamic(ir_dynamic), NodePoolKind::Dynamic(current_dynamic)) =
        (&mut ir_pool.kind, &current_pool.kind)
    {
        ir_dynamic.count = current_dynamic.count;
        ir_pool.nodes = current_pool.nodes.clone();
        return;
    }
    let missing: Vec<_> = {
        let known = addresses(ir_pool);
        current_pool
            .nodes
            .iter()
            .filter(|node| !known.contains(node.public.as_str()))
            .cloned()
            .collect()
    };
    ir_pool.nodes.extend(missing);
}

/// When `removed` is the only target of the cluster's api server load balancer, adds a surviving
/// control pool as a target of that load balancer in `ir_lbs`. The removed pool stays a target
/// until it is actually gone. Returns whether a load balancer was retargeted.
fn retarget_api_load_balancer(
    current: &ClusterSnapshot,
    desired: &ClusterSnapshot,
    removed: &NodePool,
    current_lbs: &[LoadBalancerSnapshot],
    ir_lbs: &mut [LoadBalancerSnapshot],
) -> bool {
    let lb = match api_load_balancer(current_lbs, &current.name) {
        Some(lb) => lb,
        None => return false,
    };
    let sole_target = lb
        .api_role()
        .map(|role| role.target_pools.len() == 1 && role.target_pools[0] == removed.name)
        .unwrap_or(false);
    if !sole_target {
        return false;
    }
    let replacement = match desired
        .control_pools()
        .find(|pool| pool.name != removed.name)
    {
        Some(pool) => pool.name.clone(),
        None => return false,
    };
    let role = match ir_lbs
        .iter_mut()
        .find(|ir_lb| ir_lb.name == lb.name)
        .and_then(LoadBalancerSnapshot::api_role_mut)
    {
        Some(role) => role,
        None => return false,
    };
    for pool in [&removed.name, &replacement] {
        if !role.target_pools.contains(pool) {
            role.target_pools.push(pool.clone());
        }
    }
    true
}
