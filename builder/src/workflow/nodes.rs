use super::Builder;
use crate::clients::{EngineError, NodeDeletionOutcome};
use crate::context::BuilderContext;
use crate::error::Result;
use log::{info, warn};
use reconciler_model::{ClusterSnapshot, NodePool, NodePoolKind, NodeRole, Stage};
use snafu::ResultExt;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

/// Nodes picked for deletion, split the way the in-cluster engine drains them.
#[derive(Debug, Default, PartialEq, Eq)]
pub(super) struct Selection {
    pub(super) masters: Vec<String>,
    pub(super) workers: Vec<String>,
    /// How many nodes were picked per pool.
    pub(super) per_pool: BTreeMap<String, u32>,
}

impl Selection {
    fn is_empty(&self) -> bool {
        self.masters.is_empty() && self.workers.is_empty()
    }

    fn names(&self) -> BTreeSet<String> {
        self.masters
            .iter()
            .chain(self.workers.iter())
            .cloned()
            .collect()
    }

    /// The part of the selection that no longer appears in `reached`.
    fn gone_from(&self, original: &ClusterSnapshot, reached: &ClusterSnapshot) -> Selection {
        let remaining: BTreeSet<&str> = reached
            .node_pools
            .iter()
            .flat_map(|pool| pool.nodes.iter())
            .map(|node| node.name.as_str())
            .collect();
        let gone = |names: &[String]| -> Vec<String> {
            names
                .iter()
                .filter(|name| !remaining.contains(name.as_str()))
                .cloned()
                .collect()
        };
        let mut selection = Selection {
            masters: gone(&self.masters),
            workers: gone(&self.workers),
            per_pool: BTreeMap::new(),
        };
        let names = selection.names();
        for pool in &original.node_pools {
            let count = pool
                .nodes
                .iter()
                .filter(|node| names.contains(&node.name))
                .count() as u32;
            if count > 0 {
                selection.per_pool.insert(pool.name.clone(), count);
            }
        }
        selection
    }
}

impl Builder {
    /// Drains and removes `to_delete` nodes per node pool, and every node of `removed_pools`, from
    /// the current cluster. When the engine gets only part of the way, the nodes it did remove are
    /// dropped from the current state before the error is returned.
    pub async fn delete_nodes(
        &self,
        ctx: &mut BuilderContext,
        to_delete: &BTreeMap<String, u32>,
        removed_pools: &BTreeSet<String>,
    ) -> Result<()> {
        let stage = Stage::DeleteNodes;
        let previous = self.begin(ctx, stage, "deleting nodes").await?;
        let current = ctx.current()?.clone();
        let selection = select(&current, ctx.desired.as_ref(), to_delete, removed_pools);
        if selection.is_empty() {
            ctx.workflow.describe(previous);
            return Ok(());
        }

        info!(
            "{}: deleting control nodes {:?} and worker nodes {:?}",
            ctx, selection.masters, selection.workers
        );
        let outcome = self
            .engines
            .in_cluster
            .safe_delete_nodes(&selection.masters, &selection.workers, &current)
            .await
            .context(ctx.stage_context(stage, "safe delete nodes"))?;

        match outcome {
            NodeDeletionOutcome::Deleted { cluster: mut updated } => {
                prune(&mut updated, &current, &selection, ctx.desired.as_ref());
                ctx.current = Some(updated);
                ctx.workflow.describe(previous);
                Ok(())
            }
            NodeDeletionOutcome::Failed {
                cluster: mut reached,
                reason,
            } => {
                let gone = selection.gone_from(&current, &reached);
                warn!(
                    "{}: node deletion stopped after removing {:?}",
                    ctx,
                    gone.names()
                );
                prune(&mut reached, &current, &gone, ctx.desired.as_ref());
                ctx.current = Some(reached);
                Err(EngineError::rejected(reason))
                    .context(ctx.stage_context(stage, "safe delete nodes"))
            }
        }
    }
}

/// Picks which nodes to remove. Dynamic pools lose their most recently created nodes first, the
/// api endpoint node last. Static pools lose the nodes that are no longer declared. Pools in
/// `removed_pools`, or missing from `desired`, lose every node.
pub(super) fn select(
    current: &ClusterSnapshot,
    desired: Option<&ClusterSnapshot>,
    to_delete: &BTreeMap<String, u32>,
    removed_pools: &BTreeSet<String>,
) -> Selection {
    let mut selection = Selection::default();
    let names: BTreeSet<&String> = to_delete.keys().chain(removed_pools.iter()).collect();
    for name in names {
        let pool = match current.node_pool(name) {
            Some(pool) => pool,
            None => continue,
        };
        let count = to_delete.get(name).copied().unwrap_or(0);
        let desired_pool = desired
            .and_then(|desired| desired.node_pool(name))
            .filter(|_| !removed_pools.contains(name));
        let picked: Vec<String> = match (&pool.kind, desired_pool) {
            (_, None) => pool.nodes.iter().map(|node| node.name.clone()).collect(),
            (NodePoolKind::Dynamic(_), Some(_)) => newest_first(pool)
                .into_iter()
                .take(count as usize)
                .collect(),
            (NodePoolKind::Static(_), Some(desired_pool)) => pool
                .nodes
                .iter()
                .filter(|node| desired_pool.nodes.iter().all(|d| d.public != node.public))
                .take(count as usize)
                .map(|node| node.name.clone())
                .collect(),
        };
        if picked.is_empty() {
            continue;
        }
        selection
            .per_pool
            .insert(name.clone(), picked.len() as u32);
        if pool.is_control {
            selection.masters.extend(picked);
        } else {
            selection.workers.extend(picked);
        }
    }
    selection
}

fn newest_first(pool: &NodePool) -> Vec<String> {
    let mut nodes: Vec<_> = pool
        .nodes
        .iter()
        .enumerate()
        .map(|(position, node)| {
            let index = node_index(&node.name).unwrap_or(position as u64);
            (node.role == NodeRole::ApiEndpoint, Reverse(index), node)
        })
        .collect();
    nodes.sort_by_key(|(endpoint, index, _)| (*endpoint, *index));
    nodes
        .into_iter()
        .map(|(_, _, node)| node.name.clone())
        .collect()
}

/// The trailing number of a dynamic node's name, which grows with every node created in a pool.
fn node_index(name: &str) -> Option<u64> {
    name.rsplit(|c: char| !c.is_ascii_digit())
        .next()
        .and_then(|digits| digits.parse().ok())
}

/// Brings the engine's answer in line with the selection: the picked nodes are gone, dynamic counts
/// shrink by what was picked, and pools that are emptied and not desired disappear.
fn prune(
    updated: &mut ClusterSnapshot,
    original: &ClusterSnapshot,
    selection: &Selection,
    desired: Option<&ClusterSnapshot>,
) {
    let names = selection.names();
    for pool in updated.node_pools.iter_mut() {
        pool.nodes.retain(|node| !names.contains(&node.name));
        let picked = selection.per_pool.get(&pool.name).copied().unwrap_or(0);
        let before = original
            .node_pool(&pool.name)
            .map(NodePool::node_count)
            .unwrap_or(0);
        if let NodePoolKind::Dynamic(dynamic) = &mut pool.kind {
            if picked > 0 {
                dynamic.count = before.saturating_sub(picked);
            }
        }
    }
    updated.node_pools.retain(|pool| {
        pool.node_count() > 0
            || desired
                .map(|desired| desired.node_pool(&pool.name).is_some())
                .unwrap_or(false)
    });
}
