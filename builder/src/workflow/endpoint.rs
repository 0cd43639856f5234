use super::Builder;
use crate::context::BuilderContext;
use crate::error::{self, Result};
use log::info;
use reconciler_model::Stage;
use snafu::{ensure, OptionExt, ResultExt};

impl Builder {
    /// Moves the api endpoint of the current cluster to `node` of `nodepool`. Once started, the
    /// endpoint update, the certificate rebuild and the config map patches always run together
    /// and in this order, otherwise clients of the old endpoint are orphaned.
    pub async fn replace_api_endpoint(
        &self,
        ctx: &mut BuilderContext,
        nodepool: &str,
        node: &str,
    ) -> Result<()> {
        let current = ctx.current()?.clone();
        current
            .validate_api_endpoint(&ctx.current_lbs)
            .context(error::ApiEndpointSnafu {
                cluster: &current.name,
            })?;
        let valid_target = current
            .node_pool(nodepool)
            .map(|pool| pool.is_control && pool.node(node).is_some())
            .unwrap_or(false);
        ensure!(
            valid_target,
            error::InvalidEndpointTargetSnafu {
                cluster: &current.name,
                nodepool,
                node,
            }
        );

        let previous = self
            .begin(
                ctx,
                Stage::Configuration,
                format!("moving api endpoint to {}/{}", nodepool, node),
            )
            .await?;
        let mut updated = self
            .engines
            .configuration
            .update_api_endpoint(&current, nodepool, node)
            .await
            .context(ctx.stage_context(Stage::Configuration, "update api endpoint"))?;
        ensure!(
            updated.set_api_endpoint(nodepool, node),
            error::InvalidEndpointTargetSnafu {
                cluster: &updated.name,
                nodepool,
                node,
            }
        );
        ctx.current = Some(updated.clone());

        self.enter(
            ctx,
            Stage::Bootstrap,
            "re-issuing certificates for the new api endpoint",
        )
        .await?;
        let rebuilt = self
            .engines
            .bootstrap
            .build_cluster(&updated, &ctx.current_lbs)
            .await
            .context(ctx.stage_context(Stage::Bootstrap, "build cluster"))?;
        ctx.current = Some(rebuilt.clone());

        let stage = Stage::InClusterConfiguration;
        self.enter(ctx, stage, "patching config maps for the new api endpoint")
            .await?;
        let in_cluster = &self.engines.in_cluster;
        in_cluster
            .patch_discovery_config_map(&rebuilt)
            .await
            .context(ctx.stage_context(stage, "patch discovery config map"))?;
        in_cluster
            .patch_kubeadm_config_map(&rebuilt, &ctx.current_lbs)
            .await
            .context(ctx.stage_context(stage, "patch kubeadm config map"))?;

        if let Some(desired) = ctx.desired.as_mut() {
            desired.set_api_endpoint(nodepool, node);
        }
        ctx.workflow.describe(previous);
        info!("{}: api endpoint moved to {}/{}", ctx, nodepool, node);
        Ok(())
    }
}

/// Picks the node that takes over the api endpoint: the first node of the first control pool
/// that survives into the desired state and does not hold the endpoint already.
pub(super) fn select_replacement(ctx: &BuilderContext) -> Result<(String, String)> {
    let current = ctx.current()?;
    let desired = ctx.desired()?;
    current
        .control_pools()
        .filter(|pool| !pool.has_api_endpoint() && desired.node_pool(&pool.name).is_some())
        .find_map(|pool| {
            pool.nodes
                .first()
                .map(|node| (pool.name.clone(), node.name.clone()))
        })
        .context(error::NoEndpointReplacementSnafu {
            cluster: &current.name,
        })
}
