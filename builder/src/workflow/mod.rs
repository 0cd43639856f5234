mod endpoint;
mod nodes;

use crate::clients::{
    BootstrapEngine, ConfigurationEngine, InClusterEngine, InfrastructureEngine,
    InfrastructureOutcome, InfrastructureState, StoreError, TaskStore,
};
use crate::context::BuilderContext;
use crate::error::{self, Result};
use crate::plan::plan;
use log::{debug, info, warn};
use reconciler_model::Stage;
use snafu::ResultExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The external collaborators a [`Builder`] drives.
#[derive(Clone)]
pub struct Engines {
    pub infrastructure: Arc<dyn InfrastructureEngine>,
    pub configuration: Arc<dyn ConfigurationEngine>,
    pub bootstrap: Arc<dyn BootstrapEngine>,
    pub in_cluster: Arc<dyn InClusterEngine>,
    pub store: Arc<dyn TaskStore>,
}

/// Runs reconciliation passes. Within one pass stages run strictly in order and the workflow
/// record is persisted before each of them. Shutdown is observed at stage boundaries only; a
/// stage that has started always runs to completion.
#[derive(Clone)]
pub struct Builder {
    engines: Engines,
    shutdown: CancellationToken,
}

impl Builder {
    pub fn new(engines: Engines, shutdown: CancellationToken) -> Self {
        Self { engines, shutdown }
    }

    pub fn engines(&self) -> &Engines {
        &self.engines
    }

    /// Builds a cluster that does not exist yet.
    pub async fn create(&self, ctx: &mut BuilderContext) -> Result<()> {
        ctx.current = None;
        ctx.current_lbs.clear();
        self.build_cluster(ctx).await
    }

    /// Moves an existing cluster to its desired state, passing through an intermediate state,
    /// an api endpoint move and node deletion first when the planner asks for them.
    pub async fn reconcile(&self, ctx: &mut BuilderContext) -> Result<()> {
        let mut ir = plan(
            ctx.current.as_ref(),
            ctx.desired.as_ref(),
            &ctx.current_lbs,
            &ctx.desired_lbs,
        );
        if ir.is_empty() {
            return self.build_cluster(ctx).await;
        }

        let total = ir.stages() + 1;
        let mut step = 0;
        info!(
            "{}: reconciling in {} steps, deleting {:?} and node pools {:?}",
            ctx, total, ir.to_delete, ir.removed_pools
        );

        if let Some(intermediate) = ir.intermediate.take() {
            step += 1;
            self.describe(
                ctx,
                format!("applying intermediate state ({}/{})", step, total),
            )
            .await?;
            let desired = ctx.desired.replace(intermediate.cluster);
            let desired_lbs = std::mem::replace(&mut ctx.desired_lbs, intermediate.load_balancers);
            let result = self.build_cluster(ctx).await;
            ctx.desired = desired;
            ctx.desired_lbs = desired_lbs;
            result?;
        }

        if ir.control_plane_with_api_endpoint_replace {
            step += 1;
            self.describe(ctx, format!("moving api endpoint ({}/{})", step, total))
                .await?;
            let (nodepool, node) = endpoint::select_replacement(ctx)?;
            self.replace_api_endpoint(ctx, &nodepool, &node).await?;
        }

        if ir.deletes_nodes() {
            step += 1;
            self.describe(ctx, format!("deleting nodes ({}/{})", step, total))
                .await?;
            self.delete_nodes(ctx, &ir.to_delete, &ir.removed_pools)
                .await?;
        }

        step += 1;
        self.describe(ctx, format!("applying desired state ({}/{})", step, total))
            .await?;
        self.build_cluster(ctx).await
    }

    /// The full pipeline from `ctx.current` to `ctx.desired`. On success the desired state, as
    /// refined by the engines, becomes the current state.
    pub async fn build_cluster(&self, ctx: &mut BuilderContext) -> Result<()> {
        ctx.desired()?;
        self.provision(ctx).await?;
        self.configure(ctx).await?;
        self.bootstrap(ctx).await?;
        self.configure_in_cluster(ctx).await?;
        ctx.adopt_desired();
        info!("{}: desired state reached", ctx);
        Ok(())
    }

    /// Removes the cluster and everything stored for it. A cluster without current state is
    /// already gone.
    pub async fn destroy(&self, ctx: &mut BuilderContext) -> Result<()> {
        let current = match ctx.current.clone() {
            Some(current) => current,
            None => {
                debug!("{}: nothing to destroy", ctx);
                ctx.desired = None;
                return Ok(());
            }
        };
        let lbs = ctx.current_lbs.clone();

        let previous = self
            .begin(ctx, Stage::DestroyProvisioning, "destroying infrastructure")
            .await?;
        if current.has_static_pools() && current.kubeconfig.is_some() {
            // Static machines outlive the infrastructure, so kubernetes has to be reset on them.
            self.engines
                .bootstrap
                .destroy_cluster(&current, &lbs)
                .await
                .context(ctx.stage_context(Stage::DestroyProvisioning, "reset static nodes"))?;
        }
        self.engines
            .infrastructure
            .destroy_infrastructure(&current, &lbs)
            .await
            .context(ctx.stage_context(Stage::DestroyProvisioning, "destroy infrastructure"))?;

        self.begin(
            ctx,
            Stage::DestroyInClusterConfiguration,
            "deleting cluster secrets",
        )
        .await?;
        let in_cluster = &self.engines.in_cluster;
        let stage = Stage::DestroyInClusterConfiguration;
        in_cluster
            .delete_kubeconfig(&current)
            .await
            .context(ctx.stage_context(stage, "delete kubeconfig"))?;
        in_cluster
            .delete_cluster_metadata(&current)
            .await
            .context(ctx.stage_context(stage, "delete cluster metadata"))?;
        if current.is_autoscaled() {
            in_cluster
                .destroy_autoscaler(&current)
                .await
                .context(ctx.stage_context(stage, "destroy autoscaler"))?;
        }

        ctx.current = None;
        ctx.current_lbs.clear();
        ctx.desired = None;
        ctx.desired_lbs.clear();
        ctx.workflow.describe(previous);
        info!("{}: cluster destroyed", ctx);
        Ok(())
    }

    async fn provision(&self, ctx: &mut BuilderContext) -> Result<()> {
        let previous = self
            .begin(ctx, Stage::Provisioning, "building infrastructure")
            .await?;
        let state = InfrastructureState {
            current: ctx.current.clone(),
            desired: ctx.desired.clone(),
            current_load_balancers: ctx.current_lbs.clone(),
            desired_load_balancers: ctx.desired_lbs.clone(),
        };
        let outcome = self
            .engines
            .infrastructure
            .build_infrastructure(state)
            .await
            .context(ctx.stage_context(Stage::Provisioning, "build infrastructure"))?;

        match outcome {
            InfrastructureOutcome::Built(state) => {
                if state.desired.is_some() {
                    ctx.desired = state.desired;
                }
                ctx.desired_lbs = state.desired_load_balancers;
                ctx.workflow.describe(previous);
                Ok(())
            }
            InfrastructureOutcome::Failed(state) => {
                warn!(
                    "{}: infrastructure only partially built, keeping the reached state",
                    ctx
                );
                ctx.current = state.current;
                ctx.current_lbs = state.current_load_balancers;
                ctx.desired = state.desired;
                ctx.desired_lbs = state.desired_load_balancers;
                error::FailedToBuildInfrastructureSnafu {
                    cluster: ctx.cluster_name(),
                }
                .fail()
            }
        }
    }

    async fn configure(&self, ctx: &mut BuilderContext) -> Result<()> {
        let stage = Stage::Configuration;
        let previous = self.begin(ctx, stage, "configuring nodes").await?;
        let configuration = &self.engines.configuration;

        if !ctx.deleted_lbs.is_empty() {
            self.describe(ctx, "tearing down deleted load balancers")
                .await?;
            let desired = configuration
                .teardown_load_balancers(ctx.desired()?, &ctx.deleted_lbs)
                .await
                .context(ctx.stage_context(stage, "teardown load balancers"))?;
            ctx.desired = Some(desired);
        }

        self.describe(ctx, "installing VPN mesh").await?;
        let state = configuration
            .install_mesh(ctx.desired()?, &ctx.desired_lbs)
            .await
            .context(ctx.stage_context(stage, "install mesh"))?;
        ctx.desired = Some(state.cluster);
        ctx.desired_lbs = state.load_balancers;

        self.describe(ctx, "installing node requirements").await?;
        let desired = configuration
            .install_node_requirements(ctx.desired()?)
            .await
            .context(ctx.stage_context(stage, "install node requirements"))?;
        ctx.desired = Some(desired);

        if !ctx.desired_lbs.is_empty() {
            self.describe(ctx, "setting up load balancers").await?;
            let state = configuration
                .set_up_load_balancers(ctx.desired()?, &ctx.desired_lbs, &ctx.current_lbs)
                .await
                .context(ctx.stage_context(stage, "set up load balancers"))?;
            ctx.desired = Some(state.cluster);
            ctx.desired_lbs = state.load_balancers;
        }

        ctx.workflow.describe(previous);
        Ok(())
    }

    async fn bootstrap(&self, ctx: &mut BuilderContext) -> Result<()> {
        let previous = self
            .begin(ctx, Stage::Bootstrap, "bootstrapping kubernetes")
            .await?;
        let desired = self
            .engines
            .bootstrap
            .build_cluster(ctx.desired()?, &ctx.desired_lbs)
            .await
            .context(ctx.stage_context(Stage::Bootstrap, "build cluster"))?;
        ctx.desired = Some(desired);
        ctx.workflow.describe(previous);
        Ok(())
    }

    async fn configure_in_cluster(&self, ctx: &mut BuilderContext) -> Result<()> {
        let stage = Stage::InClusterConfiguration;
        let previous = self
            .begin(ctx, stage, "configuring in-cluster resources")
            .await?;
        let in_cluster = &self.engines.in_cluster;
        let mut desired = ctx.desired()?.clone();

        let kubeconfig_changed = ctx
            .current
            .as_ref()
            .and_then(|current| current.kubeconfig.as_ref())
            .map(|kubeconfig| Some(kubeconfig) != desired.kubeconfig.as_ref())
            .unwrap_or(false);
        if kubeconfig_changed {
            self.describe(ctx, "patching cluster-info config map").await?;
            in_cluster
                .patch_discovery_config_map(&desired)
                .await
                .context(ctx.stage_context(stage, "patch discovery config map"))?;
        }

        if !ctx.desired_lbs.is_empty() {
            in_cluster
                .store_lb_scrape_config(&desired, &ctx.desired_lbs)
                .await
                .context(ctx.stage_context(stage, "store load balancer scrape config"))?;
        } else if !ctx.current_lbs.is_empty() {
            in_cluster
                .remove_lb_scrape_config(&desired)
                .await
                .context(ctx.stage_context(stage, "remove load balancer scrape config"))?;
        }

        self.describe(ctx, "setting up storage").await?;
        desired = in_cluster
            .set_up_storage(&desired)
            .await
            .context(ctx.stage_context(stage, "set up storage"))?;

        self.describe(ctx, "storing kubeconfig and metadata").await?;
        in_cluster
            .store_kubeconfig(&desired)
            .await
            .context(ctx.stage_context(stage, "store kubeconfig"))?;
        in_cluster
            .store_cluster_metadata(&desired, &ctx.desired_lbs)
            .await
            .context(ctx.stage_context(stage, "store cluster metadata"))?;

        self.describe(ctx, "patching nodes").await?;
        in_cluster
            .patch_nodes(&desired)
            .await
            .context(ctx.stage_context(stage, "patch nodes"))?;

        let currently_autoscaled = ctx
            .current
            .as_ref()
            .map(|current| current.is_autoscaled())
            .unwrap_or(false);
        if desired.is_autoscaled() && !currently_autoscaled {
            self.describe(ctx, "setting up autoscaler").await?;
            in_cluster
                .set_up_autoscaler(&desired)
                .await
                .context(ctx.stage_context(stage, "set up autoscaler"))?;
        } else if !desired.is_autoscaled() && currently_autoscaled {
            self.describe(ctx, "destroying autoscaler").await?;
            if let Some(current) = &ctx.current {
                in_cluster
                    .destroy_autoscaler(current)
                    .await
                    .context(ctx.stage_context(stage, "destroy autoscaler"))?;
            }
        }

        ctx.desired = Some(desired);
        ctx.workflow.describe(previous);
        Ok(())
    }

    /// Enters `stage` and persists the workflow, unless shutdown has been requested. Returns the
    /// description to restore once the stage succeeds.
    async fn begin<S: Into<String>>(
        &self,
        ctx: &mut BuilderContext,
        stage: Stage,
        description: S,
    ) -> Result<String> {
        if self.shutdown.is_cancelled() {
            info!("{}: shutting down, not starting {}", ctx, stage);
            return error::InterruptedSnafu {
                cluster: ctx.cluster_name(),
                stage,
            }
            .fail();
        }
        self.enter(ctx, stage, description).await
    }

    /// Enters `stage` regardless of shutdown, for steps that must not be left half done.
    async fn enter<S: Into<String>>(
        &self,
        ctx: &mut BuilderContext,
        stage: Stage,
        description: S,
    ) -> Result<String> {
        let previous = ctx.workflow.begin(stage, description);
        info!("{}: {} ({})", ctx, stage, ctx.workflow.description);
        self.persist(ctx).await?;
        Ok(previous)
    }

    async fn describe<S: Into<String>>(
        &self,
        ctx: &mut BuilderContext,
        description: S,
    ) -> Result<()> {
        ctx.workflow.describe(description);
        debug!("{}: {}", ctx, ctx.workflow.description);
        self.persist(ctx).await
    }

    /// Records progress. A cluster or task that is gone ends the pass, anything else only costs
    /// the progress report.
    async fn persist(&self, ctx: &BuilderContext) -> Result<()> {
        let result = self
            .engines
            .store
            .update_task_status(&ctx.config, &ctx.cluster, &ctx.task_id, &ctx.workflow)
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound { what }) => error::VanishedSnafu {
                cluster: ctx.cluster_name(),
                what,
            }
            .fail(),
            Err(e) => {
                warn!("{}: unable to record workflow: {}", ctx, e);
                Ok(())
            }
        }
    }
}
