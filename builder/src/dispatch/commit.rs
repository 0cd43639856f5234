use super::{Dispatcher, TaskOutcome};
use crate::clients::{StoreError, StoreResult};
use crate::context::BuilderContext;
use log::{debug, error, info};
use std::cmp::min;

impl Dispatcher {
    /// Writes the reached state and the final workflow to the store. Conflicting writes are
    /// retried with a capped exponential backoff until they succeed or shutdown is requested. A
    /// vanished cluster or task ends the commit without error.
    pub(super) async fn commit(&self, ctx: &BuilderContext) -> TaskOutcome {
        let mut backoff = self.settings.commit_backoff_initial;
        loop {
            match self.try_commit(ctx).await {
                Ok(()) => {
                    debug!("{}: committed", ctx);
                    return TaskOutcome::Committed;
                }
                Err(StoreError::ConflictingWrite { what }) => {
                    debug!(
                        "{}: conflicting write to {}, retrying in {:?}",
                        ctx, what, backoff
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => {
                            info!("{}: shutting down, commit abandoned", ctx);
                            return TaskOutcome::Failed;
                        }
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = min(backoff * 2, self.settings.commit_backoff_max);
                }
                Err(StoreError::NotFound { what }) => {
                    debug!("{}: {} is gone, nothing to commit", ctx, what);
                    return TaskOutcome::Vanished;
                }
                Err(e) => {
                    error!("{}: unable to commit: {}", ctx, e);
                    return TaskOutcome::Failed;
                }
            }
        }
    }

    async fn try_commit(&self, ctx: &BuilderContext) -> StoreResult<()> {
        let state = ctx.current_state();
        self.store
            .update_current_state(&ctx.config, &ctx.cluster, state.as_ref())
            .await?;
        self.store
            .update_task_status(&ctx.config, &ctx.cluster, &ctx.task_id, &ctx.workflow)
            .await
    }
}
