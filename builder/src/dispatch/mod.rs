/*!

The dispatch loop. Once per tick it asks the task store for the next task, runs it in the
background with at most `max_in_flight` tasks running at once, and commits the resulting cluster
state and workflow back to the store.

The store never hands out two tasks for the same cluster at once, so tasks that run concurrently
never share a [`BuilderContext`].

!*/

mod commit;

use crate::clients::TaskStore;
use crate::context::BuilderContext;
use crate::plan::{nodes_to_delete, removed_pools};
use crate::workflow::Builder;
use crate::Result;
use log::{debug, error, info, warn};
use reconciler_model::constants::{
    COMMIT_BACKOFF_INITIAL_MS, COMMIT_BACKOFF_MAX_MS, DESTROY_ATTEMPTS,
};
use reconciler_model::{DeleteEvent, Task, TaskEvent, UpdateEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Tunables of the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    pub poll_interval: Duration,
    /// Maximum number of tasks processed concurrently.
    pub max_in_flight: usize,
    /// Attempts at destroying a whole cluster before the error is recorded.
    pub destroy_attempts: u32,
    /// Pause between destroy attempts.
    pub destroy_backoff: Duration,
    pub commit_backoff_initial: Duration,
    pub commit_backoff_max: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_in_flight: reconciler_model::constants::DEFAULT_MAX_IN_FLIGHT,
            destroy_attempts: DESTROY_ATTEMPTS,
            destroy_backoff: Duration::from_secs(5),
            commit_backoff_initial: Duration::from_millis(COMMIT_BACKOFF_INITIAL_MS),
            commit_backoff_max: Duration::from_millis(COMMIT_BACKOFF_MAX_MS),
        }
    }
}

/// How processing a task ended, as far as the store is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The state and workflow were committed.
    Committed,
    /// The cluster or task was deleted in the meantime. Nothing was committed.
    Vanished,
    /// The commit failed for another reason, or was abandoned because of shutdown.
    Failed,
}

#[derive(Clone)]
pub struct Dispatcher {
    builder: Arc<Builder>,
    store: Arc<dyn TaskStore>,
    settings: DispatchSettings,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(builder: Builder, settings: DispatchSettings, shutdown: CancellationToken) -> Self {
        let store = builder.engines().store.clone();
        Self {
            builder: Arc::new(builder),
            store,
            settings,
            shutdown,
        }
    }

    /// Polls until shutdown is requested, then waits for the tasks in flight. Those stop at their
    /// next stage boundary and still commit what they reached.
    pub async fn run(&self) {
        let permits = Arc::new(Semaphore::new(self.settings.max_in_flight.max(1)));
        let tracker = TaskTracker::new();
        let mut interval = tokio::time::interval(self.settings.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Dispatching tasks every {:?}, at most {} at a time",
            self.settings.poll_interval, self.settings.max_in_flight
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            let permit = match permits.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    debug!("All {} task slots busy", self.settings.max_in_flight);
                    continue;
                }
            };
            let task = match self.store.next_task().await {
                Ok(Some(task)) => task,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Unable to get the next task: {}", e);
                    continue;
                }
            };
            let dispatcher = self.clone();
            tracker.spawn(async move {
                let _permit = permit;
                dispatcher.process(task).await;
            });
        }

        tracker.close();
        info!("Shutting down, waiting for {} task(s)", tracker.len());
        tracker.wait().await;
        info!("Dispatch loop stopped");
    }

    /// Runs one task to completion and commits the result.
    pub async fn process(&self, task: Task) -> TaskOutcome {
        let mut ctx = BuilderContext::from_task(&task);
        info!("{}: processing {} task", ctx, task.event.kind());

        let result = match &task.event {
            TaskEvent::Create { .. } => self.builder.create(&mut ctx).await,
            TaskEvent::Update(UpdateEvent::ApiEndpoint { nodepool, node }) => {
                self.builder
                    .replace_api_endpoint(&mut ctx, nodepool, node)
                    .await
            }
            TaskEvent::Update(UpdateEvent::State { .. }) => self.builder.reconcile(&mut ctx).await,
            TaskEvent::Delete(DeleteEvent::Nodes { .. }) => self.delete_nodes(&mut ctx).await,
            TaskEvent::Delete(DeleteEvent::Cluster) => self.destroy_with_retry(&mut ctx).await,
        };

        match result {
            Ok(()) => {
                ctx.workflow.complete();
                info!("{}: {} task done", ctx, task.event.kind());
            }
            Err(e) if e.is_vanished() => {
                debug!("{}: {}, nothing to commit", ctx, e);
                return TaskOutcome::Vanished;
            }
            Err(e) if e.is_interrupted() => {
                info!("{}: {}", ctx, e);
            }
            Err(e) => {
                error!("{}: {}", ctx, e);
                ctx.workflow.fail(&e);
            }
        }

        self.commit(&ctx).await
    }

    async fn delete_nodes(&self, ctx: &mut BuilderContext) -> Result<()> {
        let (current, desired) = (ctx.current()?, ctx.desired()?);
        let to_delete = nodes_to_delete(current, desired);
        let removed = removed_pools(current, desired);
        self.builder.delete_nodes(ctx, &to_delete, &removed).await
    }

    /// Destroy is attempted a fixed number of times. Engines treat destroy declaratively, so an
    /// attempt picks up whatever the previous one left behind.
    async fn destroy_with_retry(&self, ctx: &mut BuilderContext) -> Result<()> {
        let attempts = self.settings.destroy_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.builder.destroy(ctx).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_interrupted() || e.is_vanished() || attempt >= attempts => {
                    return Err(e)
                }
                Err(e) => {
                    warn!(
                        "{}: destroy attempt {}/{} failed: {}",
                        ctx, attempt, attempts, e
                    );
                    attempt += 1;
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return Err(e),
                        _ = tokio::time::sleep(self.settings.destroy_backoff) => {}
                    }
                }
            }
        }
    }
}
