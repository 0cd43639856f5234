use crate::error::{self, Result};
use reconciler_model::{
    ClusterSnapshot, ClusterState, DeleteEvent, LoadBalancerSnapshot, Stage, Task, TaskEvent,
    UpdateEvent, Workflow,
};
use snafu::OptionExt;
use std::fmt::{Display, Formatter};

/// Everything the builder knows about one cluster while it works on it. The stages mutate
/// `current` and `desired` as engines return refined states, so after a failure `current` is the
/// best known description of what actually exists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuilderContext {
    pub config: String,
    pub task_id: String,
    /// Cluster name, known even when both states are absent.
    pub cluster: String,
    pub current: Option<ClusterSnapshot>,
    pub desired: Option<ClusterSnapshot>,
    pub current_lbs: Vec<LoadBalancerSnapshot>,
    pub desired_lbs: Vec<LoadBalancerSnapshot>,
    pub deleted_lbs: Vec<LoadBalancerSnapshot>,
    pub workflow: Workflow,
}

impl BuilderContext {
    pub fn new<S1, S2, S3>(config: S1, task_id: S2, cluster: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self {
            config: config.into(),
            task_id: task_id.into(),
            cluster: cluster.into(),
            ..Self::default()
        }
    }

    /// Seeds a context from a task: `current` from the committed state, `desired` from the event.
    pub fn from_task(task: &Task) -> Self {
        let mut ctx = Self::new(&task.config, &task.id, &task.cluster);
        ctx.workflow = task.workflow.clone();
        if let Some(state) = &task.current {
            ctx.current = Some(state.cluster.clone());
            ctx.current_lbs = state.load_balancers.clone();
        }
        match &task.event {
            TaskEvent::Create { desired } => {
                ctx.current = None;
                ctx.current_lbs.clear();
                ctx.desired = Some(desired.cluster.clone());
                ctx.desired_lbs = desired.load_balancers.clone();
            }
            TaskEvent::Update(UpdateEvent::ApiEndpoint { .. }) => {
                ctx.desired = None;
            }
            TaskEvent::Update(UpdateEvent::State {
                desired,
                deleted_load_balancers,
            }) => {
                ctx.desired = Some(desired.cluster.clone());
                ctx.desired_lbs = desired.load_balancers.clone();
                ctx.deleted_lbs = deleted_load_balancers.clone();
            }
            TaskEvent::Delete(DeleteEvent::Nodes { desired }) => {
                ctx.desired = Some(desired.clone());
                ctx.desired_lbs = ctx.current_lbs.clone();
            }
            TaskEvent::Delete(DeleteEvent::Cluster) => {
                ctx.desired = None;
            }
        }
        ctx
    }

    /// The cluster name, taken from whichever state is present.
    pub fn cluster_name(&self) -> &str {
        self.current
            .as_ref()
            .or(self.desired.as_ref())
            .map(|cluster| cluster.name.as_str())
            .unwrap_or(self.cluster.as_str())
    }

    pub fn current(&self) -> Result<&ClusterSnapshot> {
        self.current.as_ref().context(error::MissingStateSnafu {
            cluster: self.cluster_name(),
            which: "current",
        })
    }

    pub fn desired(&self) -> Result<&ClusterSnapshot> {
        self.desired.as_ref().context(error::MissingStateSnafu {
            cluster: self.cluster_name(),
            which: "desired",
        })
    }

    /// The state to commit to the store, `None` once the cluster is gone.
    pub fn current_state(&self) -> Option<ClusterState> {
        self.current.as_ref().map(|cluster| ClusterState {
            cluster: cluster.clone(),
            load_balancers: self.current_lbs.clone(),
        })
    }

    /// Record that the desired state has been reached.
    pub(crate) fn adopt_desired(&mut self) {
        self.current = self.desired.clone();
        self.current_lbs = self.desired_lbs.clone();
        self.deleted_lbs.clear();
    }

    /// Context selector for engine errors raised during `stage`.
    pub(crate) fn stage_context<S: Into<String>>(
        &self,
        stage: Stage,
        step: S,
    ) -> error::StageSnafu<Stage, String, String, String> {
        error::StageSnafu {
            stage,
            step: step.into(),
            cluster: self.cluster_name().to_string(),
            config: self.config.clone(),
        }
    }
}

impl Display for BuilderContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "config '{}' cluster '{}' task '{}'",
            self.config,
            self.cluster_name(),
            self.task_id
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use reconciler_model::{ClusterState, WorkflowStatus};

    fn state(name: &str, version: &str) -> ClusterState {
        ClusterState {
            cluster: ClusterSnapshot {
                name: name.into(),
                hash: "h".into(),
                kubernetes_version: version.into(),
                ..Default::default()
            },
            load_balancers: vec![LoadBalancerSnapshot {
                name: format!("{}-lb", version),
                target_cluster: name.into(),
                ..Default::default()
            }],
        }
    }

    fn task(current: Option<ClusterState>, event: TaskEvent) -> Task {
        Task {
            id: "t1".into(),
            config: "prod".into(),
            cluster: "alpha".into(),
            current,
            event,
            workflow: Workflow::default(),
        }
    }

    #[test]
    fn create_ignores_committed_state() {
        let ctx = BuilderContext::from_task(&task(
            Some(state("alpha", "1.26")),
            TaskEvent::Create {
                desired: state("alpha", "1.27"),
            },
        ));
        assert!(ctx.current.is_none());
        assert!(ctx.current_lbs.is_empty());
        assert_eq!(ctx.desired().unwrap().kubernetes_version, "1.27");
        assert_eq!(ctx.desired_lbs[0].name, "1.27-lb");
        assert_eq!(ctx.workflow.status, WorkflowStatus::InProgress);
    }

    #[test]
    fn delete_nodes_keeps_load_balancers() {
        let ctx = BuilderContext::from_task(&task(
            Some(state("alpha", "1.26")),
            TaskEvent::Delete(DeleteEvent::Nodes {
                desired: state("alpha", "1.26").cluster,
            }),
        ));
        assert_eq!(ctx.desired_lbs, ctx.current_lbs);
        assert!(ctx.current().is_ok());
    }

    #[test]
    fn missing_state_and_display() {
        let ctx = BuilderContext::from_task(&task(None, TaskEvent::Delete(DeleteEvent::Cluster)));
        assert!(ctx.current().is_err());
        assert!(ctx.desired().is_err());
        assert_eq!(ctx.to_string(), "config 'prod' cluster 'alpha' task 't1'");
        assert!(ctx.current_state().is_none());
    }

    #[test]
    fn adopt_desired_clears_deleted_load_balancers() {
        let mut ctx = BuilderContext::from_task(&task(
            Some(state("alpha", "1.26")),
            TaskEvent::Update(UpdateEvent::State {
                desired: state("alpha", "1.27"),
                deleted_load_balancers: state("alpha", "old").load_balancers,
            }),
        ));
        assert_eq!(ctx.deleted_lbs.len(), 1);
        ctx.adopt_desired();
        assert!(ctx.deleted_lbs.is_empty());
        assert_eq!(ctx.current_state().unwrap(), state("alpha", "1.27"));
    }
}
