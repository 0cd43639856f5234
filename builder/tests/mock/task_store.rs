use builder::clients::{StoreError, StoreResult, TaskStore};
use reconciler_model::{ClusterState, Task, Workflow};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// A committed current state, keyed by cluster name.
pub(crate) type Commit = (String, Option<ClusterState>);

/// An in-memory task store. Conflicts and vanished clusters can be injected.
#[derive(Clone, Default)]
pub(crate) struct MockTaskStore {
    tasks: Arc<Mutex<VecDeque<Task>>>,
    commits: Arc<Mutex<Vec<Commit>>>,
    workflows: Arc<Mutex<Vec<Workflow>>>,
    conflicts: Arc<AtomicU32>,
    vanished: Arc<AtomicBool>,
    /// Workflow writes that succeed before the cluster vanishes.
    writes_before_vanishing: Arc<Mutex<Option<u32>>>,
}

impl MockTaskStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_task(&self, task: Task) {
        self.tasks.lock().unwrap().push_back(task);
    }

    /// The next `times` state updates are rejected as conflicting writes.
    pub(crate) fn conflict(&self, times: u32) {
        self.conflicts.store(times, Ordering::SeqCst);
    }

    /// Every write from now on finds the cluster gone.
    pub(crate) fn vanish(&self) {
        self.vanished.store(true, Ordering::SeqCst);
    }

    /// The cluster vanishes once `writes` workflow updates have gone through.
    pub(crate) fn vanish_after(&self, writes: u32) {
        *self.writes_before_vanishing.lock().unwrap() = Some(writes);
    }

    pub(crate) fn commits(&self) -> Vec<Commit> {
        self.commits.lock().unwrap().clone()
    }

    /// Every workflow written, in order.
    pub(crate) fn workflows(&self) -> Vec<Workflow> {
        self.workflows.lock().unwrap().clone()
    }

    pub(crate) fn last_workflow(&self) -> Option<Workflow> {
        self.workflows.lock().unwrap().last().cloned()
    }

    fn check_exists(&self, what: String) -> StoreResult<()> {
        if self.vanished.load(Ordering::SeqCst) {
            return Err(StoreError::NotFound { what });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl TaskStore for MockTaskStore {
    async fn next_task(&self) -> StoreResult<Option<Task>> {
        Ok(self.tasks.lock().unwrap().pop_front())
    }

    async fn update_current_state(
        &self,
        config: &str,
        cluster: &str,
        state: Option<&ClusterState>,
    ) -> StoreResult<()> {
        let what = format!("{}/{}", config, cluster);
        self.check_exists(what.clone())?;
        let conflicted = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if conflicted {
            return Err(StoreError::ConflictingWrite { what });
        }
        self.commits
            .lock()
            .unwrap()
            .push((cluster.to_string(), state.cloned()));
        Ok(())
    }

    async fn update_task_status(
        &self,
        config: &str,
        cluster: &str,
        task_id: &str,
        workflow: &Workflow,
    ) -> StoreResult<()> {
        if let Some(writes) = self.writes_before_vanishing.lock().unwrap().as_mut() {
            match writes.checked_sub(1) {
                Some(left) => *writes = left,
                None => self.vanish(),
            }
        }
        self.check_exists(format!("{}/{}/{}", config, cluster, task_id))?;
        self.workflows.lock().unwrap().push(workflow.clone());
        Ok(())
    }
}
