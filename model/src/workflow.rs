use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// The phase of the reconciliation pipeline a cluster is currently in.
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Clone, Copy, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    #[serde(rename = "NONE")]
    None,
    Provisioning,
    Configuration,
    Bootstrap,
    InClusterConfiguration,
    DestroyProvisioning,
    DestroyInClusterConfiguration,
    DeleteNodes,
}

impl Default for Stage {
    fn default() -> Self {
        Self::None
    }
}

serde_plain::derive_fromstr_from_deserialize!(Stage, |e| -> crate::Error {
    crate::error::OpaqueError::SerdePlain { source: e }.into()
});
serde_plain::derive_display_from_serialize!(Stage);

#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Clone, Copy, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    InProgress,
    Done,
    Error,
}

impl Default for WorkflowStatus {
    fn default() -> Self {
        Self::InProgress
    }
}

serde_plain::derive_fromstr_from_deserialize!(WorkflowStatus, |e| -> crate::Error {
    crate::error::OpaqueError::SerdePlain { source: e }.into()
});
serde_plain::derive_display_from_serialize!(WorkflowStatus);

/// Per-cluster reconciliation progress. This is the only failure signal a user sees, so it is
/// persisted every time the stage changes.
#[derive(Serialize, Deserialize, Debug, Default, Eq, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub stage: Stage,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub description: String,
}

impl Workflow {
    /// A fresh record for a cluster that just appeared in current or desired state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter `stage`. Returns the description that was active before so that it can be restored
    /// once the stage succeeds.
    pub fn begin<S: Into<String>>(&mut self, stage: Stage, description: S) -> String {
        self.stage = stage;
        self.status = WorkflowStatus::InProgress;
        std::mem::replace(&mut self.description, description.into())
    }

    pub fn describe<S: Into<String>>(&mut self, description: S) {
        self.description = description.into();
    }

    /// Mark the record as failed, keeping the stage that failed.
    pub fn fail<E: Display>(&mut self, error: E) {
        self.status = WorkflowStatus::Error;
        self.description = if self.description.is_empty() {
            error.to_string()
        } else {
            format!("{}: {}", self.description, error)
        };
    }

    /// Clear the record after a successful pass.
    pub fn complete(&mut self) {
        self.stage = Stage::None;
        self.status = WorkflowStatus::Done;
        self.description.clear();
    }

    pub fn is_error(&self) -> bool {
        self.status == WorkflowStatus::Error
    }
}
