//! Task requests and their results.

use serde::{Deserialize, Serialize};

use crate::ids::TaskId;

/// A single unit of work assigned by the control plane.
///
/// Both fields default to empty so that any JSON object decodes; requests
/// that carry no task identifier are not actionable and are dropped by the
/// agent without a report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Job correlation identifier.
    #[serde(default)]
    pub task_id: TaskId,

    /// Name of the artifact to fetch and run.
    #[serde(default)]
    pub test: String,
}

impl TaskRequest {
    /// Create a new request.
    pub fn new(task_id: impl Into<TaskId>, test: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            test: test.into(),
        }
    }

    /// Returns true if the request identifies a job and should be executed.
    pub fn is_actionable(&self) -> bool {
        !self.task_id.is_empty()
    }
}

/// Status reported for a finished task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// The artifact exited with status zero.
    Success,
    /// The artifact exited non-zero or could not be launched.
    Failed,
}

/// Outcome of running an artifact.
///
/// Error text exists only on the `Failed` variant, which keeps
/// `status == "failed"` and the presence of `error` in lockstep on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TaskOutcome {
    Success,
    Failed {
        /// Captured process output followed by the exit description.
        error: String,
    },
}

impl TaskOutcome {
    /// Create a failed outcome.
    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }

    /// Status of this outcome.
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Success => TaskStatus::Success,
            Self::Failed { .. } => TaskStatus::Failed,
        }
    }

    /// Error text, present only for failures.
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Success => None,
            Self::Failed { error } => Some(error),
        }
    }
}

/// Result of one task, as sent back to the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Artifact name from the originating request.
    pub name: String,

    /// How the run ended.
    #[serde(rename = "result")]
    pub outcome: TaskOutcome,
}

impl TaskResult {
    /// Create a new result.
    pub fn new(name: impl Into<String>, outcome: TaskOutcome) -> Self {
        Self {
            name: name.into(),
            outcome,
        }
    }

    /// Returns true if the task passed.
    pub fn is_success(&self) -> bool {
        self.outcome.status() == TaskStatus::Success
    }
}
