use std::fmt;
use std::time::Duration;

use serde_json::Value;

/// Opaque operation identifier assigned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Retrying,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Retrying => "retrying",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

/// Latest known state of a backend operation.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedTask {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub message: String,
    /// Percentage in 0..=100.
    pub progress: Option<f64>,
    pub step: Option<String>,
    /// Only set when `status` is `Failed`.
    pub error: Option<String>,
    /// Only set when `status` is `Completed`.
    pub result: Option<Value>,
}

impl TrackedTask {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            status: TaskStatus::Pending,
            message: "Waiting for first status".to_string(),
            progress: None,
            step: None,
            error: None,
            result: None,
        }
    }

    /// Clamps progress and drops fields that do not belong to the status.
    pub fn normalized(mut self) -> Self {
        self.progress = self
            .progress
            .filter(|value| value.is_finite())
            .map(|value| value.clamp(0.0, 100.0));
        if self.status != TaskStatus::Failed {
            self.error = None;
        }
        if self.status != TaskStatus::Completed {
            self.result = None;
        }
        self
    }

    /// Whether `other` differs in anything worth announcing.
    pub(crate) fn progressed_from(&self, other: &TrackedTask) -> bool {
        self.status != other.status
            || self.progress != other.progress
            || self.step != other.step
            || self.message != other.message
    }

    /// Text shown when a completed operation carries a result.
    pub fn result_text(&self) -> Option<String> {
        let result = self.result.as_ref()?;
        Some(match result {
            Value::String(text) => text.clone(),
            Value::Object(map) => ["response", "message", "content"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .map(ToOwned::to_owned)
                .unwrap_or_else(|| pretty_json(result)),
            other => pretty_json(other),
        })
    }
}

pub(crate) fn pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Why a task left the active set on the poller's side.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEnd {
    /// The backend reported a terminal status.
    Finished(TrackedTask),
    /// No terminal status within the maximum wait.
    TimedOut { after: Duration },
    /// Too many consecutive status requests failed.
    Unreachable { failures: u32 },
}
