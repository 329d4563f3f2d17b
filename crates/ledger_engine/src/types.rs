use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type QuerySeq = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    #[serde(alias = "running")]
    InProgress,
    Completed,
    Failed,
    Retrying,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// Body of `GET /operations/{operation_id}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OperationStatus {
    #[serde(alias = "operation_id")]
    pub task_id: String,
    pub status: TaskState,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub step: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
}

/// A response body validated at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse<T> {
    Parsed(T),
    /// The body did not match the expected shape; kept raw for logging.
    Malformed(String),
}

impl<T: DeserializeOwned> ApiResponse<T> {
    pub fn from_body(body: &str) -> Self {
        match serde_json::from_str(body) {
            Ok(parsed) => ApiResponse::Parsed(parsed),
            Err(_) => ApiResponse::Malformed(body.to_string()),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn into_result(self) -> Result<T, ClientError> {
        match self {
            ApiResponse::Parsed(value) => Ok(value),
            ApiResponse::Malformed(raw) => Err(ClientError::new(
                FailureKind::Malformed,
                format!("unexpected response body: {}", truncate(&raw, 200)),
            )),
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Why the poller stopped watching a task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEnd {
    Terminal(OperationStatus),
    TimedOut { after: Duration },
    Unreachable { failures: u32 },
}

/// One NDJSON line of a streaming query response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryChunk {
    Rows { rows: Vec<Value> },
    Complete {
        #[serde(default)]
        row_count: Option<usize>,
    },
    Error { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuerySummary {
    pub row_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentRequest {
    pub message: String,
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentReply {
    #[serde(default)]
    pub query: Option<String>,
    pub result: Value,
}

impl AgentReply {
    /// Display text: `result.content` when present, else the raw result.
    pub fn content(&self) -> String {
        match &self.result {
            Value::String(text) => text.clone(),
            Value::Object(map) => match map.get("content").and_then(Value::as_str) {
                Some(text) => text.to_string(),
                None => serde_json::to_string_pretty(&self.result)
                    .unwrap_or_else(|_| self.result.to_string()),
            },
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct SyncStarted {
    #[serde(alias = "task_id")]
    pub(crate) operation_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    TaskUpdated(OperationStatus),
    TaskEnded {
        task_id: String,
        end: TaskEnd,
    },
    TaskPollFailed {
        task_id: String,
        error: ClientError,
    },
    QueryRows {
        query_id: QuerySeq,
        rows: Vec<Value>,
    },
    QueryFinished {
        query_id: QuerySeq,
        result: Result<QuerySummary, ClientError>,
    },
    AgentReplied {
        result: Result<AgentReply, ClientError>,
    },
    SyncStarted {
        connection_id: String,
        result: Result<String, ClientError>,
    },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ClientError {
    pub kind: FailureKind,
    pub message: String,
}

impl ClientError {
    pub(crate) fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "cancelled by user")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    Malformed,
    /// The backend reported the failure itself.
    Remote,
    Cancelled,
    Network,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Malformed => write!(f, "malformed response"),
            FailureKind::Remote => write!(f, "backend error"),
            FailureKind::Cancelled => write!(f, "cancelled"),
            FailureKind::Network => write!(f, "network error"),
        }
    }
}
