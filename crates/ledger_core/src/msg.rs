use std::time::Instant;

use serde_json::Value;

use crate::{QueryId, TaskEnd, TaskId, TrackedTask};

#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    /// User edited the input line.
    InputChanged { text: String, now: Instant },
    /// User pressed Enter; the line is captured and sent when the debounce fires.
    EnterPressed { now: Instant },
    /// Submit the current input right away.
    InputSubmitted,
    /// Timer tick driving the debounce.
    Tick { now: Instant },
    /// Graph (query context) picked or cleared.
    ContextSelected(Option<String>),
    /// Rows streamed for a running query.
    QueryRows { query_id: QueryId, rows: Vec<Value> },
    QueryFinished {
        query_id: QueryId,
        outcome: QueryOutcome,
    },
    /// User asked to stop the running query.
    QueryCancelRequested,
    AgentReplied(Result<AgentReply, String>),
    /// A backend operation should be tracked.
    TaskTracked { task_id: TaskId, label: Option<String> },
    /// User stopped tracking an operation.
    TaskCancelled { task_id: TaskId },
    /// Poll response for a tracked operation.
    TaskUpdated(TrackedTask),
    /// The poller dropped an operation.
    TaskEnded { task_id: TaskId, end: TaskEnd },
    /// Host-originated informational line.
    Notice(String),
    /// Host-originated failure line.
    Failure(String),
    /// Console is going away; pending timers are dropped.
    Shutdown,
    /// Fallback for placeholder wiring.
    NoOp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    Completed { row_count: usize },
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentReply {
    /// Cypher the agent ran, if it reports one.
    pub query: Option<String>,
    pub content: String,
    pub data: Option<Value>,
}
