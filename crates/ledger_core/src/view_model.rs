use crate::{MessageId, QueryStatus, TaskId, TaskStatus};

#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleViewModel {
    pub console_name: String,
    pub context_id: Option<String>,
    pub input: String,
    pub message_count: usize,
    pub last_message_id: Option<MessageId>,
    pub query_status: QueryStatus,
    pub query_row_count: usize,
    pub pending_agent_requests: usize,
    pub tasks: Vec<TaskRowView>,
    pub dirty: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskRowView {
    pub task_id: TaskId,
    pub label: Option<String>,
    pub status: TaskStatus,
    pub message: String,
    pub progress: Option<f64>,
    pub step: Option<String>,
}
