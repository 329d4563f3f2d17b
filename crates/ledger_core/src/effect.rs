use crate::{QueryId, TaskId};

/// Side effects requested by `update`, executed by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Drop any previous streaming query and its results.
    ResetQuery,
    ExecuteQuery {
        query_id: QueryId,
        context_id: String,
        query: String,
    },
    CancelQuery,
    AskAgent {
        context_id: String,
        message: String,
        mode: String,
    },
    TrackTask {
        task_id: TaskId,
    },
    CancelTask {
        task_id: TaskId,
    },
    /// An extra command registered with `ExtraAction::Host`.
    HostCommand {
        name: String,
        argument: String,
    },
}
