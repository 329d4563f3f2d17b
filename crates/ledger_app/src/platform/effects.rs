use ledger_core::{
    AgentReply, ConsoleViewModel, Effect, ExtraCommand, Msg, QueryId, QueryOutcome, TaskEnd,
    TaskId, TaskStatus, TrackedTask,
};
use ledger_engine::{ClientError, EngineEvent, EngineHandle, FailureKind, OperationStatus, TaskState};
use ledger_logging::{ledger_info, ledger_warn};

/// Commands the console hands to this binary instead of the core.
pub fn host_commands() -> Vec<ExtraCommand> {
    vec![
        ExtraCommand::host("use", "Select a graph (/use <graph_id>); /use alone clears it"),
        ExtraCommand::host("sync", "Sync a connection and track the operation"),
        ExtraCommand::host("track", "Track a backend operation by id"),
        ExtraCommand::host("untrack", "Stop tracking an operation"),
        ExtraCommand::host("tasks", "List tracked operations"),
        ExtraCommand::host("cancel", "Cancel the running query"),
        ExtraCommand::host("quit", "Leave the console"),
    ]
}

/// The engine calls the runner needs.
pub trait EngineCommands {
    fn track(&self, task_id: &str);
    fn cancel_task(&self, task_id: &str);
    fn execute_query(&self, query_id: u64, graph_id: &str, query: &str);
    fn cancel_query(&self);
    fn reset_query(&self);
    fn ask_agent(&self, graph_id: &str, message: &str, mode: &str);
    fn sync_connection(&self, connection_id: &str);
    fn next_event(&self) -> Option<EngineEvent>;
}

impl EngineCommands for EngineHandle {
    fn track(&self, task_id: &str) {
        EngineHandle::track(self, task_id);
    }

    fn cancel_task(&self, task_id: &str) {
        EngineHandle::cancel_task(self, task_id);
    }

    fn execute_query(&self, query_id: u64, graph_id: &str, query: &str) {
        EngineHandle::execute_query(self, query_id, graph_id, query);
    }

    fn cancel_query(&self) {
        EngineHandle::cancel_query(self);
    }

    fn reset_query(&self) {
        EngineHandle::reset_query(self);
    }

    fn ask_agent(&self, graph_id: &str, message: &str, mode: &str) {
        EngineHandle::ask_agent(self, graph_id, message, mode);
    }

    fn sync_connection(&self, connection_id: &str) {
        EngineHandle::sync_connection(self, connection_id);
    }

    fn next_event(&self) -> Option<EngineEvent> {
        self.try_recv()
    }
}

/// Executes core effects against the engine and turns engine events back
/// into core messages.
pub struct EffectRunner<E: EngineCommands> {
    engine: E,
    pending_syncs: usize,
}

impl<E: EngineCommands> EffectRunner<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            pending_syncs: 0,
        }
    }

    /// True when no sync request is waiting for its operation id.
    pub fn is_idle(&self) -> bool {
        self.pending_syncs == 0
    }

    /// Runs effects; host commands may answer with follow-up messages.
    pub fn run(&mut self, view: &ConsoleViewModel, effects: Vec<Effect>) -> Vec<Msg> {
        let mut follow_up = Vec::new();
        for effect in effects {
            match effect {
                Effect::ResetQuery => self.engine.reset_query(),
                Effect::ExecuteQuery {
                    query_id,
                    context_id,
                    query,
                } => {
                    ledger_info!(
                        "ExecuteQuery id={} graph={} query_len={}",
                        query_id,
                        context_id,
                        query.len()
                    );
                    self.engine
                        .execute_query(query_id.value(), &context_id, &query);
                }
                Effect::CancelQuery => self.engine.cancel_query(),
                Effect::AskAgent {
                    context_id,
                    message,
                    mode,
                } => {
                    ledger_info!("AskAgent graph={} mode={}", context_id, mode);
                    self.engine.ask_agent(&context_id, &message, &mode);
                }
                Effect::TrackTask { task_id } => self.engine.track(task_id.as_str()),
                Effect::CancelTask { task_id } => self.engine.cancel_task(task_id.as_str()),
                Effect::HostCommand { name, argument } => {
                    follow_up.extend(self.host_command(view, &name, argument.trim()));
                }
            }
        }
        follow_up
    }

    fn host_command(&mut self, view: &ConsoleViewModel, name: &str, argument: &str) -> Vec<Msg> {
        let msg = match name {
            "use" if argument.is_empty() => Msg::ContextSelected(None),
            "use" => Msg::ContextSelected(Some(argument.to_string())),
            "sync" if argument.is_empty() => usage("/sync <connection_id>"),
            "sync" => {
                self.pending_syncs += 1;
                self.engine.sync_connection(argument);
                Msg::Notice(format!("Starting sync for connection {argument}."))
            }
            "track" if argument.is_empty() => usage("/track <task_id>"),
            "track" => Msg::TaskTracked {
                task_id: TaskId::new(argument),
                label: None,
            },
            "untrack" if argument.is_empty() => usage("/untrack <task_id>"),
            "untrack" => Msg::TaskCancelled {
                task_id: TaskId::new(argument),
            },
            "tasks" => Msg::Notice(describe_tasks(view)),
            "cancel" => Msg::QueryCancelRequested,
            "quit" => Msg::Shutdown,
            other => Msg::Failure(format!("Unknown command: /{other}")),
        };
        vec![msg]
    }

    /// Converts every engine event received so far.
    pub fn drain_events(&mut self) -> Vec<Msg> {
        let mut msgs = Vec::new();
        while let Some(event) = self.engine.next_event() {
            if let Some(msg) = self.map_event(event) {
                msgs.push(msg);
            }
        }
        msgs
    }

    fn map_event(&mut self, event: EngineEvent) -> Option<Msg> {
        match event {
            EngineEvent::TaskUpdated(status) => Some(Msg::TaskUpdated(map_status(status))),
            EngineEvent::TaskEnded { task_id, end } => Some(Msg::TaskEnded {
                task_id: TaskId::new(task_id),
                end: map_end(end),
            }),
            EngineEvent::TaskPollFailed { task_id, error } => {
                ledger_warn!("Status check for {} failed: {}", task_id, error);
                None
            }
            EngineEvent::QueryRows { query_id, rows } => Some(Msg::QueryRows {
                query_id: QueryId::new(query_id),
                rows,
            }),
            EngineEvent::QueryFinished { query_id, result } => Some(Msg::QueryFinished {
                query_id: QueryId::new(query_id),
                outcome: match result {
                    Ok(summary) => QueryOutcome::Completed {
                        row_count: summary.row_count,
                    },
                    Err(err) if err.kind == FailureKind::Cancelled => QueryOutcome::Cancelled,
                    Err(err) => QueryOutcome::Failed(describe_error(&err)),
                },
            }),
            EngineEvent::AgentReplied { result } => Some(Msg::AgentReplied(
                result
                    .map(|reply| AgentReply {
                        content: reply.content(),
                        data: reply.result.get("data").cloned(),
                        query: reply.query,
                    })
                    .map_err(|err| describe_error(&err)),
            )),
            EngineEvent::SyncStarted {
                connection_id,
                result,
            } => {
                self.pending_syncs = self.pending_syncs.saturating_sub(1);
                Some(match result {
                    Ok(operation_id) => Msg::TaskTracked {
                        task_id: TaskId::new(operation_id),
                        label: Some(format!("sync {connection_id}")),
                    },
                    Err(err) => Msg::Failure(format!(
                        "Could not start sync for connection {connection_id}: {}",
                        describe_error(&err)
                    )),
                })
            }
        }
    }
}

fn usage(text: &str) -> Msg {
    Msg::Failure(format!("Usage: {text}"))
}

fn describe_tasks(view: &ConsoleViewModel) -> String {
    if view.tasks.is_empty() {
        return "No operations are being tracked.".to_string();
    }
    let mut text = format!("Tracking {} operation(s):", view.tasks.len());
    for task in &view.tasks {
        text.push_str(&format!("\n  {} {}", task.task_id, task.status.label()));
        if let Some(progress) = task.progress {
            text.push_str(&format!(" {progress:.0}%"));
        }
        if let Some(label) = &task.label {
            text.push_str(&format!(" [{label}]"));
        }
        if !task.message.is_empty() {
            text.push_str(&format!(": {}", task.message));
        }
    }
    text
}

/// Backend-reported failures read best without the kind prefix.
fn describe_error(err: &ClientError) -> String {
    match err.kind {
        FailureKind::Remote | FailureKind::HttpStatus(_) => err.message.clone(),
        _ => err.to_string(),
    }
}

fn map_state(state: TaskState) -> TaskStatus {
    match state {
        TaskState::Pending => TaskStatus::Pending,
        TaskState::InProgress => TaskStatus::InProgress,
        TaskState::Completed => TaskStatus::Completed,
        TaskState::Failed => TaskStatus::Failed,
        TaskState::Retrying => TaskStatus::Retrying,
        TaskState::Cancelled => TaskStatus::Cancelled,
    }
}

fn map_status(status: OperationStatus) -> TrackedTask {
    TrackedTask {
        task_id: TaskId::new(status.task_id),
        status: map_state(status.status),
        message: status.message,
        progress: status.progress,
        step: status.step,
        error: status.error,
        result: status.result,
    }
}

fn map_end(end: ledger_engine::TaskEnd) -> TaskEnd {
    match end {
        ledger_engine::TaskEnd::Terminal(status) => TaskEnd::Finished(map_status(status)),
        ledger_engine::TaskEnd::TimedOut { after } => TaskEnd::TimedOut { after },
        ledger_engine::TaskEnd::Unreachable { failures } => TaskEnd::Unreachable { failures },
    }
}
