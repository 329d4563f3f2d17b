use ledger_logging::{ledger_debug, ledger_info};

use crate::dispatch::dispatch;
use crate::state::ActiveTask;
use crate::transcript::MessageDraft;
use crate::{
    parse_input, AgentReply, ConsoleState, Effect, Msg, QueryOutcome, QueryStatus, TaskEnd,
    TaskId, TaskStatus, TrackedTask,
};

/// Pure update function: applies a message to state and returns any effects.
pub fn update(mut state: ConsoleState, msg: Msg) -> (ConsoleState, Vec<Effect>) {
    let effects = match msg {
        Msg::InputChanged { text, now } => {
            state.set_input(text);
            state.debounce_mut().rearm(now);
            Vec::new()
        }
        Msg::EnterPressed { now } => {
            // A second Enter before the timer fires sends the earlier line first.
            let effects = flush_pending(&mut state);
            state.capture_pending(now);
            effects
        }
        Msg::InputSubmitted => {
            let mut effects = flush_pending(&mut state);
            effects.extend(submit(&mut state));
            effects
        }
        Msg::Tick { now } => {
            if state.debounce_mut().fire_if_due(now) {
                flush_pending(&mut state)
            } else {
                Vec::new()
            }
        }
        Msg::ContextSelected(context_id) => {
            let text = match &context_id {
                Some(id) => format!("Using graph {id}."),
                None => "Graph selection cleared.".to_string(),
            };
            state.set_context(context_id);
            state.push(MessageDraft::system(text));
            Vec::new()
        }
        Msg::QueryRows { query_id, rows } => {
            if state.query().is_current(query_id) {
                state.query_mut().rows.extend(rows);
            } else {
                ledger_debug!("Dropping rows for stale query {}", query_id);
            }
            Vec::new()
        }
        Msg::QueryFinished { query_id, outcome } => {
            if state.query().is_current(query_id) {
                finish_query(&mut state, outcome);
            } else {
                ledger_debug!("Dropping result for stale query {}", query_id);
            }
            Vec::new()
        }
        Msg::QueryCancelRequested => match state.query().id {
            Some(query_id) if state.query().status == QueryStatus::Streaming => {
                state.push(MessageDraft::system(format!("Cancelling query {query_id}.")));
                vec![Effect::CancelQuery]
            }
            _ => {
                state.push(MessageDraft::error("No query is running."));
                Vec::new()
            }
        },
        Msg::AgentReplied(result) => {
            state.finish_agent_request();
            match result {
                Ok(reply) => render_agent_reply(&mut state, reply),
                Err(error) => {
                    state.push(MessageDraft::error(format!("Agent request failed: {error}")));
                }
            }
            Vec::new()
        }
        Msg::TaskTracked { task_id, label } => track_task(&mut state, task_id, label),
        Msg::TaskCancelled { task_id } => {
            if state.tasks_mut().remove(&task_id).is_some() {
                ledger_info!("Stopped tracking task {}", task_id);
                state.push(MessageDraft::system(format!(
                    "Stopped tracking task {task_id}."
                )));
                vec![Effect::CancelTask { task_id }]
            } else {
                state.push(MessageDraft::error(format!(
                    "Task {task_id} is not being tracked."
                )));
                Vec::new()
            }
        }
        Msg::TaskUpdated(task) => {
            apply_task_update(&mut state, task.normalized());
            Vec::new()
        }
        Msg::TaskEnded { task_id, end } => {
            end_task(&mut state, task_id, end);
            Vec::new()
        }
        Msg::Notice(text) => {
            state.push(MessageDraft::system(text));
            Vec::new()
        }
        Msg::Failure(text) => {
            state.push(MessageDraft::error(text));
            Vec::new()
        }
        Msg::Shutdown => {
            state.discard_pending();
            Vec::new()
        }
        Msg::NoOp => Vec::new(),
    };

    (state, effects)
}

/// Echoes and dispatches the current input. The input is cleared whatever
/// the outcome; blank input is left alone and never dispatched.
fn submit(state: &mut ConsoleState) -> Vec<Effect> {
    if parse_input(state.input()).is_none() {
        return Vec::new();
    }
    let line = state.take_input();
    send_line(state, &line)
}

fn flush_pending(state: &mut ConsoleState) -> Vec<Effect> {
    match state.take_pending() {
        Some(line) => send_line(state, &line),
        None => Vec::new(),
    }
}

fn send_line(state: &mut ConsoleState, line: &str) -> Vec<Effect> {
    let Some(parsed) = parse_input(line) else {
        return Vec::new();
    };
    state.push(MessageDraft::user(line.trim().to_string()));
    dispatch(state, parsed)
}

fn finish_query(state: &mut ConsoleState, outcome: QueryOutcome) {
    match outcome {
        QueryOutcome::Completed { row_count } => {
            let query = state.query_mut();
            query.status = QueryStatus::Completed;
            let rows = query.rows.clone();
            let count = row_count.max(rows.len());
            let noun = if count == 1 { "row" } else { "rows" };
            state.push(
                MessageDraft::result(format!("Query returned {count} {noun}."))
                    .with_data(serde_json::Value::Array(rows)),
            );
        }
        QueryOutcome::Failed(error) => {
            let query = state.query_mut();
            query.status = QueryStatus::Failed;
            query.error = Some(error.clone());
            state.push(MessageDraft::error(format!("Query failed: {error}")));
        }
        QueryOutcome::Cancelled => {
            state.query_mut().status = QueryStatus::Cancelled;
            state.push(MessageDraft::system("Query cancelled."));
        }
    }
}

fn render_agent_reply(state: &mut ConsoleState, reply: AgentReply) {
    let mut draft = MessageDraft::result(reply.content);
    if let Some(data) = reply.data {
        draft = draft.with_data(data);
    }
    state.push(draft);
    if let Some(query) = reply.query {
        state.push(MessageDraft::system(format!("Agent ran: {query}")));
    }
}

fn track_task(state: &mut ConsoleState, task_id: TaskId, label: Option<String>) -> Vec<Effect> {
    if state.is_tracking(&task_id) {
        state.push(MessageDraft::system(format!(
            "Task {task_id} is already being tracked."
        )));
        return Vec::new();
    }
    let text = match &label {
        Some(label) => format!("Tracking task {task_id} ({label})."),
        None => format!("Tracking task {task_id}."),
    };
    state.tasks_mut().insert(
        task_id.clone(),
        ActiveTask {
            task: TrackedTask::new(task_id.clone()),
            label,
        },
    );
    state.push(MessageDraft::system(text));
    vec![Effect::TrackTask { task_id }]
}

fn apply_task_update(state: &mut ConsoleState, task: TrackedTask) {
    let Some(active) = state.tasks_mut().get_mut(&task.task_id) else {
        ledger_debug!("Ignoring update for untracked task {}", task.task_id);
        return;
    };
    let announce = !task.status.is_terminal() && task.progressed_from(&active.task);
    active.task = task.clone();
    state.mark_dirty();
    if announce {
        state.push(MessageDraft::system(progress_line(&task)));
    }
}

fn progress_line(task: &TrackedTask) -> String {
    let mut line = format!("[{}] {}", task.task_id, task.status.label());
    if let Some(progress) = task.progress {
        line.push_str(&format!(" {progress:.0}%"));
    }
    if let Some(step) = &task.step {
        line.push_str(&format!(" ({step})"));
    }
    if !task.message.is_empty() {
        line.push_str(": ");
        line.push_str(&task.message);
    }
    line
}

fn end_task(state: &mut ConsoleState, task_id: TaskId, end: TaskEnd) {
    let Some(active) = state.tasks_mut().remove(&task_id) else {
        ledger_debug!("Ignoring end of untracked task {}", task_id);
        return;
    };
    state.mark_dirty();
    let name = match &active.label {
        Some(label) => format!("{task_id} ({label})"),
        None => task_id.to_string(),
    };

    match end {
        TaskEnd::Finished(task) => match task.status {
            TaskStatus::Completed => {
                let mut draft = MessageDraft::result(
                    task.result_text()
                        .unwrap_or_else(|| format!("Task {name} completed.")),
                );
                if let Some(result) = task.result {
                    draft = draft.with_data(result);
                }
                state.push(draft);
            }
            TaskStatus::Failed => {
                let error = task
                    .error
                    .filter(|error| !error.is_empty())
                    .unwrap_or_else(|| task.message.clone());
                state.push(MessageDraft::error(format!("Task {name} failed: {error}")));
            }
            TaskStatus::Cancelled => {
                state.push(MessageDraft::system(format!("Task {name} was cancelled.")));
            }
            other => {
                ledger_debug!(
                    "Task {} ended with non-terminal status {}",
                    name,
                    other.label()
                );
                state.push(MessageDraft::system(format!(
                    "Task {name} stopped while {}.",
                    other.label()
                )));
            }
        },
        TaskEnd::TimedOut { after } => {
            state.push(MessageDraft::error(format!(
                "Stopped waiting for task {name} after {}.",
                format_wait(after)
            )));
        }
        TaskEnd::Unreachable { failures } => {
            state.push(MessageDraft::error(format!(
                "Gave up on task {name} after {failures} failed status checks."
            )));
        }
    }
}

fn format_wait(after: std::time::Duration) -> String {
    let secs = after.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        let minutes = secs / 60;
        if minutes == 1 {
            "1 minute".to_string()
        } else {
            format!("{minutes} minutes")
        }
    } else {
        format!("{secs} seconds")
    }
}
