use std::collections::BTreeMap;
use std::time::Instant;

use crate::debounce::Debounce;
use crate::transcript::{MessageDraft, MessageId, Transcript};
use crate::view_model::{ConsoleViewModel, TaskRowView};
use crate::{CommandRegistry, ConsoleConfig, QueryId, QueryState, TaskId, TrackedTask};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ActiveTask {
    pub(crate) task: TrackedTask,
    pub(crate) label: Option<String>,
}

/// Console state owned by a single host loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleState {
    config: ConsoleConfig,
    registry: CommandRegistry,
    transcript: Transcript,
    input: String,
    context_id: Option<String>,
    query: QueryState,
    next_query_id: u64,
    pending_agent_requests: usize,
    tasks: BTreeMap<TaskId, ActiveTask>,
    submit_debounce: Debounce,
    /// Line captured by Enter, sent when the debounce fires.
    pending_line: Option<String>,
    dirty: bool,
}

impl ConsoleState {
    pub fn new(config: ConsoleConfig) -> Self {
        let registry = CommandRegistry::from_config(&config);
        let mut transcript = Transcript::new(config.transcript_capacity);
        transcript.append(MessageDraft::system(format!(
            "Welcome to {}. Type /help for available commands.",
            config.console_name
        )));
        Self {
            registry,
            transcript,
            input: String::new(),
            context_id: None,
            query: QueryState::default(),
            next_query_id: 1,
            pending_agent_requests: 0,
            tasks: BTreeMap::new(),
            submit_debounce: Debounce::new(config.submit_debounce),
            pending_line: None,
            dirty: true,
            config,
        }
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn context_id(&self) -> Option<&str> {
        self.context_id.as_deref()
    }

    pub fn query(&self) -> &QueryState {
        &self.query
    }

    pub fn pending_agent_requests(&self) -> usize {
        self.pending_agent_requests
    }

    pub fn is_tracking(&self, task_id: &TaskId) -> bool {
        self.tasks.contains_key(task_id)
    }

    pub fn tracked_task(&self, task_id: &TaskId) -> Option<&TrackedTask> {
        self.tasks.get(task_id).map(|active| &active.task)
    }

    pub fn submit_pending(&self) -> bool {
        self.pending_line.is_some()
    }

    pub fn view(&self) -> ConsoleViewModel {
        ConsoleViewModel {
            console_name: self.config.console_name.clone(),
            context_id: self.context_id.clone(),
            input: self.input.clone(),
            message_count: self.transcript.len(),
            last_message_id: self.transcript.last().map(|message| message.id),
            query_status: self.query.status,
            query_row_count: self.query.rows.len(),
            pending_agent_requests: self.pending_agent_requests,
            tasks: self
                .tasks
                .values()
                .map(|active| TaskRowView {
                    task_id: active.task.task_id.clone(),
                    label: active.label.clone(),
                    status: active.task.status,
                    message: active.task.message.clone(),
                    progress: active.task.progress,
                    step: active.task.step.clone(),
                })
                .collect(),
            dirty: self.dirty,
        }
    }

    /// Returns whether anything changed since the last call, and resets the flag.
    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn push(&mut self, draft: MessageDraft) -> MessageId {
        self.dirty = true;
        self.transcript.append(draft)
    }

    pub(crate) fn transcript_mut(&mut self) -> &mut Transcript {
        self.dirty = true;
        &mut self.transcript
    }

    pub(crate) fn set_input(&mut self, text: String) {
        if self.input != text {
            self.input = text;
            self.dirty = true;
        }
    }

    pub(crate) fn take_input(&mut self) -> String {
        self.dirty = true;
        std::mem::take(&mut self.input)
    }

    pub(crate) fn set_context(&mut self, context_id: Option<String>) {
        self.context_id = context_id;
        self.dirty = true;
    }

    pub(crate) fn debounce_mut(&mut self) -> &mut Debounce {
        &mut self.submit_debounce
    }

    /// Captures the current input as the line to send once the debounce
    /// fires. Blank input is not captured.
    pub(crate) fn capture_pending(&mut self, now: Instant) {
        if self.input.trim().is_empty() {
            return;
        }
        self.pending_line = Some(self.input.clone());
        self.submit_debounce.arm(now);
    }

    /// Removes the captured line. The input is cleared too when it still
    /// holds that line; text typed after Enter is kept.
    pub(crate) fn take_pending(&mut self) -> Option<String> {
        self.submit_debounce.cancel();
        let line = self.pending_line.take()?;
        if self.input == line {
            self.take_input();
        }
        Some(line)
    }

    pub(crate) fn discard_pending(&mut self) {
        self.submit_debounce.cancel();
        self.pending_line = None;
    }

    pub(crate) fn begin_query(&mut self) -> QueryId {
        let id = QueryId::new(self.next_query_id);
        self.next_query_id += 1;
        self.query.start(id);
        self.dirty = true;
        id
    }

    pub(crate) fn query_mut(&mut self) -> &mut QueryState {
        self.dirty = true;
        &mut self.query
    }

    pub(crate) fn note_agent_request(&mut self) {
        self.pending_agent_requests += 1;
    }

    pub(crate) fn finish_agent_request(&mut self) {
        self.pending_agent_requests = self.pending_agent_requests.saturating_sub(1);
    }

    pub(crate) fn tasks_mut(&mut self) -> &mut BTreeMap<TaskId, ActiveTask> {
        &mut self.tasks
    }
}

impl Default for ConsoleState {
    fn default() -> Self {
        Self::new(ConsoleConfig::default())
    }
}
