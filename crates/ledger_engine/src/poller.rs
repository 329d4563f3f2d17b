use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use ledger_logging::{ledger_debug, ledger_info, ledger_warn};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::client::StatusClient;
use crate::{ApiResponse, ClientError, EngineEvent, OperationStatus, TaskEnd};

#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub interval: Duration,
    /// Hard ceiling from registration to forced deregistration.
    pub max_wait: Duration,
    /// Consecutive failed status requests before giving up; `None` relies on
    /// `max_wait` alone.
    pub max_consecutive_failures: Option<u32>,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_wait: Duration::from_secs(10 * 60),
            max_consecutive_failures: Some(5),
        }
    }
}

/// Receives poll results. Called outside the poller's lock.
pub trait TaskObserver: Send + Sync {
    fn on_update(&self, status: &OperationStatus);
    fn on_end(&self, task_id: &str, end: &TaskEnd);
    fn on_poll_error(&self, _task_id: &str, _error: &ClientError) {}
}

pub struct ChannelObserver {
    tx: mpsc::Sender<EngineEvent>,
}

impl ChannelObserver {
    pub fn new(tx: mpsc::Sender<EngineEvent>) -> Self {
        Self { tx }
    }
}

impl TaskObserver for ChannelObserver {
    fn on_update(&self, status: &OperationStatus) {
        let _ = self.tx.send(EngineEvent::TaskUpdated(status.clone()));
    }

    fn on_end(&self, task_id: &str, end: &TaskEnd) {
        let _ = self.tx.send(EngineEvent::TaskEnded {
            task_id: task_id.to_string(),
            end: end.clone(),
        });
    }

    fn on_poll_error(&self, task_id: &str, error: &ClientError) {
        let _ = self.tx.send(EngineEvent::TaskPollFailed {
            task_id: task_id.to_string(),
            error: error.clone(),
        });
    }
}

/// Identifies one registration of a task id. A response is applied only if
/// the registration it was issued for is still the active one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTicket {
    pub task_id: String,
    generation: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollVerdict {
    /// Task was cancelled, re-registered or already ended.
    Ignored,
    /// Task stays active.
    Continue,
    Ended(TaskEnd),
}

#[derive(Debug, Clone)]
struct Registration {
    generation: u64,
    registered_at: Instant,
    failures: u32,
}

/// Timer-free bookkeeping for the poller. All time comes in as arguments.
#[derive(Debug)]
pub struct PollerState {
    settings: PollerSettings,
    active: HashMap<String, Registration>,
    next_generation: u64,
}

impl PollerState {
    pub fn new(settings: PollerSettings) -> Self {
        Self {
            settings,
            active: HashMap::new(),
            next_generation: 0,
        }
    }

    pub fn settings(&self) -> &PollerSettings {
        &self.settings
    }

    /// Returns false if the id is already active.
    pub fn track(&mut self, task_id: &str, now: Instant) -> bool {
        if self.active.contains_key(task_id) {
            return false;
        }
        self.next_generation += 1;
        self.active.insert(
            task_id.to_string(),
            Registration {
                generation: self.next_generation,
                registered_at: now,
                failures: 0,
            },
        );
        true
    }

    pub fn cancel(&mut self, task_id: &str) -> bool {
        self.active.remove(task_id).is_some()
    }

    pub fn is_active(&self, task_id: &str) -> bool {
        self.active.contains_key(task_id)
    }


    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.active.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Deregisters every task registered `max_wait` or longer ago.
    pub fn expire(&mut self, now: Instant) -> Vec<(String, TaskEnd)> {
        let max_wait = self.settings.max_wait;
        let mut expired: Vec<String> = self
            .active
            .iter()
            .filter(|(_, reg)| now.saturating_duration_since(reg.registered_at) >= max_wait)
            .map(|(id, _)| id.clone())
            .collect();
        expired.sort();
        for id in &expired {
            self.active.remove(id);
        }
        expired
            .into_iter()
            .map(|id| (id, TaskEnd::TimedOut { after: max_wait }))
            .collect()
    }

    pub fn tickets(&self) -> Vec<PollTicket> {
        let mut tickets: Vec<_> = self
            .active
            .iter()
            .map(|(id, reg)| PollTicket {
                task_id: id.clone(),
                generation: reg.generation,
            })
            .collect();
        tickets.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        tickets
    }

    pub fn apply_status(&mut self, ticket: &PollTicket, status: &OperationStatus) -> PollVerdict {
        let Some(reg) = self.current(ticket) else {
            return PollVerdict::Ignored;
        };
        reg.failures = 0;
        if status.status.is_terminal() {
            self.active.remove(&ticket.task_id);
            PollVerdict::Ended(TaskEnd::Terminal(status.clone()))
        } else {
            PollVerdict::Continue
        }
    }

    pub fn apply_failure(&mut self, ticket: &PollTicket) -> PollVerdict {
        let limit = self.settings.max_consecutive_failures;
        let Some(reg) = self.current(ticket) else {
            return PollVerdict::Ignored;
        };
        reg.failures += 1;
        match limit {
            Some(max) if reg.failures >= max => {
                let failures = reg.failures;
                self.active.remove(&ticket.task_id);
                PollVerdict::Ended(TaskEnd::Unreachable { failures })
            }
            _ => PollVerdict::Continue,
        }
    }

    fn current(&mut self, ticket: &PollTicket) -> Option<&mut Registration> {
        self.active
            .get_mut(&ticket.task_id)
            .filter(|reg| reg.generation == ticket.generation)
    }
}

enum Notification {
    Update(OperationStatus),
    PollError(String, ClientError),
    End(String, TaskEnd),
}

/// Polls every active task on a fixed interval until it ends.
#[derive(Clone)]
pub struct TaskPoller {
    state: Arc<Mutex<PollerState>>,
    client: Arc<dyn StatusClient>,
    observer: Arc<dyn TaskObserver>,
    interval: Duration,
    cycle: Arc<AtomicU64>,
}

impl TaskPoller {
    pub fn new(
        client: Arc<dyn StatusClient>,
        observer: Arc<dyn TaskObserver>,
        settings: PollerSettings,
    ) -> Self {
        Self {
            interval: settings.interval,
            state: Arc::new(Mutex::new(PollerState::new(settings))),
            client,
            observer,
            cycle: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn track(&self, task_id: &str) -> bool {
        let added = self.lock().track(task_id, now());
        if added {
            ledger_info!("Tracking task {}", task_id);
        } else {
            ledger_debug!("Task {} is already tracked", task_id);
        }
        added
    }

    pub fn cancel(&self, task_id: &str) -> bool {
        let removed = self.lock().cancel(task_id);
        if removed {
            ledger_info!("Cancelled tracking of task {}", task_id);
        }
        removed
    }

    pub fn is_active(&self, task_id: &str) -> bool {
        self.lock().is_active(task_id)
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.lock().active_ids()
    }

    /// One polling cycle: expire overdue tasks, then query every active task
    /// concurrently and apply the responses that are still relevant.
    pub async fn poll_once(&self) {
        let tick = self.cycle.fetch_add(1, Ordering::Relaxed) + 1;

        let (expired, tickets) = {
            let mut state = self.lock();
            (state.expire(now()), state.tickets())
        };
        for (task_id, end) in &expired {
            ledger_warn!("[poll {}] Task {} exceeded the maximum wait", tick, task_id);
            self.observer.on_end(task_id, end);
        }
        if tickets.is_empty() {
            return;
        }

        let responses = join_all(
            tickets
                .iter()
                .map(|ticket| self.client.operation_status(&ticket.task_id)),
        )
        .await;

        let mut notifications = Vec::new();
        {
            let mut state = self.lock();
            for (ticket, response) in tickets.into_iter().zip(responses) {
                match response.and_then(ApiResponse::into_result) {
                    Ok(mut status) => {
                        if status.task_id != ticket.task_id {
                            ledger_debug!(
                                "[poll {}] Status for {} reported id {}",
                                tick,
                                ticket.task_id,
                                status.task_id
                            );
                            status.task_id = ticket.task_id.clone();
                        }
                        match state.apply_status(&ticket, &status) {
                            PollVerdict::Ignored => {
                                ledger_debug!(
                                    "[poll {}] Dropping stale response for {}",
                                    tick,
                                    ticket.task_id
                                );
                            }
                            PollVerdict::Continue => notifications.push(Notification::Update(status)),
                            PollVerdict::Ended(end) => {
                                ledger_info!(
                                    "[poll {}] Task {} reached {:?}",
                                    tick,
                                    ticket.task_id,
                                    status.status
                                );
                                notifications.push(Notification::Update(status));
                                notifications.push(Notification::End(ticket.task_id, end));
                            }
                        }
                    }
                    Err(error) => match state.apply_failure(&ticket) {
                        PollVerdict::Ignored => {}
                        PollVerdict::Continue => {
                            ledger_warn!(
                                "[poll {}] Status request for {} failed: {}",
                                tick,
                                ticket.task_id,
                                error
                            );
                            notifications.push(Notification::PollError(ticket.task_id, error));
                        }
                        PollVerdict::Ended(end) => {
                            ledger_warn!(
                                "[poll {}] Giving up on {} after repeated failures: {}",
                                tick,
                                ticket.task_id,
                                error
                            );
                            notifications
                                .push(Notification::PollError(ticket.task_id.clone(), error));
                            notifications.push(Notification::End(ticket.task_id, end));
                        }
                    },
                }
            }
        }

        for notification in notifications {
            match notification {
                Notification::Update(status) => self.observer.on_update(&status),
                Notification::PollError(task_id, error) => {
                    self.observer.on_poll_error(&task_id, &error)
                }
                Notification::End(task_id, end) => self.observer.on_end(&task_id, &end),
            }
        }
    }

    /// Polls on the configured interval until `shutdown` fires. The first
    /// poll happens one interval after start.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.poll_once().await,
            }
        }
        ledger_debug!("Task poller stopped");
    }

    fn lock(&self) -> MutexGuard<'_, PollerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Tokio's clock, so paused-time tests drive expiry.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TaskState;

    fn status(id: &str, state: TaskState) -> OperationStatus {
        OperationStatus {
            task_id: id.to_string(),
            status: state,
            message: String::new(),
            progress: None,
            step: None,
            error: None,
            result: None,
        }
    }

    #[test]
    fn terminal_status_deregisters() {
        let start = Instant::now();
        let mut state = PollerState::new(PollerSettings::default());
        assert!(state.track("a", start));
        assert!(!state.track("a", start));

        let ticket = state.tickets().remove(0);
        assert_eq!(
            state.apply_status(&ticket, &status("a", TaskState::InProgress)),
            PollVerdict::Continue
        );
        let done = status("a", TaskState::Completed);
        assert_eq!(
            state.apply_status(&ticket, &done),
            PollVerdict::Ended(TaskEnd::Terminal(done.clone()))
        );
        assert!(state.is_empty());
        assert_eq!(state.apply_status(&ticket, &done), PollVerdict::Ignored);
    }

    #[test]
    fn cancelled_ticket_is_ignored_even_after_retrack() {
        let start = Instant::now();
        let mut state = PollerState::new(PollerSettings::default());
        state.track("a", start);
        let old = state.tickets().remove(0);

        assert!(state.cancel("a"));
        assert!(!state.cancel("a"));
        assert_eq!(
            state.apply_status(&old, &status("a", TaskState::Completed)),
            PollVerdict::Ignored
        );

        assert!(state.track("a", start));
        assert_eq!(
            state.apply_status(&old, &status("a", TaskState::Completed)),
            PollVerdict::Ignored
        );
        assert!(state.is_active("a"));
    }

    #[test]
    fn expire_uses_max_wait_from_registration() {
        let start = Instant::now();
        let settings = PollerSettings {
            max_wait: Duration::from_secs(600),
            ..PollerSettings::default()
        };
        let mut state = PollerState::new(settings);
        state.track("old", start);
        state.track("new", start + Duration::from_secs(300));

        assert!(state.expire(start + Duration::from_secs(599)).is_empty());
        let expired = state.expire(start + Duration::from_secs(600));
        assert_eq!(
            expired,
            vec![(
                "old".to_string(),
                TaskEnd::TimedOut {
                    after: Duration::from_secs(600)
                }
            )]
        );
        assert_eq!(state.active_ids(), vec!["new".to_string()]);
    }

    #[test]
    fn consecutive_failures_give_up_and_success_resets() {
        let start = Instant::now();
        let settings = PollerSettings {
            max_consecutive_failures: Some(3),
            ..PollerSettings::default()
        };
        let mut state = PollerState::new(settings);
        state.track("a", start);
        let ticket = state.tickets().remove(0);

        assert_eq!(state.apply_failure(&ticket), PollVerdict::Continue);
        assert_eq!(state.apply_failure(&ticket), PollVerdict::Continue);
        state.apply_status(&ticket, &status("a", TaskState::Retrying));
        assert_eq!(state.apply_failure(&ticket), PollVerdict::Continue);
        assert_eq!(state.apply_failure(&ticket), PollVerdict::Continue);
        assert_eq!(
            state.apply_failure(&ticket),
            PollVerdict::Ended(TaskEnd::Unreachable { failures: 3 })
        );
        assert!(!state.is_active("a"));
    }

    #[test]
    fn unlimited_failures_keep_polling() {
        let start = Instant::now();
        let settings = PollerSettings {
            max_consecutive_failures: None,
            ..PollerSettings::default()
        };
        let mut state = PollerState::new(settings);
        state.track("a", start);
        let ticket = state.tickets().remove(0);
        for _ in 0..100 {
            assert_eq!(state.apply_failure(&ticket), PollVerdict::Continue);
        }
    }
}
