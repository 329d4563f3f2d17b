use std::time::{Duration, Instant};

pub const DEFAULT_SUBMIT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Deadline-based debounce driven by explicit instants.
///
/// Arming sets the deadline `delay` after `now`; arming again pushes it out.
/// `fire_if_due` consumes the deadline once it has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Debounce {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    /// Re-arms only if already armed.
    pub fn rearm(&mut self, now: Instant) {
        if self.is_armed() {
            self.arm(now);
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

impl Default for Debounce {
    fn default() -> Self {
        Self::new(DEFAULT_SUBMIT_DEBOUNCE)
    }
}
