use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;

pub const DEFAULT_TRANSCRIPT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(u64);

impl MessageId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    System,
    User,
    Result,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptMessage {
    pub id: MessageId,
    pub kind: MessageKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Structured payload, e.g. query rows on a `Result` message.
    pub data: Option<Value>,
}

/// A message before it is stamped by the transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDraft {
    pub id: Option<MessageId>,
    pub kind: MessageKind,
    pub content: String,
    pub data: Option<Value>,
}

impl MessageDraft {
    pub fn new(kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            id: None,
            kind,
            content: content.into(),
            data: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageKind::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageKind::User, content)
    }

    pub fn result(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Result, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Error, content)
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = Some(id);
        self
    }
}

/// Ordered, append-only message log.
///
/// Ids are monotonic for the lifetime of the transcript and survive `clear`,
/// so a renderer can use "everything after the last id I drew" safely. When a
/// capacity is set the oldest messages are evicted first.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    messages: VecDeque<TranscriptMessage>,
    next_id: u64,
    capacity: Option<usize>,
}

impl Transcript {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            messages: VecDeque::new(),
            next_id: 1,
            capacity: capacity.map(|cap| cap.max(1)),
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Appends a message and returns its id.
    ///
    /// A caller-supplied id is honoured only if it has not been handed out
    /// yet; otherwise a fresh one is assigned.
    pub fn append(&mut self, draft: MessageDraft) -> MessageId {
        let id = match draft.id {
            Some(id) if id.value() >= self.next_id => id,
            _ => MessageId(self.next_id),
        };
        self.next_id = id.value() + 1;

        self.messages.push_back(TranscriptMessage {
            id,
            kind: draft.kind,
            content: draft.content,
            timestamp: Utc::now(),
            data: draft.data,
        });

        if let Some(cap) = self.capacity {
            while self.messages.len() > cap {
                self.messages.pop_front();
            }
        }
        id
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// The full ordered sequence.
    pub fn all(
        &self,
    ) -> impl DoubleEndedIterator<Item = &TranscriptMessage> + ExactSizeIterator + '_ {
        self.messages.iter()
    }

    /// Messages appended after `id`, in order.
    pub fn since(&self, id: Option<MessageId>) -> impl Iterator<Item = &TranscriptMessage> + '_ {
        self.messages
            .iter()
            .filter(move |message| id.is_none_or(|last| message.id > last))
    }

    pub fn snapshot(&self) -> Vec<TranscriptMessage> {
        self.messages.iter().cloned().collect()
    }

    pub fn last(&self) -> Option<&TranscriptMessage> {
        self.messages.back()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new(Some(DEFAULT_TRANSCRIPT_CAPACITY))
    }
}
