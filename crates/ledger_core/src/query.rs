use std::fmt;

use serde_json::Value;

/// Identifies one `/query` execution so late results of a replaced query
/// can be told apart from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId(u64);

impl QueryId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryStatus {
    #[default]
    Idle,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryState {
    pub id: Option<QueryId>,
    pub status: QueryStatus,
    pub rows: Vec<Value>,
    pub error: Option<String>,
}

impl QueryState {
    pub(crate) fn start(&mut self, id: QueryId) {
        *self = Self {
            id: Some(id),
            status: QueryStatus::Streaming,
            rows: Vec::new(),
            error: None,
        };
    }

    pub(crate) fn is_current(&self, id: QueryId) -> bool {
        self.id == Some(id) && self.status == QueryStatus::Streaming
    }
}
