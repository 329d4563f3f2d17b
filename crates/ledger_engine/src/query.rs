use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ledger_logging::{ledger_debug, ledger_info};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::client::{QueryExecutor, RowSink};
use crate::{ClientError, FailureKind, QuerySeq, QuerySummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryPhase {
    #[default]
    Idle,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

/// Slot claimed by [`StreamingQuery::begin`].
#[derive(Debug)]
pub struct QueryTicket {
    query_id: QuerySeq,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct Shared {
    active: Option<QuerySeq>,
    phase: QueryPhase,
    results: Vec<Value>,
    error: Option<ClientError>,
    cancel: Option<CancellationToken>,
}

/// Runs one streaming query at a time and keeps its rows.
///
/// Starting a new query or calling `reset` cancels the running one; anything
/// the old stream still produces is discarded.
#[derive(Clone)]
pub struct StreamingQuery {
    executor: Arc<dyn QueryExecutor>,
    shared: Arc<Mutex<Shared>>,
}

impl StreamingQuery {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            executor,
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    /// Claims the query slot and streams; see [`StreamingQuery::begin`].
    pub async fn execute(
        &self,
        query_id: QuerySeq,
        graph_id: &str,
        query: &str,
        forward: &dyn RowSink,
    ) -> Result<QuerySummary, ClientError> {
        let ticket = self.begin(query_id);
        self.run(ticket, graph_id, query, forward).await
    }

    /// Makes `query_id` the active query and cancels the previous one.
    ///
    /// Callers that spawn the stream must call this before spawning, so the
    /// most recently requested query owns the slot whatever order the tasks
    /// get scheduled in.
    pub fn begin(&self, query_id: QuerySeq) -> QueryTicket {
        let cancel = CancellationToken::new();
        let mut shared = self.lock();
        if let Some(previous) = shared.cancel.take() {
            previous.cancel();
        }
        *shared = Shared {
            active: Some(query_id),
            phase: QueryPhase::Streaming,
            results: Vec::new(),
            error: None,
            cancel: Some(cancel.clone()),
        };
        QueryTicket { query_id, cancel }
    }

    /// Streams a query previously claimed with [`StreamingQuery::begin`].
    pub async fn run(
        &self,
        ticket: QueryTicket,
        graph_id: &str,
        query: &str,
        forward: &dyn RowSink,
    ) -> Result<QuerySummary, ClientError> {
        let QueryTicket { query_id, cancel } = ticket;
        if cancel.is_cancelled() {
            ledger_debug!("Query {} replaced before it started", query_id);
            return Err(ClientError::cancelled());
        }
        ledger_info!("Query {} started on graph {}", query_id, graph_id);

        let sink = RecordingSink {
            shared: &self.shared,
            query_id,
            forward,
        };
        let result = self
            .executor
            .stream_query(graph_id, query, &sink, &cancel)
            .await;

        let mut shared = self.lock();
        if shared.active == Some(query_id) {
            shared.cancel = None;
            match &result {
                Ok(summary) => {
                    ledger_info!("Query {} completed with {} rows", query_id, summary.row_count);
                    shared.phase = QueryPhase::Completed;
                }
                Err(err) if err.kind == FailureKind::Cancelled => {
                    shared.phase = QueryPhase::Cancelled;
                }
                Err(err) => {
                    shared.phase = QueryPhase::Failed;
                    shared.error = Some(err.clone());
                }
            }
        } else {
            ledger_debug!("Query {} finished after being replaced", query_id);
        }
        result
    }

    pub fn is_streaming(&self) -> bool {
        self.lock().phase == QueryPhase::Streaming
    }

    pub fn status(&self) -> QueryPhase {
        self.lock().phase
    }

    pub fn results(&self) -> Vec<Value> {
        self.lock().results.clone()
    }

    pub fn error(&self) -> Option<ClientError> {
        self.lock().error.clone()
    }

    /// Cancels the running query; rows received so far are kept.
    pub fn cancel_query(&self) -> bool {
        let mut shared = self.lock();
        match shared.cancel.take() {
            Some(token) => {
                token.cancel();
                shared.phase = QueryPhase::Cancelled;
                true
            }
            None => false,
        }
    }

    /// Cancels any running query and forgets its results.
    pub fn reset(&self) {
        let mut shared = self.lock();
        if let Some(token) = shared.cancel.take() {
            token.cancel();
        }
        *shared = Shared::default();
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct RecordingSink<'a> {
    shared: &'a Mutex<Shared>,
    query_id: QuerySeq,
    forward: &'a dyn RowSink,
}

impl RowSink for RecordingSink<'_> {
    fn emit(&self, rows: Vec<Value>) {
        {
            let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
            if shared.active != Some(self.query_id) || shared.phase != QueryPhase::Streaming {
                return;
            }
            shared.results.extend(rows.iter().cloned());
        }
        self.forward.emit(rows);
    }
}
