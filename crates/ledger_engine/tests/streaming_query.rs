use std::sync::{Arc, Mutex};

use ledger_engine::{
    ClientError, FailureKind, QueryExecutor, QueryPhase, QuerySummary, RowSink, StreamingQuery,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct CollectingSink {
    rows: Mutex<Vec<Value>>,
}

impl RowSink for CollectingSink {
    fn emit(&self, rows: Vec<Value>) {
        self.rows.lock().unwrap().extend(rows);
    }
}

/// Emits two batches, then either finishes or reports an error.
struct BatchExecutor {
    error: Option<String>,
}

#[async_trait::async_trait]
impl QueryExecutor for BatchExecutor {
    async fn stream_query(
        &self,
        _graph_id: &str,
        _query: &str,
        sink: &dyn RowSink,
        _cancel: &CancellationToken,
    ) -> Result<QuerySummary, ClientError> {
        sink.emit(vec![json!({"name": "Cash"})]);
        sink.emit(vec![json!({"name": "Revenue"})]);
        match &self.error {
            Some(message) => Err(ClientError {
                kind: FailureKind::Remote,
                message: message.clone(),
            }),
            None => Ok(QuerySummary { row_count: 2 }),
        }
    }
}

/// Emits one batch and then waits for cancellation.
struct HangingExecutor {
    started: Notify,
}

#[async_trait::async_trait]
impl QueryExecutor for HangingExecutor {
    async fn stream_query(
        &self,
        _graph_id: &str,
        _query: &str,
        sink: &dyn RowSink,
        cancel: &CancellationToken,
    ) -> Result<QuerySummary, ClientError> {
        sink.emit(vec![json!({"n": 1})]);
        self.started.notify_one();
        cancel.cancelled().await;
        sink.emit(vec![json!({"n": 2})]);
        Err(ClientError {
            kind: FailureKind::Cancelled,
            message: "cancelled by user".to_string(),
        })
    }
}

#[tokio::test]
async fn completed_query_keeps_rows() {
    let query = StreamingQuery::new(Arc::new(BatchExecutor { error: None }));
    let sink = CollectingSink::default();

    let summary = query
        .execute(1, "kg-1", "MATCH (a:Account) RETURN a.name AS name", &sink)
        .await
        .unwrap();

    assert_eq!(summary.row_count, 2);
    assert_eq!(query.status(), QueryPhase::Completed);
    assert_eq!(
        query.results(),
        vec![json!({"name": "Cash"}), json!({"name": "Revenue"})]
    );
    assert_eq!(sink.rows.lock().unwrap().len(), 2);
    assert!(query.error().is_none());
}

#[tokio::test]
async fn failed_query_records_error() {
    let query = StreamingQuery::new(Arc::new(BatchExecutor {
        error: Some("syntax error".to_string()),
    }));
    let result = query
        .execute(1, "kg-1", "RETRUN 1", &CollectingSink::default())
        .await;

    assert!(result.is_err());
    assert_eq!(query.status(), QueryPhase::Failed);
    assert_eq!(query.error().unwrap().message, "syntax error");
    assert_eq!(query.results().len(), 2);
}

#[tokio::test]
async fn cancel_keeps_partial_rows_and_drops_late_ones() {
    let executor = Arc::new(HangingExecutor {
        started: Notify::new(),
    });
    let query = StreamingQuery::new(executor.clone());
    let sink = Arc::new(CollectingSink::default());

    let running = {
        let query = query.clone();
        let sink = sink.clone();
        tokio::spawn(async move { query.execute(7, "kg-1", "MATCH (n) RETURN n", &*sink).await })
    };
    executor.started.notified().await;
    assert!(query.is_streaming());

    assert!(query.cancel_query());
    let err = running.await.unwrap().unwrap_err();

    assert_eq!(err.kind, FailureKind::Cancelled);
    assert_eq!(query.status(), QueryPhase::Cancelled);
    assert_eq!(query.results(), vec![json!({"n": 1})]);
    assert_eq!(*sink.rows.lock().unwrap(), vec![json!({"n": 1})]);
    assert!(!query.cancel_query());
}

#[tokio::test]
async fn reset_forgets_results() {
    let query = StreamingQuery::new(Arc::new(BatchExecutor { error: None }));
    query
        .execute(1, "kg-1", "MATCH (n) RETURN n", &CollectingSink::default())
        .await
        .unwrap();

    query.reset();

    assert_eq!(query.status(), QueryPhase::Idle);
    assert!(query.results().is_empty());
}

#[tokio::test]
async fn latest_claimed_query_wins_whatever_order_streams_run() {
    let query = StreamingQuery::new(Arc::new(BatchExecutor { error: None }));
    let first = query.begin(1);
    let second = query.begin(2);

    // The second stream is scheduled before the first one gets to run.
    let second_rows = Arc::new(CollectingSink::default());
    let newer = {
        let query = query.clone();
        let sink = second_rows.clone();
        tokio::spawn(async move { query.run(second, "kg-1", "RETURN 2", &*sink).await })
    };
    let summary = newer.await.unwrap().unwrap();
    let stale_rows = CollectingSink::default();
    let stale = query.run(first, "kg-1", "RETURN 1", &stale_rows).await;

    assert_eq!(summary.row_count, 2);
    assert_eq!(stale.unwrap_err().kind, FailureKind::Cancelled);
    assert_eq!(query.status(), QueryPhase::Completed);
    assert_eq!(query.results().len(), 2);
    assert!(stale_rows.rows.lock().unwrap().is_empty());
    assert_eq!(second_rows.rows.lock().unwrap().len(), 2);
}
