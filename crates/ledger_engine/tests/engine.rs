use std::sync::Arc;
use std::time::{Duration, Instant};

use ledger_engine::{
    AgentClient, AgentReply, AgentRequest, ApiResponse, ClientError, ConnectionClient,
    EngineEvent, EngineHandle, OperationStatus, PollerSettings, QueryExecutor, QuerySummary,
    RowSink, StatusClient, TaskEnd, TaskState,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;

struct FakeBackend;

#[async_trait::async_trait]
impl StatusClient for FakeBackend {
    async fn operation_status(
        &self,
        task_id: &str,
    ) -> Result<ApiResponse<OperationStatus>, ClientError> {
        Ok(ApiResponse::Parsed(OperationStatus {
            task_id: task_id.to_string(),
            status: TaskState::Completed,
            message: "Sync finished".to_string(),
            progress: Some(100.0),
            step: None,
            error: None,
            result: Some(json!({"message": "42 records"})),
        }))
    }
}

#[async_trait::async_trait]
impl QueryExecutor for FakeBackend {
    async fn stream_query(
        &self,
        _graph_id: &str,
        _query: &str,
        sink: &dyn RowSink,
        _cancel: &CancellationToken,
    ) -> Result<QuerySummary, ClientError> {
        sink.emit(vec![json!({"n": 1})]);
        Ok(QuerySummary { row_count: 1 })
    }
}

#[async_trait::async_trait]
impl AgentClient for FakeBackend {
    async fn ask_agent(
        &self,
        graph_id: &str,
        request: &AgentRequest,
    ) -> Result<AgentReply, ClientError> {
        Ok(AgentReply {
            query: None,
            result: json!(format!("{graph_id}: {}", request.message)),
        })
    }
}

#[async_trait::async_trait]
impl ConnectionClient for FakeBackend {
    async fn sync_connection(&self, connection_id: &str) -> Result<String, ClientError> {
        Ok(format!("op-{connection_id}"))
    }
}

fn engine() -> EngineHandle {
    EngineHandle::with_backend(
        Arc::new(FakeBackend),
        PollerSettings {
            interval: Duration::from_millis(20),
            ..PollerSettings::default()
        },
    )
    .expect("engine starts")
}

fn collect_until(
    engine: &EngineHandle,
    mut done: impl FnMut(&EngineEvent) -> bool,
) -> Vec<EngineEvent> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut events = Vec::new();
    while Instant::now() < deadline {
        if let Some(event) = engine.recv_timeout(Duration::from_millis(50)) {
            let finished = done(&event);
            events.push(event);
            if finished {
                return events;
            }
        }
    }
    panic!("engine did not produce the expected event; saw {events:?}");
}

#[test]
fn tracked_task_reports_update_then_end() {
    let engine = engine();
    engine.track("op-1");

    let events = collect_until(&engine, |event| {
        matches!(event, EngineEvent::TaskEnded { .. })
    });

    assert!(matches!(
        &events[0],
        EngineEvent::TaskUpdated(status) if status.status == TaskState::Completed
    ));
    let EngineEvent::TaskEnded { task_id, end } = events.last().unwrap() else {
        unreachable!();
    };
    assert_eq!(task_id, "op-1");
    assert!(matches!(end, TaskEnd::Terminal(status) if status.task_id == "op-1"));
}

#[test]
fn query_rows_arrive_before_finish() {
    let engine = engine();
    engine.execute_query(3, "kg-1", "MATCH (n) RETURN n");

    let events = collect_until(&engine, |event| {
        matches!(event, EngineEvent::QueryFinished { .. })
    });

    assert_eq!(
        events,
        vec![
            EngineEvent::QueryRows {
                query_id: 3,
                rows: vec![json!({"n": 1})],
            },
            EngineEvent::QueryFinished {
                query_id: 3,
                result: Ok(QuerySummary { row_count: 1 }),
            },
        ]
    );
}

#[test]
fn back_to_back_queries_finish_with_the_latest_completed() {
    let engine = engine();
    engine.execute_query(1, "kg-1", "RETURN 1");
    engine.execute_query(2, "kg-1", "RETURN 2");

    let mut finished = Vec::new();
    collect_until(&engine, |event| {
        if let EngineEvent::QueryFinished { query_id, result } = event {
            finished.push((*query_id, result.clone()));
        }
        finished.len() == 2
    });

    let latest = finished
        .iter()
        .find(|(query_id, _)| *query_id == 2)
        .map(|(_, result)| result.clone());
    assert_eq!(latest, Some(Ok(QuerySummary { row_count: 1 })));
}

#[test]
fn agent_and_sync_replies_are_forwarded() {
    let engine = engine();
    engine.ask_agent("kg-1", "What is cash?", "standard");
    let events = collect_until(&engine, |event| {
        matches!(event, EngineEvent::AgentReplied { .. })
    });
    let EngineEvent::AgentReplied { result } = events.last().unwrap() else {
        unreachable!();
    };
    assert_eq!(result.as_ref().unwrap().content(), "kg-1: What is cash?");

    engine.sync_connection("qb");
    let events = collect_until(&engine, |event| {
        matches!(event, EngineEvent::SyncStarted { .. })
    });
    assert_eq!(
        events.last().unwrap(),
        &EngineEvent::SyncStarted {
            connection_id: "qb".to_string(),
            result: Ok("op-qb".to_string()),
        }
    );
}
