use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ledger_engine::{
    ApiResponse, ClientError, FailureKind, OperationStatus, PollerSettings, StatusClient,
    TaskEnd, TaskObserver, TaskPoller, TaskState,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

type Reply = Result<ApiResponse<OperationStatus>, ClientError>;

fn status(id: &str, state: TaskState, progress: Option<f64>) -> OperationStatus {
    OperationStatus {
        task_id: id.to_string(),
        status: state,
        message: format!("{state:?}"),
        progress,
        step: None,
        error: None,
        result: None,
    }
}

/// Answers each task id from a script; the last reply repeats.
#[derive(Default)]
struct ScriptedClient {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: AtomicUsize,
}

impl ScriptedClient {
    fn script(self, task_id: &str, replies: Vec<Reply>) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert(task_id.to_string(), replies.into());
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl StatusClient for ScriptedClient {
    async fn operation_status(&self, task_id: &str) -> Reply {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut replies = self.replies.lock().unwrap();
        let queue = replies.get_mut(task_id).expect("scripted task");
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Seen {
    Update(String, TaskState),
    PollError(String, FailureKind),
    End(String, TaskEnd),
}

#[derive(Default)]
struct RecordingObserver {
    seen: Mutex<Vec<Seen>>,
}

impl RecordingObserver {
    fn take(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().drain(..).collect()
    }
}

impl TaskObserver for RecordingObserver {
    fn on_update(&self, status: &OperationStatus) {
        self.seen
            .lock()
            .unwrap()
            .push(Seen::Update(status.task_id.clone(), status.status));
    }

    fn on_end(&self, task_id: &str, end: &TaskEnd) {
        self.seen
            .lock()
            .unwrap()
            .push(Seen::End(task_id.to_string(), end.clone()));
    }

    fn on_poll_error(&self, task_id: &str, error: &ClientError) {
        self.seen
            .lock()
            .unwrap()
            .push(Seen::PollError(task_id.to_string(), error.kind.clone()));
    }
}

fn poller(
    client: Arc<ScriptedClient>,
    settings: PollerSettings,
) -> (TaskPoller, Arc<RecordingObserver>) {
    let observer = Arc::new(RecordingObserver::default());
    (TaskPoller::new(client, observer.clone(), settings), observer)
}

#[tokio::test(start_paused = true)]
async fn polling_stops_after_completion() {
    let mut done = status("op-1", TaskState::Completed, Some(100.0));
    done.result = Some(json!("done"));
    let client = Arc::new(ScriptedClient::default().script(
        "op-1",
        vec![
            Ok(ApiResponse::Parsed(status("op-1", TaskState::Pending, None))),
            Ok(ApiResponse::Parsed(status("op-1", TaskState::InProgress, Some(50.0)))),
            Ok(ApiResponse::Parsed(done.clone())),
        ],
    ));
    let (poller, observer) = poller(client.clone(), PollerSettings::default());
    assert!(poller.track("op-1"));

    let shutdown = CancellationToken::new();
    let runner = {
        let poller = poller.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { poller.run(shutdown).await })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(client.calls(), 0);

    tokio::time::sleep(Duration::from_secs(20)).await;
    shutdown.cancel();
    runner.await.unwrap();

    assert_eq!(client.calls(), 3);
    assert!(!poller.is_active("op-1"));
    assert_eq!(
        observer.take(),
        vec![
            Seen::Update("op-1".into(), TaskState::Pending),
            Seen::Update("op-1".into(), TaskState::InProgress),
            Seen::Update("op-1".into(), TaskState::Completed),
            Seen::End("op-1".into(), TaskEnd::Terminal(done)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn task_times_out_after_max_wait() {
    let client = Arc::new(ScriptedClient::default().script(
        "slow",
        vec![Ok(ApiResponse::Parsed(status("slow", TaskState::InProgress, None)))],
    ));
    let (poller, observer) = poller(client.clone(), PollerSettings::default());
    poller.track("slow");

    poller.poll_once().await;
    assert_eq!(client.calls(), 1);
    observer.take();

    tokio::time::advance(Duration::from_secs(601)).await;
    poller.poll_once().await;

    assert_eq!(client.calls(), 1);
    assert_eq!(
        observer.take(),
        vec![Seen::End(
            "slow".into(),
            TaskEnd::TimedOut {
                after: Duration::from_secs(600)
            }
        )]
    );
    assert!(poller.active_ids().is_empty());
}

#[tokio::test(start_paused = true)]
async fn repeated_failures_give_up() {
    let failure = ClientError {
        kind: FailureKind::HttpStatus(503),
        message: "Service Unavailable".to_string(),
    };
    let client = Arc::new(ScriptedClient::default().script("op-2", vec![Err(failure)]));
    let settings = PollerSettings {
        max_consecutive_failures: Some(3),
        ..PollerSettings::default()
    };
    let (poller, observer) = poller(client.clone(), settings);
    poller.track("op-2");

    for _ in 0..5 {
        poller.poll_once().await;
    }

    assert_eq!(client.calls(), 3);
    assert_eq!(
        observer.take(),
        vec![
            Seen::PollError("op-2".into(), FailureKind::HttpStatus(503)),
            Seen::PollError("op-2".into(), FailureKind::HttpStatus(503)),
            Seen::PollError("op-2".into(), FailureKind::HttpStatus(503)),
            Seen::End("op-2".into(), TaskEnd::Unreachable { failures: 3 }),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn malformed_status_counts_as_failure() {
    let client = Arc::new(ScriptedClient::default().script(
        "op-3",
        vec![Ok(ApiResponse::Malformed("{}".to_string()))],
    ));
    let (poller, observer) = poller(client, PollerSettings::default());
    poller.track("op-3");
    poller.poll_once().await;

    assert_eq!(
        observer.take(),
        vec![Seen::PollError("op-3".into(), FailureKind::Malformed)]
    );
    assert!(poller.is_active("op-3"));
}

#[tokio::test(start_paused = true)]
async fn mismatched_id_in_response_is_attributed_to_tracked_task() {
    let client = Arc::new(ScriptedClient::default().script(
        "op-4",
        vec![Ok(ApiResponse::Parsed(status("other", TaskState::InProgress, None)))],
    ));
    let (poller, observer) = poller(client, PollerSettings::default());
    poller.track("op-4");
    poller.poll_once().await;

    assert_eq!(
        observer.take(),
        vec![Seen::Update("op-4".into(), TaskState::InProgress)]
    );
}

/// Holds the status request open until the test releases it.
struct GatedClient {
    entered: Notify,
    release: Notify,
}

#[async_trait::async_trait]
impl StatusClient for GatedClient {
    async fn operation_status(&self, task_id: &str) -> Reply {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(ApiResponse::Parsed(status(task_id, TaskState::Completed, Some(100.0))))
    }
}

#[tokio::test]
async fn cancel_during_request_drops_the_response() {
    let client = Arc::new(GatedClient {
        entered: Notify::new(),
        release: Notify::new(),
    });
    let observer = Arc::new(RecordingObserver::default());
    let poller = TaskPoller::new(client.clone(), observer.clone(), PollerSettings::default());
    poller.track("op-5");

    let in_flight = {
        let poller = poller.clone();
        tokio::spawn(async move { poller.poll_once().await })
    };
    client.entered.notified().await;
    assert!(poller.cancel("op-5"));
    client.release.notify_one();
    in_flight.await.unwrap();

    assert_eq!(observer.take(), Vec::<Seen>::new());
    assert!(!poller.is_active("op-5"));
}

#[tokio::test]
async fn retrack_after_cancel_polls_again() {
    let client = Arc::new(ScriptedClient::default().script(
        "op-6",
        vec![Ok(ApiResponse::Parsed(status("op-6", TaskState::InProgress, None)))],
    ));
    let (poller, observer) = poller(client.clone(), PollerSettings::default());
    poller.track("op-6");
    assert!(poller.cancel("op-6"));
    assert!(!poller.cancel("op-6"));

    poller.poll_once().await;
    assert_eq!(client.calls(), 0);

    assert!(poller.track("op-6"));
    poller.poll_once().await;
    assert_eq!(client.calls(), 1);
    assert_eq!(
        observer.take(),
        vec![Seen::Update("op-6".into(), TaskState::InProgress)]
    );
}
