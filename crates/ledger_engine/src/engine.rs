use std::sync::{mpsc, Arc};
use std::thread;

use ledger_logging::{ledger_error, ledger_info};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::client::{
    AgentClient, ClientSettings, ConnectionClient, QueryExecutor, ReqwestApiClient, RowSink,
    StatusClient,
};
use crate::poller::{ChannelObserver, PollerSettings, TaskPoller};
use crate::query::StreamingQuery;
use crate::{AgentRequest, ClientError, EngineEvent, QuerySeq};

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub client: ClientSettings,
    pub poller: PollerSettings,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to start async runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("failed to build api client: {0}")]
    Client(#[from] ClientError),
}

enum EngineCommand {
    Track { task_id: String },
    CancelTask { task_id: String },
    ExecuteQuery {
        query_id: QuerySeq,
        graph_id: String,
        query: String,
    },
    CancelQuery,
    ResetQuery,
    AskAgent {
        graph_id: String,
        request: AgentRequest,
    },
    SyncConnection { connection_id: String },
}

/// Owns a tokio runtime on a worker thread and exchanges commands/events
/// with a synchronous caller.
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
    event_rx: mpsc::Receiver<EngineEvent>,
    shutdown: CancellationToken,
}

struct Workers {
    poller: TaskPoller,
    query: StreamingQuery,
    agent: Arc<dyn AgentClient>,
    connections: Arc<dyn ConnectionClient>,
    event_tx: mpsc::Sender<EngineEvent>,
}

impl EngineHandle {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let client = Arc::new(ReqwestApiClient::new(config.client)?);
        Self::with_backend(client, config.poller)
    }

    /// Builds the engine around any backend implementation.
    pub fn with_backend<B>(backend: Arc<B>, poller: PollerSettings) -> Result<Self, EngineError>
    where
        B: StatusClient + QueryExecutor + AgentClient + ConnectionClient + 'static,
    {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .thread_name("ledger-engine")
            .build()?;

        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let shutdown = CancellationToken::new();

        let status: Arc<dyn StatusClient> = backend.clone();
        let executor: Arc<dyn QueryExecutor> = backend.clone();
        let agent: Arc<dyn AgentClient> = backend.clone();
        let connections: Arc<dyn ConnectionClient> = backend;
        let workers = Workers {
            poller: TaskPoller::new(
                status,
                Arc::new(ChannelObserver::new(event_tx.clone())),
                poller,
            ),
            query: StreamingQuery::new(executor),
            agent,
            connections,
            event_tx,
        };

        let poller_shutdown = shutdown.clone();
        thread::Builder::new()
            .name("ledger-engine-commands".to_string())
            .spawn(move || {
                let poller = workers.poller.clone();
                runtime.spawn(async move { poller.run(poller_shutdown).await });
                while let Ok(command) = cmd_rx.recv() {
                    handle_command(&runtime, &workers, command);
                }
                ledger_info!("Engine command channel closed; shutting down");
                runtime.shutdown_background();
            })?;

        Ok(Self {
            cmd_tx,
            event_rx,
            shutdown,
        })
    }

    pub fn track(&self, task_id: impl Into<String>) {
        self.send(EngineCommand::Track {
            task_id: task_id.into(),
        });
    }

    pub fn cancel_task(&self, task_id: impl Into<String>) {
        self.send(EngineCommand::CancelTask {
            task_id: task_id.into(),
        });
    }

    pub fn execute_query(
        &self,
        query_id: QuerySeq,
        graph_id: impl Into<String>,
        query: impl Into<String>,
    ) {
        self.send(EngineCommand::ExecuteQuery {
            query_id,
            graph_id: graph_id.into(),
            query: query.into(),
        });
    }

    pub fn cancel_query(&self) {
        self.send(EngineCommand::CancelQuery);
    }

    pub fn reset_query(&self) {
        self.send(EngineCommand::ResetQuery);
    }

    pub fn ask_agent(
        &self,
        graph_id: impl Into<String>,
        message: impl Into<String>,
        mode: impl Into<String>,
    ) {
        self.send(EngineCommand::AskAgent {
            graph_id: graph_id.into(),
            request: AgentRequest {
                message: message.into(),
                mode: mode.into(),
            },
        });
    }

    pub fn sync_connection(&self, connection_id: impl Into<String>) {
        self.send(EngineCommand::SyncConnection {
            connection_id: connection_id.into(),
        });
    }

    pub fn try_recv(&self) -> Option<EngineEvent> {
        self.event_rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: std::time::Duration) -> Option<EngineEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    fn send(&self, command: EngineCommand) {
        if self.cmd_tx.send(command).is_err() {
            ledger_error!("Engine worker is gone; command dropped");
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn handle_command(runtime: &tokio::runtime::Runtime, workers: &Workers, command: EngineCommand) {
    match command {
        EngineCommand::Track { task_id } => {
            workers.poller.track(&task_id);
        }
        EngineCommand::CancelTask { task_id } => {
            workers.poller.cancel(&task_id);
        }
        EngineCommand::ExecuteQuery {
            query_id,
            graph_id,
            query,
        } => {
            let streaming = workers.query.clone();
            let event_tx = workers.event_tx.clone();
            let ticket = streaming.begin(query_id);
            runtime.spawn(async move {
                let sink = ChannelRowSink {
                    query_id,
                    tx: event_tx.clone(),
                };
                let result = streaming.run(ticket, &graph_id, &query, &sink).await;
                let _ = event_tx.send(EngineEvent::QueryFinished { query_id, result });
            });
        }
        EngineCommand::CancelQuery => {
            workers.query.cancel_query();
        }
        EngineCommand::ResetQuery => workers.query.reset(),
        EngineCommand::AskAgent { graph_id, request } => {
            let agent = workers.agent.clone();
            let event_tx = workers.event_tx.clone();
            runtime.spawn(async move {
                let result = agent.ask_agent(&graph_id, &request).await;
                let _ = event_tx.send(EngineEvent::AgentReplied { result });
            });
        }
        EngineCommand::SyncConnection { connection_id } => {
            let connections = workers.connections.clone();
            let event_tx = workers.event_tx.clone();
            runtime.spawn(async move {
                let result = connections.sync_connection(&connection_id).await;
                let _ = event_tx.send(EngineEvent::SyncStarted {
                    connection_id,
                    result,
                });
            });
        }
    }
}

struct ChannelRowSink {
    query_id: QuerySeq,
    tx: mpsc::Sender<EngineEvent>,
}

impl RowSink for ChannelRowSink {
    fn emit(&self, rows: Vec<Value>) {
        let _ = self.tx.send(EngineEvent::QueryRows {
            query_id: self.query_id,
            rows,
        });
    }
}
