//! Ledger engine: backend API client, task status polling and effect execution.
mod client;
mod engine;
mod poller;
mod query;
mod types;

pub use client::{
    AgentClient, ClientSettings, ConnectionClient, QueryExecutor, ReqwestApiClient, RowSink,
    StatusClient,
};
pub use engine::{EngineConfig, EngineError, EngineHandle};
pub use poller::{
    ChannelObserver, PollTicket, PollVerdict, PollerSettings, PollerState, TaskObserver,
    TaskPoller,
};
pub use query::{QueryPhase, QueryTicket, StreamingQuery};
pub use types::{
    AgentReply, AgentRequest, ApiResponse, ClientError, EngineEvent, FailureKind,
    OperationStatus, QueryChunk, QuerySeq, QuerySummary, TaskEnd, TaskState,
};
