//! Ledger console core: pure state machine for the command console and
//! tracked backend operations.
mod command;
mod config;
mod debounce;
mod dispatch;
mod effect;
mod msg;
mod query;
mod state;
mod task;
mod transcript;
mod update;
mod view_model;

pub use command::{parse_input, ParsedInput};
pub use config::{ConsoleConfig, ExtraAction, ExtraCommand, SampleQuery};
pub use debounce::{Debounce, DEFAULT_SUBMIT_DEBOUNCE};
pub use dispatch::{Builtin, CommandEntry, CommandRegistry, Handler};
pub use effect::Effect;
pub use msg::{AgentReply, Msg, QueryOutcome};
pub use query::{QueryId, QueryState, QueryStatus};
pub use state::ConsoleState;
pub use task::{TaskEnd, TaskId, TaskStatus, TrackedTask};
pub use transcript::{
    MessageDraft, MessageId, MessageKind, Transcript, TranscriptMessage,
    DEFAULT_TRANSCRIPT_CAPACITY,
};
pub use update::update;
pub use view_model::{ConsoleViewModel, TaskRowView};
