use std::time::Duration;

use crate::debounce::DEFAULT_SUBMIT_DEBOUNCE;
use crate::transcript::DEFAULT_TRANSCRIPT_CAPACITY;

/// A named sample shown by `/examples`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleQuery {
    pub name: String,
    pub query: String,
}

impl SampleQuery {
    pub fn new(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
        }
    }
}

/// What an extra command does when dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraAction {
    /// Append a fixed system message.
    Reply(String),
    /// Hand the command to the embedding application via `Effect::HostCommand`.
    Host,
}

/// A caller-supplied command registered next to the built-ins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraCommand {
    pub name: String,
    pub description: String,
    pub action: ExtraAction,
}

impl ExtraCommand {
    pub fn host(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            action: ExtraAction::Host,
        }
    }

    pub fn reply(
        name: impl Into<String>,
        description: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            action: ExtraAction::Reply(text.into()),
        }
    }
}

/// Everything the console renders or decides from data rather than code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleConfig {
    pub console_name: String,
    /// Error shown when a query or question is issued without a graph.
    pub no_selection_error: String,
    pub natural_language_examples: Vec<String>,
    pub query_examples: Vec<String>,
    pub sample_queries: Vec<SampleQuery>,
    /// Conversation mode forwarded to the agent with every question.
    pub agent_mode: String,
    /// `None` keeps the whole session.
    pub transcript_capacity: Option<usize>,
    pub submit_debounce: Duration,
    pub extra_commands: Vec<ExtraCommand>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            console_name: "RoboLedger Console".to_string(),
            no_selection_error: "Please select a graph first.".to_string(),
            natural_language_examples: vec![
                "What is the cash balance at the end of last quarter?".to_string(),
                "Show me all accounts with a negative balance".to_string(),
            ],
            query_examples: vec![
                "/query MATCH (n) RETURN n LIMIT 5".to_string(),
                "/query MATCH (a:Account) RETURN a.name, a.balance ORDER BY a.balance DESC"
                    .to_string(),
            ],
            sample_queries: vec![
                SampleQuery::new("Node count", "MATCH (n) RETURN count(n)"),
                SampleQuery::new(
                    "Chart of accounts",
                    "MATCH (a:Account) RETURN a.code, a.name ORDER BY a.code",
                ),
                SampleQuery::new(
                    "Recent transactions",
                    "MATCH (t:Transaction) RETURN t ORDER BY t.date DESC LIMIT 20",
                ),
            ],
            agent_mode: "standard".to_string(),
            transcript_capacity: Some(DEFAULT_TRANSCRIPT_CAPACITY),
            submit_debounce: DEFAULT_SUBMIT_DEBOUNCE,
            extra_commands: Vec::new(),
        }
    }
}
