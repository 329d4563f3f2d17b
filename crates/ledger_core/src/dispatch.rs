use ledger_logging::{ledger_debug, ledger_warn};

use crate::config::{ConsoleConfig, ExtraAction};
use crate::transcript::MessageDraft;
use crate::{ConsoleState, Effect, ParsedInput};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Help,
    Clear,
    Examples,
    Query,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handler {
    Builtin(Builtin),
    Extra(ExtraAction),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEntry {
    pub description: String,
    pub handler: Handler,
}

/// Command name to handler, kept in registration order for `/help`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRegistry {
    entries: Vec<(String, CommandEntry)>,
}

impl CommandRegistry {
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            entries: Vec::new(),
        };
        for (name, description, builtin) in [
            ("help", "Show available commands", Builtin::Help),
            ("clear", "Clear the console", Builtin::Clear),
            ("examples", "Show sample queries", Builtin::Examples),
            ("query", "Run a Cypher query: /query <cypher>", Builtin::Query),
        ] {
            registry.register(
                name,
                CommandEntry {
                    description: description.to_string(),
                    handler: Handler::Builtin(builtin),
                },
            );
        }
        registry
    }

    /// Built-ins plus the configured extra commands.
    pub fn from_config(config: &ConsoleConfig) -> Self {
        let mut registry = Self::with_builtins();
        for extra in &config.extra_commands {
            let entry = CommandEntry {
                description: extra.description.clone(),
                handler: Handler::Extra(extra.action.clone()),
            };
            if let Some(previous) = registry.register(&extra.name, entry) {
                ledger_warn!(
                    "Extra command /{} replaces existing handler {:?}",
                    normalize_name(&extra.name),
                    previous.handler
                );
            }
        }
        registry
    }

    /// Registers `entry` under `name` (leading `/` optional, case-insensitive).
    /// Returns the entry it replaced, if any.
    pub fn register(&mut self, name: &str, entry: CommandEntry) -> Option<CommandEntry> {
        let name = normalize_name(name);
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, entry)),
            None => {
                self.entries.push((name, entry));
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&CommandEntry> {
        let name = normalize_name(name);
        self.entries
            .iter()
            .find(|(existing, _)| *existing == name)
            .map(|(_, entry)| entry)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &CommandEntry)> + '_ {
        self.entries
            .iter()
            .map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().trim_start_matches('/').to_lowercase()
}

/// Routes a parsed line to its handler. Handlers only touch the transcript
/// and query state; everything else leaves as effects.
pub(crate) fn dispatch(state: &mut ConsoleState, input: ParsedInput) -> Vec<Effect> {
    let (name, argument) = match input {
        ParsedInput::NaturalLanguage(text) => return ask_agent(state, text),
        ParsedInput::Command { name, argument } => (name, argument),
    };

    let Some(handler) = state.registry().get(&name).map(|entry| entry.handler.clone()) else {
        ledger_debug!("Unknown console command /{}", name);
        state.push(MessageDraft::error(format!("Unknown command: /{name}")));
        return Vec::new();
    };

    match handler {
        Handler::Builtin(Builtin::Help) => {
            let text = help_text(state);
            state.push(MessageDraft::system(text));
            Vec::new()
        }
        Handler::Builtin(Builtin::Clear) => {
            state.transcript_mut().clear();
            state.push(MessageDraft::system("Console cleared."));
            Vec::new()
        }
        Handler::Builtin(Builtin::Examples) => {
            let text = examples_text(state.config());
            state.push(MessageDraft::system(text));
            Vec::new()
        }
        Handler::Builtin(Builtin::Query) => run_query(state, argument),
        Handler::Extra(ExtraAction::Reply(text)) => {
            state.push(MessageDraft::system(text));
            Vec::new()
        }
        Handler::Extra(ExtraAction::Host) => vec![Effect::HostCommand { name, argument }],
    }
}

fn run_query(state: &mut ConsoleState, argument: String) -> Vec<Effect> {
    let Some(context_id) = state.context_id().map(ToOwned::to_owned) else {
        let error = state.config().no_selection_error.clone();
        state.push(MessageDraft::error(error));
        return Vec::new();
    };
    if argument.trim().is_empty() {
        state.push(MessageDraft::error("Usage: /query <cypher>"));
        return Vec::new();
    }

    let query_id = state.begin_query();
    vec![
        Effect::ResetQuery,
        Effect::ExecuteQuery {
            query_id,
            context_id,
            query: argument,
        },
    ]
}

fn ask_agent(state: &mut ConsoleState, message: String) -> Vec<Effect> {
    let Some(context_id) = state.context_id().map(ToOwned::to_owned) else {
        let error = state.config().no_selection_error.clone();
        state.push(MessageDraft::error(error));
        return Vec::new();
    };
    state.note_agent_request();
    vec![Effect::AskAgent {
        context_id,
        message,
        mode: state.config().agent_mode.clone(),
    }]
}

fn help_text(state: &ConsoleState) -> String {
    let config = state.config();
    let width = state
        .registry()
        .entries()
        .map(|(name, _)| name.len() + 1)
        .max()
        .unwrap_or(0);

    let mut lines = vec![format!("{} commands:", config.console_name)];
    for (name, entry) in state.registry().entries() {
        lines.push(format!(
            "  {:<width$}  {}",
            format!("/{name}"),
            entry.description,
            width = width
        ));
    }
    if !config.natural_language_examples.is_empty() {
        lines.push(String::new());
        lines.push("Ask a question in plain language:".to_string());
        lines.extend(
            config
                .natural_language_examples
                .iter()
                .map(|example| format!("  {example}")),
        );
    }
    if !config.query_examples.is_empty() {
        lines.push(String::new());
        lines.push("Or run Cypher directly:".to_string());
        lines.extend(
            config
                .query_examples
                .iter()
                .map(|example| format!("  {example}")),
        );
    }
    lines.join("\n")
}

fn examples_text(config: &ConsoleConfig) -> String {
    if config.sample_queries.is_empty() {
        return "No sample queries configured.".to_string();
    }
    let mut lines = vec!["Sample queries:".to_string()];
    for sample in &config.sample_queries {
        lines.push(format!("  {}:", sample.name));
        lines.push(format!("    /query {}", sample.query));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExtraCommand;

    #[test]
    fn registry_lookup_ignores_slash_and_case() {
        let registry = CommandRegistry::with_builtins();
        assert_eq!(
            registry.get("/HELP").map(|entry| &entry.handler),
            Some(&Handler::Builtin(Builtin::Help))
        );
        assert!(registry.get("nope").is_none());
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn extra_commands_extend_and_may_replace() {
        let config = ConsoleConfig {
            extra_commands: vec![
                ExtraCommand::host("/use", "Select a graph"),
                ExtraCommand::reply("examples", "Custom examples", "none here"),
            ],
            ..ConsoleConfig::default()
        };
        let registry = CommandRegistry::from_config(&config);

        assert_eq!(registry.len(), 5);
        assert_eq!(
            registry.get("use").map(|entry| &entry.handler),
            Some(&Handler::Extra(ExtraAction::Host))
        );
        assert_eq!(
            registry.get("examples").map(|entry| &entry.handler),
            Some(&Handler::Extra(ExtraAction::Reply("none here".into())))
        );
    }
}
