/// A classified line of console input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedInput {
    /// `/name argument`. The name is lowercased and carries no leading slash;
    /// the argument is everything after the first whitespace, verbatim.
    Command { name: String, argument: String },
    /// Anything not starting with `/`, forwarded to the agent as-is.
    NaturalLanguage(String),
}

impl ParsedInput {
    pub fn command(name: impl Into<String>, argument: impl Into<String>) -> Self {
        Self::Command {
            name: name.into(),
            argument: argument.into(),
        }
    }
}

/// Classifies a line of input. Returns `None` for empty or whitespace-only
/// input, which must not be dispatched.
///
/// Recognition of the command name is left to the dispatcher.
pub fn parse_input(raw: &str) -> Option<ParsedInput> {
    let line = raw.trim();
    if line.is_empty() {
        return None;
    }

    let Some(rest) = line.strip_prefix('/') else {
        return Some(ParsedInput::NaturalLanguage(line.to_string()));
    };

    let (token, argument) = match rest.find(char::is_whitespace) {
        Some(split) => {
            let separator_len = rest[split..].chars().next().map_or(1, char::len_utf8);
            (&rest[..split], &rest[split + separator_len..])
        }
        None => (rest, ""),
    };

    Some(ParsedInput::command(token.to_lowercase(), argument))
}
