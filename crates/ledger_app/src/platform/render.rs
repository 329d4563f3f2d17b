use std::io::{self, Write};

use chrono::Local;
use ledger_core::{MessageId, MessageKind, Transcript, TranscriptMessage};
use serde_json::Value;

/// Result tables show at most this many rows.
const MAX_TABLE_ROWS: usize = 20;

/// Prints transcript messages once each, in order.
pub struct Renderer<W: Write> {
    out: W,
    last_rendered: Option<MessageId>,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            last_rendered: None,
        }
    }

    /// Writes every message appended since the previous call and returns
    /// how many were written.
    pub fn render_new(&mut self, transcript: &Transcript) -> io::Result<usize> {
        let mut written = 0;
        for message in transcript.since(self.last_rendered) {
            let time = message.timestamp.with_timezone(&Local).format("%H:%M:%S");
            writeln!(self.out, "[{time}] {}", render_body(message))?;
            self.last_rendered = Some(message.id);
            written += 1;
        }
        self.out.flush()?;
        Ok(written)
    }

    pub fn prompt(&mut self, context_id: Option<&str>) -> io::Result<()> {
        write!(self.out, "{}> ", context_id.unwrap_or("no graph"))?;
        self.out.flush()
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}

fn prefix(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::System => "*",
        MessageKind::User => ">",
        MessageKind::Result => "=",
        MessageKind::Error => "!",
    }
}

/// Message text without the timestamp; continuation lines are indented.
pub fn render_body(message: &TranscriptMessage) -> String {
    let mut text = String::new();
    for (index, line) in message.content.lines().enumerate() {
        if index == 0 {
            text.push_str(prefix(message.kind));
            text.push(' ');
        } else {
            text.push_str("\n  ");
        }
        text.push_str(line);
    }
    if message.content.is_empty() {
        text.push_str(prefix(message.kind));
    }
    if let Some(Value::Array(rows)) = &message.data {
        for line in render_rows(rows) {
            text.push_str("\n  ");
            text.push_str(&line);
        }
    }
    text
}

fn render_rows(rows: &[Value]) -> Vec<String> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };
    let columns: Vec<&str> = match first {
        Value::Object(map) => map.keys().map(String::as_str).collect(),
        _ => Vec::new(),
    };

    let mut lines = Vec::new();
    if !columns.is_empty() {
        lines.push(columns.join(" | "));
    }
    for row in rows.iter().take(MAX_TABLE_ROWS) {
        let line = match row {
            Value::Object(map) if !columns.is_empty() => columns
                .iter()
                .map(|column| map.get(*column).map(cell).unwrap_or_default())
                .collect::<Vec<_>>()
                .join(" | "),
            other => cell(other),
        };
        lines.push(line);
    }
    if rows.len() > MAX_TABLE_ROWS {
        lines.push(format!("... {} more", rows.len() - MAX_TABLE_ROWS));
    }
    lines
}

fn cell(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::MessageDraft;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn body_of(draft: MessageDraft) -> String {
        let mut transcript = Transcript::default();
        transcript.append(draft);
        render_body(transcript.last().unwrap())
    }

    #[test]
    fn kinds_have_distinct_prefixes() {
        assert_eq!(body_of(MessageDraft::system("hi")), "* hi");
        assert_eq!(body_of(MessageDraft::user("/help")), "> /help");
        assert_eq!(body_of(MessageDraft::error("nope")), "! nope");
    }

    #[test]
    fn multiline_content_is_indented() {
        assert_eq!(
            body_of(MessageDraft::system("Commands:\n  /help")),
            "* Commands:\n    /help"
        );
    }

    #[test]
    fn result_rows_render_as_table() {
        let draft = MessageDraft::result("Query returned 2 rows.")
            .with_data(json!([{"code": "1000", "name": "Cash"}, {"code": "4000", "name": null}]));
        assert_eq!(
            body_of(draft),
            "= Query returned 2 rows.\n  code | name\n  1000 | Cash\n  4000 | null"
        );
    }

    #[test]
    fn long_results_are_truncated() {
        let rows: Vec<Value> = (0..25).map(|n| json!(n)).collect();
        let body = body_of(MessageDraft::result("many").with_data(Value::Array(rows)));
        assert!(body.ends_with("  19\n  ... 5 more"));
    }

    #[test]
    fn renderer_prints_each_message_once_across_clear() {
        let mut transcript = Transcript::default();
        transcript.append(MessageDraft::system("welcome"));
        let mut renderer = Renderer::new(Vec::new());
        renderer.render_new(&transcript).unwrap();

        transcript.append(MessageDraft::user("/clear"));
        transcript.clear();
        transcript.append(MessageDraft::system("Console cleared."));
        assert_eq!(renderer.render_new(&transcript).unwrap(), 1);
        assert_eq!(renderer.render_new(&transcript).unwrap(), 0);

        let output = String::from_utf8(renderer.into_inner()).unwrap();
        let bodies: Vec<&str> = output
            .lines()
            .map(|line| line.split_once("] ").unwrap().1)
            .collect();
        assert_eq!(bodies, vec!["* welcome", "* Console cleared."]);
    }
}
