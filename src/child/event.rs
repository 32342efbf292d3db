//! Line-delimited JSON event protocol emitted by the child program.
//!
//! Tolerant reader: unknown event kinds and unparsable lines are ignored,
//! unknown fields are skipped, missing fields fall back to defaults.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events the driver recognizes on the child's stdout.
#[derive(Debug, Clone, PartialEq)]
pub enum ChildEvent {
    /// An assistant turn completed.
    MessageEnd(AssistantMessage),
    /// An intermediate tool result was produced.
    ToolResultEnd(ToolResultMessage),
    /// Anything else: skipped.
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub role: String,
    pub parts: Vec<ContentPart>,
    pub usage: UsageCounters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AssistantMessage {
    /// Concatenated text parts of this turn.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let ContentPart::Text { text } = part {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    pub fn is_error(&self) -> bool {
        self.stop_reason.as_deref() == Some("error") || self.error_message.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        #[serde(default)]
        arguments: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultMessage {
    #[serde(default)]
    pub tool_call_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

/// Aggregated token usage across assistant turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UsageCounters {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_write_tokens: u64,
}

impl UsageCounters {
    pub fn add(&mut self, other: &UsageCounters) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_write_tokens += other.cache_write_tokens;
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Parse one stdout line into a recognized event.
pub fn parse_line(line: &str) -> ChildEvent {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ChildEvent::Ignored;
    }
    let raw: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(_) => return ChildEvent::Ignored,
    };

    match raw.get("type").and_then(Value::as_str) {
        Some("message_end") => parse_message_end(&raw),
        Some("tool_result_end") => parse_tool_result_end(&raw),
        _ => ChildEvent::Ignored,
    }
}

fn parse_message_end(raw: &Value) -> ChildEvent {
    let msg = raw.get("message").unwrap_or(raw);

    let role = msg
        .get("role")
        .and_then(Value::as_str)
        .unwrap_or("assistant")
        .to_string();

    let parts = msg
        .get("content")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(parse_content_part).collect())
        .unwrap_or_default();

    let usage = msg
        .get("usage")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();

    ChildEvent::MessageEnd(AssistantMessage {
        role,
        parts,
        usage,
        model: msg.get("model").and_then(Value::as_str).map(String::from),
        stop_reason: msg
            .get("stop_reason")
            .and_then(Value::as_str)
            .map(String::from),
        error_message: msg
            .get("error_message")
            .and_then(Value::as_str)
            .map(String::from),
    })
}

fn parse_content_part(block: &Value) -> Option<ContentPart> {
    match block.get("type")?.as_str()? {
        "text" => Some(ContentPart::Text {
            text: block.get("text")?.as_str()?.to_string(),
        }),
        "tool_call" => Some(ContentPart::ToolCall {
            id: block.get("id")?.as_str()?.to_string(),
            name: block.get("name")?.as_str()?.to_string(),
            arguments: block.get("arguments").cloned().unwrap_or(Value::Null),
        }),
        _ => None,
    }
}

fn parse_tool_result_end(raw: &Value) -> ChildEvent {
    let msg = raw.get("message").unwrap_or(raw);
    ChildEvent::ToolResultEnd(ToolResultMessage {
        tool_call_id: msg
            .get("tool_call_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        content: msg
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        is_error: msg
            .get("is_error")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_message_end() {
        let line = r#"{"type":"message_end","message":{"role":"assistant","content":[{"type":"text","text":"done"},{"type":"tool_call","id":"tc1","name":"read","arguments":{"path":"a.rs"}}],"usage":{"input_tokens":10,"output_tokens":5},"model":"pi-large","stop_reason":"end_turn"}}"#;
        let ChildEvent::MessageEnd(msg) = parse_line(line) else {
            panic!("expected message_end");
        };
        assert_eq!(msg.role, "assistant");
        assert_eq!(msg.text(), "done");
        assert_eq!(msg.parts.len(), 2);
        assert_eq!(msg.usage.input_tokens, 10);
        assert_eq!(msg.model.as_deref(), Some("pi-large"));
        assert!(!msg.is_error());
    }

    #[test]
    fn test_parse_error_message() {
        let line = r#"{"type":"message_end","message":{"role":"assistant","content":[],"stop_reason":"error","error_message":"rate limited"}}"#;
        let ChildEvent::MessageEnd(msg) = parse_line(line) else {
            panic!("expected message_end");
        };
        assert!(msg.is_error());
        assert_eq!(msg.error_message.as_deref(), Some("rate limited"));
    }

    #[test]
    fn test_parse_tool_result_end() {
        let line = r#"{"type":"tool_result_end","message":{"tool_call_id":"tc1","content":"ok","is_error":false}}"#;
        let ChildEvent::ToolResultEnd(result) = parse_line(line) else {
            panic!("expected tool_result_end");
        };
        assert_eq!(result.tool_call_id, "tc1");
        assert_eq!(result.content, "ok");
    }

    #[test]
    fn test_unknown_and_garbage_lines_ignored() {
        assert_eq!(parse_line(""), ChildEvent::Ignored);
        assert_eq!(parse_line("not json"), ChildEvent::Ignored);
        assert_eq!(parse_line(r#"{"type":"heartbeat"}"#), ChildEvent::Ignored);
        assert_eq!(parse_line(r#"{"no_type":1}"#), ChildEvent::Ignored);
    }

    #[test]
    fn test_unknown_content_parts_skipped() {
        let line = r#"{"type":"message_end","message":{"role":"assistant","content":[{"type":"thinking","text":"hmm"},{"type":"text","text":"ok"}]}}"#;
        let ChildEvent::MessageEnd(msg) = parse_line(line) else {
            panic!("expected message_end");
        };
        assert_eq!(msg.parts.len(), 1);
        assert_eq!(msg.text(), "ok");
    }

    #[test]
    fn test_usage_sum() {
        let mut total = UsageCounters::default();
        total.add(&UsageCounters {
            input_tokens: 3,
            output_tokens: 4,
            ..Default::default()
        });
        total.add(&UsageCounters {
            input_tokens: 1,
            output_tokens: 2,
            cache_read_tokens: 9,
            ..Default::default()
        });
        assert_eq!(total.input_tokens, 4);
        assert_eq!(total.output_tokens, 6);
        assert_eq!(total.cache_read_tokens, 9);
        assert_eq!(total.total(), 10);
    }
}
