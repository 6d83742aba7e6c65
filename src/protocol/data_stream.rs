//! Line-oriented data stream protocol spoken to the chat client.
//!
//! Every event is one `<tag>:<json>\n` line:
//! - `0` text delta, payload is a JSON string
//! - `9` tool-call start, `{"toolCallId","toolName","args"}`
//! - `a` tool-call result, `{"toolCallId","toolName","args","result"}`
//! - `e` end of stream, `{"finishReason","usage":{..},"isContinued":false}`
use serde_json::value::RawValue;

use crate::util::{push_json_string_escaped, push_u64_decimal};

/// Response header announcing the stream protocol version to the client.
pub const DATA_STREAM_HEADER: &str = "x-vercel-ai-data-stream";
pub const DATA_STREAM_VERSION: &str = "v1";

const EMPTY_ARGS: &str = "{}";

/// Why the response ended, as reported in the `e` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
}

impl FinishReason {
    #[must_use]
    pub fn as_wire(self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::ToolCalls => "tool-calls",
        }
    }
}

/// Token usage totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl Usage {
    #[must_use]
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// One event of the outbound stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta(String),
    ToolCallStart {
        tool_call_id: String,
        tool_name: String,
        args: Box<RawValue>,
    },
    ToolCallResult {
        tool_call_id: String,
        tool_name: String,
        args: Box<RawValue>,
        result: serde_json::Value,
    },
    StreamEnd {
        finish_reason: FinishReason,
        usage: Usage,
        is_continued: bool,
    },
}

impl StreamEvent {
    #[must_use]
    pub fn end(finish_reason: FinishReason, usage: Usage) -> Self {
        StreamEvent::StreamEnd {
            finish_reason,
            usage,
            is_continued: false,
        }
    }

    #[must_use]
    pub fn tag(&self) -> char {
        match self {
            StreamEvent::TextDelta(_) => '0',
            StreamEvent::ToolCallStart { .. } => '9',
            StreamEvent::ToolCallResult { .. } => 'a',
            StreamEvent::StreamEnd { .. } => 'e',
        }
    }
}

/// Turn tool argument text into a raw JSON value for the wire.
///
/// Blank text becomes `{}`; text that is not valid JSON is carried as a JSON
/// string so the line stays parseable. Multi-line JSON is re-serialized
/// compactly, the result never contains a line break.
#[must_use]
pub fn args_to_raw(arguments: &str) -> Box<RawValue> {
    let trimmed = arguments.trim();
    if trimmed.is_empty() {
        return empty_args_raw();
    }
    if memchr::memchr2(b'\n', b'\r', trimmed.as_bytes()).is_some() {
        return match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(value) => value_to_raw(&value),
            Err(_) => quoted_args_raw(arguments),
        };
    }
    RawValue::from_string(trimmed.to_string()).unwrap_or_else(|_| quoted_args_raw(arguments))
}

fn quoted_args_raw(arguments: &str) -> Box<RawValue> {
    let mut quoted = String::with_capacity(arguments.len() + 2);
    push_json_string_escaped(&mut quoted, arguments);
    RawValue::from_string(quoted).unwrap_or_else(|_| empty_args_raw())
}

/// Serialize an already-decoded argument value as a raw JSON value.
#[must_use]
pub fn value_to_raw(value: &serde_json::Value) -> Box<RawValue> {
    serde_json::value::to_raw_value(value).unwrap_or_else(|_| empty_args_raw())
}

fn empty_args_raw() -> Box<RawValue> {
    // `{}` always parses.
    RawValue::from_string(EMPTY_ARGS.to_string()).unwrap_or_default()
}

/// Encode one event as a wire line, newline included.
#[must_use]
pub fn encode_stream_event(event: &StreamEvent) -> String {
    let mut out = String::with_capacity(64);
    encode_stream_event_into(event, &mut out);
    out
}

/// Append one encoded event line to `out`.
pub fn encode_stream_event_into(event: &StreamEvent, out: &mut String) {
    out.push(event.tag());
    out.push(':');
    match event {
        StreamEvent::TextDelta(text) => {
            out.reserve(text.len() + 3);
            push_json_string_escaped(out, text);
        }
        StreamEvent::ToolCallStart {
            tool_call_id,
            tool_name,
            args,
        } => {
            push_tool_call_head(out, tool_call_id, tool_name, args);
            out.push('}');
        }
        StreamEvent::ToolCallResult {
            tool_call_id,
            tool_name,
            args,
            result,
        } => {
            push_tool_call_head(out, tool_call_id, tool_name, args);
            out.push_str(",\"result\":");
            match serde_json::to_string(result) {
                Ok(json) => out.push_str(&json),
                Err(_) => out.push_str("null"),
            }
            out.push('}');
        }
        StreamEvent::StreamEnd {
            finish_reason,
            usage,
            is_continued,
        } => {
            out.push_str("{\"finishReason\":");
            push_json_string_escaped(out, finish_reason.as_wire());
            out.push_str(",\"usage\":{\"promptTokens\":");
            push_u64_decimal(out, usage.prompt_tokens);
            out.push_str(",\"completionTokens\":");
            push_u64_decimal(out, usage.completion_tokens);
            out.push_str("},\"isContinued\":");
            out.push_str(if *is_continued { "true" } else { "false" });
            out.push('}');
        }
    }
    out.push('\n');
}

fn push_tool_call_head(out: &mut String, tool_call_id: &str, tool_name: &str, args: &RawValue) {
    out.reserve(48 + tool_call_id.len() + tool_name.len() + args.get().len());
    out.push_str("{\"toolCallId\":");
    push_json_string_escaped(out, tool_call_id);
    out.push_str(",\"toolName\":");
    push_json_string_escaped(out, tool_name);
    out.push_str(",\"args\":");
    out.push_str(args.get());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(line: &str) -> serde_json::Value {
        let (_, json) = line.trim_end_matches('\n').split_once(':').unwrap();
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_text_delta_line() {
        let line = encode_stream_event(&StreamEvent::TextDelta("Hello".into()));
        assert_eq!(line, "0:\"Hello\"\n");
    }

    #[test]
    fn test_text_delta_escapes_newlines_and_quotes() {
        let line = encode_stream_event(&StreamEvent::TextDelta("say \"hi\"\nbye".into()));
        assert_eq!(line, "0:\"say \\\"hi\\\"\\nbye\"\n");
        assert_eq!(line.matches('\n').count(), 1);
        assert_eq!(payload(&line), json!("say \"hi\"\nbye"));
    }

    #[test]
    fn test_tool_call_start_keeps_raw_args() {
        let line = encode_stream_event(&StreamEvent::ToolCallStart {
            tool_call_id: "call_1".into(),
            tool_name: "get_current_weather".into(),
            args: args_to_raw(r#"{"latitude":1,"longitude":2}"#),
        });
        assert_eq!(
            line,
            "9:{\"toolCallId\":\"call_1\",\"toolName\":\"get_current_weather\",\"args\":{\"latitude\":1,\"longitude\":2}}\n"
        );
    }

    #[test]
    fn test_multiline_args_are_compacted() {
        let raw = args_to_raw("{\n  \"value\": \"a\",\r\n  \"n\": [1,\n 2]\n}");
        assert!(!raw.get().contains('\n') && !raw.get().contains('\r'));

        let line = encode_stream_event(&StreamEvent::ToolCallStart {
            tool_call_id: "call_1".into(),
            tool_name: "echo".into(),
            args: raw,
        });
        assert_eq!(line.matches('\n').count(), 1);
        assert_eq!(payload(&line)["args"], json!({"value": "a", "n": [1, 2]}));
    }

    #[test]
    fn test_invalid_multiline_args_stay_on_one_line() {
        let raw = args_to_raw("{\n  \"value\":");
        assert!(!raw.get().contains('\n'));
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(raw.get()).unwrap(),
            json!("{\n  \"value\":")
        );
    }

    #[test]
    fn test_tool_call_result_line() {
        let line = encode_stream_event(&StreamEvent::ToolCallResult {
            tool_call_id: "call_1".into(),
            tool_name: "get_current_weather".into(),
            args: args_to_raw(r#"{"latitude":1}"#),
            result: json!({"temperature": 21.5}),
        });
        assert!(line.starts_with("a:"));
        assert_eq!(
            payload(&line),
            json!({
                "toolCallId": "call_1",
                "toolName": "get_current_weather",
                "args": {"latitude": 1},
                "result": {"temperature": 21.5}
            })
        );
    }

    #[test]
    fn test_stream_end_line() {
        let line = encode_stream_event(&StreamEvent::end(FinishReason::Stop, Usage::new(10, 5)));
        assert_eq!(
            line,
            "e:{\"finishReason\":\"stop\",\"usage\":{\"promptTokens\":10,\"completionTokens\":5},\"isContinued\":false}\n"
        );
        let line = encode_stream_event(&StreamEvent::end(FinishReason::ToolCalls, Usage::default()));
        assert_eq!(payload(&line)["finishReason"], "tool-calls");
    }

    #[test]
    fn test_blank_args_become_empty_object() {
        assert_eq!(args_to_raw("").get(), "{}");
        assert_eq!(args_to_raw("  \n").get(), "{}");
    }

    #[test]
    fn test_invalid_args_are_carried_as_string() {
        let raw = args_to_raw("{\"latitude\":");
        assert_eq!(raw.get(), "\"{\\\"latitude\\\":\"");
        let line = encode_stream_event(&StreamEvent::ToolCallStart {
            tool_call_id: "x".into(),
            tool_name: "t".into(),
            args: raw,
        });
        assert_eq!(payload(&line)["args"], json!("{\"latitude\":"));
    }

    #[test]
    fn test_value_to_raw() {
        assert_eq!(value_to_raw(&json!({"a": [1, 2]})).get(), "{\"a\":[1,2]}");
    }
}
