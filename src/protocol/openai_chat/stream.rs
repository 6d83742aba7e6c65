use crate::util::sse_data_json_payload;

use super::{OpenAiStreamChunk, OpenAiUsage};

/// Finish reasons the relay reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishMarker {
    Stop,
    ToolCalls,
    Other(String),
}

impl FinishMarker {
    #[must_use]
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "stop" => FinishMarker::Stop,
            "tool_calls" => FinishMarker::ToolCalls,
            other => FinishMarker::Other(other.to_string()),
        }
    }
}

/// One decoded unit of an incremental completion.
#[derive(Debug, Clone, PartialEq)]
pub enum IncrementalEvent {
    TextDelta(String),
    /// A tool-call fragment. Only the opening fragment carries an `id`.
    ToolCallFragment {
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    Finish(FinishMarker),
    Usage {
        prompt_tokens: u64,
        completion_tokens: u64,
    },
}

/// Parse the `data` field of one upstream SSE frame.
///
/// Returns `None` for `[DONE]` and blank payloads.
#[must_use]
pub fn parse_openai_sse_data(data: &str) -> Option<Result<OpenAiStreamChunk, serde_json::Error>> {
    sse_data_json_payload(data).map(serde_json::from_str)
}

/// Decode an `OpenAI` stream chunk into incremental events.
#[must_use]
pub fn decode_openai_stream_chunk(chunk: OpenAiStreamChunk) -> Vec<IncrementalEvent> {
    let mut events = Vec::with_capacity(chunk.choices.len().saturating_mul(2) + 1);
    decode_openai_stream_chunk_into(chunk, &mut events);
    events
}

/// Decode an `OpenAI` stream chunk into a caller-provided events buffer.
///
/// Per choice, a finish reason takes precedence over the delta, and tool-call
/// fragments take precedence over text.
pub fn decode_openai_stream_chunk_into(chunk: OpenAiStreamChunk, out: &mut Vec<IncrementalEvent>) {
    for choice in chunk.choices {
        if let Some(reason) = choice.finish_reason {
            out.push(IncrementalEvent::Finish(FinishMarker::from_wire(&reason)));
            continue;
        }

        match choice.delta.tool_calls {
            Some(tool_calls) if !tool_calls.is_empty() => {
                for tc in tool_calls {
                    let (name, arguments) = match tc.function {
                        Some(func) => (func.name, func.arguments.unwrap_or_default()),
                        None => (None, String::new()),
                    };
                    out.push(IncrementalEvent::ToolCallFragment {
                        id: tc.id,
                        name,
                        arguments,
                    });
                }
            }
            _ => {
                if let Some(content) = choice.delta.content {
                    if !content.is_empty() {
                        out.push(IncrementalEvent::TextDelta(content));
                    }
                }
            }
        }
    }

    if let Some(OpenAiUsage {
        prompt_tokens,
        completion_tokens,
        ..
    }) = chunk.usage
    {
        out.push(IncrementalEvent::Usage {
            prompt_tokens,
            completion_tokens,
        });
    }
}
