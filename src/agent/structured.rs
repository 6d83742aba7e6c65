use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;

use super::tagged::{parse_tagged_response, structured_system_prompt, ParsedToolCall};
use super::{usage_from_openai, EventStream, ResponseProducer};
use crate::error::RelayError;
use crate::protocol::adapter::build_completion_request;
use crate::protocol::data_stream::{value_to_raw, FinishReason, StreamEvent, Usage};
use crate::protocol::openai_chat::{CompletionRequest, OpenAiContent, OpenAiMessage};
use crate::tools::ToolRegistry;
use crate::transport::CompletionService;

/// Id given to the single tool call a tagged response can carry.
pub const STRUCTURED_TOOL_CALL_ID: &str = "xml_tool_call_1";

const SYSTEM_ROLE: &str = "system";
const DEBUG_RULE_WIDTH: usize = 50;

/// Requests one complete answer in the tagged format and replays it as events.
///
/// Failures never surface as errors: they become a text event followed by a
/// zero-usage end. A completion without content ends with its usage only.
pub struct StructuredTagProducer<C> {
    client: Arc<C>,
    tools: Arc<ToolRegistry>,
    model: String,
    debug: bool,
}

impl<C: CompletionService> StructuredTagProducer<C> {
    #[must_use]
    pub fn new(
        client: Arc<C>,
        tools: Arc<ToolRegistry>,
        model: impl Into<String>,
        debug: bool,
    ) -> Self {
        Self {
            client,
            tools,
            model: model.into(),
            debug,
        }
    }

    /// Replace client system messages with the tagged-format instructions.
    fn build_request(&self, messages: Vec<OpenAiMessage>) -> CompletionRequest {
        let mut upstream = Vec::with_capacity(messages.len() + 1);
        upstream.push(OpenAiMessage {
            role: SYSTEM_ROLE.to_string(),
            content: Some(OpenAiContent::Text(structured_system_prompt(
                self.tools.declarations(),
            ))),
            tool_calls: None,
            tool_call_id: None,
        });
        upstream.extend(messages.into_iter().filter(|m| m.role != SYSTEM_ROLE));
        build_completion_request(upstream, &self.model, false, &[])
    }
}

impl<C: CompletionService> ResponseProducer for StructuredTagProducer<C> {
    async fn produce(&self, messages: Vec<OpenAiMessage>) -> Result<EventStream, RelayError> {
        let state = StructuredState {
            phase: Phase::Requesting(self.build_request(messages)),
            client: Arc::clone(&self.client),
            tools: Arc::clone(&self.tools),
            debug: self.debug,
            pending: VecDeque::with_capacity(4),
        };
        Ok(structured_events(state))
    }
}

enum Phase {
    Requesting(CompletionRequest),
    ExecutingTool { call: ParsedToolCall, usage: Usage },
    Done,
}

struct StructuredState<C> {
    phase: Phase,
    client: Arc<C>,
    tools: Arc<ToolRegistry>,
    debug: bool,
    pending: VecDeque<StreamEvent>,
}

impl<C> StructuredState<C> {
    fn push_text(&mut self, text: String) {
        self.pending.push_back(StreamEvent::TextDelta(text));
    }

    fn fail(&mut self, err: &RelayError) {
        tracing::warn!(error = %err, "structured response failed");
        self.push_text(format!("Error in structured response processing: {err}"));
        self.pending
            .push_back(StreamEvent::end(FinishReason::Stop, Usage::default()));
        self.phase = Phase::Done;
    }

    /// Parsing step: emit reasoning and, when present, the tool-call start.
    fn parse(&mut self, content: &str, usage: Usage) -> Result<(), RelayError> {
        if self.debug {
            self.push_text(format!(
                "🔍 RAW XML RESPONSE:\n\n{content}\n\n{}\n\n",
                "=".repeat(DEBUG_RULE_WIDTH)
            ));
        }

        let parsed = parse_tagged_response(content);
        if !parsed.reasoning.is_empty() {
            let text = if self.debug {
                format!("📋 PARSED REASONING:\n\n{}\n\n", parsed.reasoning)
            } else {
                parsed.reasoning
            };
            self.push_text(text);
        }

        let Some(call) = parsed.tool_call else {
            self.pending
                .push_back(StreamEvent::end(FinishReason::Stop, usage));
            self.phase = Phase::Done;
            return Ok(());
        };

        if self.debug {
            let pretty = serde_json::to_string_pretty(&call)
                .map_err(|err| RelayError::Internal(err.to_string()))?;
            self.push_text(format!("🔧 PARSED TOOL CALL:\n\n{pretty}\n\n"));
        }
        self.pending.push_back(StreamEvent::ToolCallStart {
            tool_call_id: STRUCTURED_TOOL_CALL_ID.to_string(),
            tool_name: call.tool.clone(),
            args: value_to_raw(&Value::Object(call.args.clone())),
        });
        self.phase = Phase::ExecutingTool { call, usage };
        Ok(())
    }
}

fn structured_events<C: CompletionService>(state: StructuredState<C>) -> EventStream {
    futures_util::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.pending.pop_front() {
                return Some((Ok(event), st));
            }

            match std::mem::replace(&mut st.phase, Phase::Done) {
                Phase::Done => return None,
                Phase::Requesting(request) => match st.client.complete(&request).await {
                    Ok(response) => {
                        let usage = usage_from_openai(response.usage);
                        let Some(content) = response.first_content() else {
                            tracing::debug!("completion has no message content");
                            st.pending
                                .push_back(StreamEvent::end(FinishReason::Stop, usage));
                            continue;
                        };
                        if let Err(err) = st.parse(content, usage) {
                            st.pending.clear();
                            st.fail(&err);
                        }
                    }
                    Err(err) => st.fail(&err),
                },
                Phase::ExecutingTool { call, usage } => {
                    let args = Value::Object(call.args);
                    let result = st.tools.invoke_or_error_payload(&call.tool, &args).await;
                    st.pending.push_back(StreamEvent::ToolCallResult {
                        tool_call_id: STRUCTURED_TOOL_CALL_ID.to_string(),
                        tool_name: call.tool,
                        args: value_to_raw(&args),
                        result,
                    });
                    st.pending
                        .push_back(StreamEvent::end(FinishReason::Stop, usage));
                }
            }
        }
    })
    .boxed()
}
