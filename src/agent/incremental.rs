use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::value::RawValue;
use serde_json::Value;

use super::reassembler::{DraftToolCall, ToolCallReassembler};
use super::{EventStream, ResponseProducer};
use crate::error::RelayError;
use crate::protocol::adapter::build_completion_request;
use crate::protocol::data_stream::{args_to_raw, FinishReason, StreamEvent, Usage};
use crate::protocol::openai_chat::stream::{
    decode_openai_stream_chunk_into, FinishMarker, IncrementalEvent,
};
use crate::protocol::openai_chat::OpenAiMessage;
use crate::tools::ToolRegistry;
use crate::transport::{ChunkStream, CompletionService};

/// Streams the completion with native tool calling enabled.
pub struct IncrementalProducer<C> {
    client: Arc<C>,
    tools: Arc<ToolRegistry>,
    model: String,
}

impl<C: CompletionService> IncrementalProducer<C> {
    #[must_use]
    pub fn new(client: Arc<C>, tools: Arc<ToolRegistry>, model: impl Into<String>) -> Self {
        Self {
            client,
            tools,
            model: model.into(),
        }
    }
}

impl<C: CompletionService> ResponseProducer for IncrementalProducer<C> {
    async fn produce(&self, messages: Vec<OpenAiMessage>) -> Result<EventStream, RelayError> {
        let request =
            build_completion_request(messages, &self.model, true, self.tools.declarations());
        let chunks = self.client.stream(&request).await?;
        Ok(incremental_events(chunks, Arc::clone(&self.tools)))
    }
}

/// A reassembled tool call ready to run.
struct PreparedCall {
    id: String,
    name: String,
    raw_args: Box<RawValue>,
    args: Value,
}

impl PreparedCall {
    fn from_draft(draft: DraftToolCall) -> Self {
        let raw_args = args_to_raw(&draft.arguments);
        let args = serde_json::from_str(raw_args.get())
            .unwrap_or_else(|_| Value::String(draft.arguments.clone()));
        Self {
            id: draft.id,
            name: draft.name,
            raw_args,
            args,
        }
    }
}

enum Phase {
    Streaming,
    /// Starts of the batch are queued; results are produced one call at a time.
    ClosingToolBatch(VecDeque<PreparedCall>),
    Done,
}

struct IncrementalState {
    chunks: ChunkStream,
    tools: Arc<ToolRegistry>,
    reassembler: ToolCallReassembler,
    decoded: VecDeque<IncrementalEvent>,
    scratch: Vec<IncrementalEvent>,
    pending: VecDeque<StreamEvent>,
    phase: Phase,
    tool_calls_abandoned: bool,
    ended: bool,
}

impl IncrementalState {
    fn finish_reason(&self) -> FinishReason {
        if self.reassembler.has_drafts() {
            FinishReason::ToolCalls
        } else {
            FinishReason::Stop
        }
    }

    fn push_end(&mut self, usage: Usage) {
        if !self.ended {
            self.ended = true;
            self.pending
                .push_back(StreamEvent::end(self.finish_reason(), usage));
        }
        self.phase = Phase::Done;
    }

    fn handle(&mut self, event: IncrementalEvent) {
        match event {
            IncrementalEvent::TextDelta(text) => {
                self.pending.push_back(StreamEvent::TextDelta(text));
            }
            IncrementalEvent::ToolCallFragment {
                id,
                name,
                arguments,
            } => {
                if self.tool_calls_abandoned {
                    return;
                }
                if let Err(err) = self.reassembler.push_fragment(id, name, &arguments) {
                    tracing::warn!(error = %err, "abandoning tool calls for this response");
                    self.tool_calls_abandoned = true;
                    let _ = self.reassembler.take_batch();
                }
            }
            IncrementalEvent::Finish(FinishMarker::ToolCalls) => {
                if self.tool_calls_abandoned {
                    return;
                }
                let batch: VecDeque<PreparedCall> = self
                    .reassembler
                    .take_batch()
                    .into_iter()
                    .map(PreparedCall::from_draft)
                    .collect();
                for call in &batch {
                    self.pending.push_back(StreamEvent::ToolCallStart {
                        tool_call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        args: call.raw_args.clone(),
                    });
                }
                if !batch.is_empty() {
                    self.phase = Phase::ClosingToolBatch(batch);
                }
            }
            IncrementalEvent::Finish(FinishMarker::Stop) => {}
            IncrementalEvent::Finish(FinishMarker::Other(reason)) => {
                tracing::debug!(finish_reason = %reason, "ignoring finish reason");
            }
            IncrementalEvent::Usage {
                prompt_tokens,
                completion_tokens,
            } => self.push_end(Usage::new(prompt_tokens, completion_tokens)),
        }
    }
}

/// Drive the upstream chunk stream through the reassembler and tool registry.
///
/// Every tool-call start of a batch is emitted before its results, and the
/// stream always ends with exactly one `StreamEnd` unless the upstream fails.
pub fn incremental_events(chunks: ChunkStream, tools: Arc<ToolRegistry>) -> EventStream {
    let state = IncrementalState {
        chunks,
        tools,
        reassembler: ToolCallReassembler::new(),
        decoded: VecDeque::new(),
        scratch: Vec::with_capacity(4),
        pending: VecDeque::with_capacity(4),
        phase: Phase::Streaming,
        tool_calls_abandoned: false,
        ended: false,
    };

    futures_util::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.pending.pop_front() {
                return Some((Ok(event), st));
            }

            if let Phase::ClosingToolBatch(batch) = &mut st.phase {
                let Some(call) = batch.pop_front() else {
                    st.phase = Phase::Streaming;
                    continue;
                };
                let result = st.tools.invoke_or_error_payload(&call.name, &call.args).await;
                st.pending.push_back(StreamEvent::ToolCallResult {
                    tool_call_id: call.id,
                    tool_name: call.name,
                    args: call.raw_args,
                    result,
                });
                continue;
            }
            if matches!(st.phase, Phase::Done) {
                return None;
            }

            if let Some(event) = st.decoded.pop_front() {
                st.handle(event);
                continue;
            }
            match st.chunks.next().await {
                Some(Ok(chunk)) => {
                    decode_openai_stream_chunk_into(chunk, &mut st.scratch);
                    st.decoded.extend(st.scratch.drain(..));
                }
                Some(Err(err)) => {
                    tracing::warn!(error = %err, "upstream stream failed mid-response");
                    st.phase = Phase::Done;
                    return Some((Err(err), st));
                }
                None => {
                    if !st.ended {
                        tracing::debug!("upstream ended without usage, closing with zero usage");
                    }
                    st.push_end(Usage::default());
                }
            }
        }
    })
    .boxed()
}
