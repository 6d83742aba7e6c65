//! Turning completion output into data stream events.
//!
//! Two producers exist: [`IncrementalProducer`] streams the completion and
//! reassembles native tool calls, [`StructuredTagProducer`] asks for one
//! complete answer in the tagged format and parses it.
pub mod incremental;
pub mod reassembler;
pub mod structured;
pub mod tagged;

use std::future::Future;

use futures_util::stream::BoxStream;

use crate::error::RelayError;
use crate::protocol::data_stream::{StreamEvent, Usage};
use crate::protocol::openai_chat::{OpenAiMessage, OpenAiUsage};

pub use incremental::IncrementalProducer;
pub use structured::StructuredTagProducer;

/// Events of one chat response, produced lazily.
pub type EventStream = BoxStream<'static, Result<StreamEvent, RelayError>>;

/// Produces the event stream for one conversation.
pub trait ResponseProducer: Send + Sync {
    /// Start producing. An error here is reported before any event was sent.
    fn produce(
        &self,
        messages: Vec<OpenAiMessage>,
    ) -> impl Future<Output = Result<EventStream, RelayError>> + Send;
}

pub(crate) fn usage_from_openai(usage: Option<OpenAiUsage>) -> Usage {
    usage.map_or_else(Usage::default, |u| {
        Usage::new(u.prompt_tokens, u.completion_tokens)
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    use futures_util::StreamExt;

    use crate::error::RelayError;
    use crate::protocol::data_stream::encode_stream_event;
    use crate::protocol::openai_chat::{CompletionRequest, CompletionResponse, OpenAiStreamChunk};
    use crate::transport::{ChunkStream, CompletionService};

    use super::EventStream;

    /// Completion service replaying canned output and recording requests.
    #[derive(Default)]
    pub(crate) struct ScriptedCompletion {
        chunks: Mutex<Option<Result<Vec<Result<OpenAiStreamChunk, RelayError>>, RelayError>>>,
        response: Mutex<Option<Result<CompletionResponse, RelayError>>>,
        pub(crate) requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedCompletion {
        pub(crate) fn streaming(chunks: Vec<serde_json::Value>) -> Self {
            let chunks = chunks
                .into_iter()
                .map(|value| Ok(serde_json::from_value(value).unwrap()))
                .collect();
            Self {
                chunks: Mutex::new(Some(Ok(chunks))),
                ..Self::default()
            }
        }

        pub(crate) fn streaming_results(chunks: Vec<Result<OpenAiStreamChunk, RelayError>>) -> Self {
            Self {
                chunks: Mutex::new(Some(Ok(chunks))),
                ..Self::default()
            }
        }

        pub(crate) fn stream_open_error(err: RelayError) -> Self {
            Self {
                chunks: Mutex::new(Some(Err(err))),
                ..Self::default()
            }
        }

        pub(crate) fn complete_with(response: Result<CompletionResponse, RelayError>) -> Self {
            Self {
                response: Mutex::new(Some(response)),
                ..Self::default()
            }
        }

        pub(crate) fn last_request(&self) -> CompletionRequest {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    impl CompletionService for ScriptedCompletion {
        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> Result<CompletionResponse, RelayError> {
            self.requests.lock().unwrap().push(request.clone());
            self.response
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(RelayError::Internal("no scripted response".into())))
        }

        async fn stream(&self, request: &CompletionRequest) -> Result<ChunkStream, RelayError> {
            self.requests.lock().unwrap().push(request.clone());
            let chunks = self
                .chunks
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(RelayError::Internal("no scripted stream".into())))?;
            Ok(futures_util::stream::iter(chunks).boxed())
        }
    }

    /// Encode every event; a stream error becomes a trailing `ERR:` marker.
    pub(crate) async fn collect_lines(mut events: EventStream) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => lines.push(encode_stream_event(&event)),
                Err(err) => lines.push(format!("ERR:{err}")),
            }
        }
        lines
    }
}
