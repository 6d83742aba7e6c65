use std::future::Future;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use http::header::{HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};

use crate::config::UpstreamConfig;
use crate::error::RelayError;
use crate::protocol::openai_chat::stream::parse_openai_sse_data;
use crate::protocol::openai_chat::{CompletionRequest, CompletionResponse, OpenAiStreamChunk};
use crate::stream::sse_frame_stream;
use crate::util::truncate_for_message;

use super::http_transport::post_with_retry;

const CHAT_COMPLETIONS_PATH: &str = "chat/completions";
const ERROR_MESSAGE_MAX_CHARS: usize = 500;

/// Lazily decoded chunks of one streaming completion.
pub type ChunkStream = BoxStream<'static, Result<OpenAiStreamChunk, RelayError>>;

/// A chat-completion backend.
pub trait CompletionService: Send + Sync + 'static {
    /// Issue a non-streaming completion.
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> impl Future<Output = Result<CompletionResponse, RelayError>> + Send;

    /// Open a streaming completion. Errors before the first chunk are
    /// returned here; later ones arrive inside the stream.
    fn stream(
        &self,
        request: &CompletionRequest,
    ) -> impl Future<Output = Result<ChunkStream, RelayError>> + Send;
}

/// `OpenAI` compatible `/chat/completions` client.
pub struct OpenAiCompletionClient {
    client: reqwest::Client,
    url: url::Url,
    headers: http::HeaderMap,
}

impl OpenAiCompletionClient {
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when the base URL or API key cannot be
    /// used to build a request.
    pub fn new(client: reqwest::Client, upstream: &UpstreamConfig) -> Result<Self, RelayError> {
        let url = completions_url(&upstream.base_url)?;

        let mut headers = http::HeaderMap::with_capacity(3);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = HeaderValue::from_str(&format!("Bearer {}", upstream.api_key.trim()))
            .map_err(|_| RelayError::Config("upstream.api_key is not a valid header value".into()))?;
        headers.insert(AUTHORIZATION, bearer);

        Ok(Self {
            client,
            url,
            headers,
        })
    }

    async fn send(
        &self,
        request: &CompletionRequest,
        accept: &'static str,
    ) -> Result<reqwest::Response, RelayError> {
        let body = serde_json::to_vec(request)
            .map_err(|err| RelayError::Internal(format!("Failed to encode request: {err}")))?;
        let mut headers = self.headers.clone();
        headers.insert(ACCEPT, HeaderValue::from_static(accept));

        let response = post_with_retry(&self.client, &self.url, &headers, Bytes::from(body)).await?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.bytes().await.unwrap_or_default();
        Err(RelayError::Upstream {
            status,
            message: upstream_error_message(&body),
        })
    }
}

impl CompletionService for OpenAiCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, RelayError> {
        let response = self.send(request, "application/json").await?;
        let body = response
            .bytes()
            .await
            .map_err(|err| RelayError::Transport(err.to_string()))?;
        serde_json::from_slice(&body).map_err(|err| {
            RelayError::Upstream {
                status: 502,
                message: format!("Invalid completion response: {err}"),
            }
        })
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<ChunkStream, RelayError> {
        let response = self.send(request, "text/event-stream").await?;
        let chunks = sse_frame_stream(response.bytes_stream()).filter_map(|frame| {
            futures_util::future::ready(match frame {
                Ok(event) => match parse_openai_sse_data(&event.data) {
                    None => None,
                    Some(Ok(chunk)) => Some(Ok(chunk)),
                    Some(Err(err)) => {
                        tracing::warn!(
                            error = %err,
                            data = %truncate_for_message(&event.data, 200),
                            "skipping undecodable upstream chunk"
                        );
                        None
                    }
                },
                Err(err) => Some(Err(RelayError::Transport(err.to_string()))),
            })
        });
        Ok(chunks.boxed())
    }
}

fn completions_url(base_url: &str) -> Result<url::Url, RelayError> {
    let mut base = base_url.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    url::Url::parse(&base)
        .and_then(|base| base.join(CHAT_COMPLETIONS_PATH))
        .map_err(|err| RelayError::Config(format!("Invalid upstream.base_url '{base_url}': {err}")))
}

/// Prefer the `error.message` of an `OpenAI` style error body, else the raw text.
fn upstream_error_message(body: &[u8]) -> String {
    let message = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());
    truncate_for_message(&message, ERROR_MESSAGE_MAX_CHARS)
}
