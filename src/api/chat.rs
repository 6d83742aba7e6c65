use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt;

use crate::agent::{
    EventStream, IncrementalProducer, ResponseProducer, StructuredTagProducer,
};
use crate::config::ResponseMode;
use crate::error::RelayError;
use crate::observability::log_request_usage;
use crate::protocol::adapter::convert_client_messages;
use crate::protocol::client::{ChatQuery, ChatRequestBody};
use crate::protocol::data_stream::{
    encode_stream_event_into, StreamEvent, DATA_STREAM_HEADER, DATA_STREAM_VERSION,
};
use crate::state::AppState;

const CONTENT_TYPE_TEXT: &str = "text/plain; charset=utf-8";

/// `POST /api/chat`.
pub async fn handler(state: Arc<AppState>, query: Option<&str>, body: Bytes) -> Response {
    match handler_inner(state, query, body).await {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(error = %err, "chat request rejected");
            err.into_response()
        }
    }
}

async fn handler_inner(
    state: Arc<AppState>,
    query: Option<&str>,
    body: Bytes,
) -> Result<Response, RelayError> {
    let started = Instant::now();
    let request_id = state.request_uuid(state.next_request_seq()).to_string();
    let query = ChatQuery::parse(query, state.config.features.default_mode)?;
    let request: ChatRequestBody = serde_json::from_slice(&body)
        .map_err(|err| RelayError::Validation(format!("Invalid chat request body: {err}")))?;
    let messages = convert_client_messages(&request.messages)?;

    tracing::info!(
        request_id = %request_id,
        protocol = %query.protocol,
        mode = %query.mode,
        debug = query.debug,
        messages = messages.len(),
        "chat request"
    );

    let model = state.config.upstream.model.as_str();
    let events = match query.mode {
        ResponseMode::Function => {
            IncrementalProducer::new(Arc::clone(&state.completion), Arc::clone(&state.tools), model)
                .produce(messages)
                .await?
        }
        ResponseMode::Xml => {
            StructuredTagProducer::new(
                Arc::clone(&state.completion),
                Arc::clone(&state.tools),
                model,
                query.debug,
            )
            .produce(messages)
            .await?
        }
    };

    Ok(data_stream_response(events, request_id, query.mode, started))
}

/// Encode each event as soon as it is produced.
fn data_stream_response(
    events: EventStream,
    request_id: String,
    mode: ResponseMode,
    started: Instant,
) -> Response {
    let body = events.map(move |item| match item {
        Ok(event) => {
            if let StreamEvent::StreamEnd { usage, .. } = &event {
                log_request_usage(&request_id, &mode.to_string(), usage, started.elapsed());
            }
            let mut line = String::with_capacity(64);
            encode_stream_event_into(&event, &mut line);
            Ok(Bytes::from(line))
        }
        Err(err) => {
            tracing::error!(request_id = %request_id, error = %err, "chat stream aborted");
            Err(err)
        }
    });

    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_TEXT));
    headers.insert(DATA_STREAM_HEADER, HeaderValue::from_static(DATA_STREAM_VERSION));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}
