use crate::error::RelayError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderName},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use bytes::Bytes;
use futures::{stream::StreamExt, Stream};
use parley::{
    auth::{bearer_token, AuthError},
    models::message::clean_messages,
    relay::{self, FrameStream, RelayPhase, RelayProgress},
    stream::ProtocolFormatter,
    tools::ToolSet,
};
use serde_json::Value;
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const DATA_STREAM_HEADER: HeaderName = HeaderName::from_static("x-vercel-ai-data-stream");

/// Newline delimited frames, compatible with the ai sdk data stream protocol
pub struct FrameResponse {
    rx: ReceiverStream<String>,
}

impl FrameResponse {
    fn new(rx: ReceiverStream<String>) -> Self {
        Self { rx }
    }
}

impl Stream for FrameResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for FrameResponse {
    fn into_response(self) -> Response {
        let headers = [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
            (DATA_STREAM_HEADER, "v1"),
        ];
        (headers, Body::from_stream(self)).into_response()
    }
}

async fn handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<FrameResponse, RelayError> {
    let mut progress = RelayProgress::new();

    // Nothing else is looked at until the caller is known
    let token = bearer_token(
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok()),
    )
    .ok_or(RelayError::Unauthenticated)?;
    let user = match state.authenticator.authenticate(token).await {
        Ok(user) => user,
        Err(AuthError::Unavailable(e)) => {
            tracing::error!("Could not verify access token: {}", e);
            progress.fail("identity service unavailable");
            return Err(RelayError::internal());
        }
        Err(_) => return Err(RelayError::Unauthenticated),
    };

    progress.advance(RelayPhase::Validating);
    let request: Value = serde_json::from_slice(&body).map_err(|e| {
        tracing::debug!("Failed to parse request body: {}", e);
        RelayError::InvalidRequest("Invalid JSON in request body".to_string())
    })?;
    let raw = request
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            RelayError::InvalidRequest("Invalid request: messages array required".to_string())
        })?;
    if raw.is_empty() {
        return Err(RelayError::InvalidRequest("No messages provided".to_string()));
    }
    let messages = clean_messages(raw);
    if messages.is_empty() {
        return Err(RelayError::InvalidRequest(
            "No valid messages provided".to_string(),
        ));
    }
    tracing::info!("Processing {} messages for {}", messages.len(), user.id);

    let provider = state.provider.clone().ok_or(RelayError::ServiceUnavailable)?;

    progress.advance(RelayPhase::ToolDiscovery);
    let tools = match state.discovery.discover(token).await {
        Ok(tools) => tools,
        Err(e) => {
            tracing::warn!("Failed to load tools, continuing without them: {}", e);
            ToolSet::empty()
        }
    };
    if !tools.is_empty() {
        tracing::info!("Using tools: {:?}", tools.names());
    }

    progress.advance(RelayPhase::Streaming);
    let frames = relay::start(provider, messages, tools, state.max_steps)
        .await
        .map_err(|e| {
            let error = RelayError::from_provider(&e);
            tracing::error!("Chat error: {:#}", e);
            progress.fail(error.kind());
            error
        })?;

    let (tx, rx) = mpsc::channel(100);
    tokio::spawn(forward(frames, tx, progress));

    Ok(FrameResponse::new(ReceiverStream::new(rx)))
}

/// Copy frames into the response channel until the reply ends or the client goes away
async fn forward(mut frames: FrameStream, tx: mpsc::Sender<String>, mut progress: RelayProgress) {
    loop {
        tokio::select! {
            frame = frames.next() => {
                match frame {
                    Some(Ok(frame)) => {
                        if tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        let error = RelayError::from_provider(&e);
                        tracing::error!("Chat stream failed: {:#}", e);
                        progress.fail(error.kind());
                        let _ = tx.send(ProtocolFormatter::format_error(&error.to_string())).await;
                        return;
                    }
                    None => {
                        progress.advance(RelayPhase::Completed);
                        return;
                    }
                }
            }
            _ = tx.closed() => break,
        }
    }
    tracing::info!("Client disconnected during {}", progress.phase());
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(handler))
        .with_state(state)
}
