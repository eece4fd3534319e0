//! Turns a provider completion into the framed text stream sent to chat clients, running any
//! requested tools between model turns.
use anyhow::Result;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde_json::json;
use std::sync::Arc;
use strum_macros::Display;

use crate::models::message::{Message, ToolInvocation};
use crate::providers::base::{FinishReason, Provider, ProviderEvent, ProviderStream, Usage};
use crate::stream::ProtocolFormatter;
use crate::tools::ToolSet;

pub const DEFAULT_MAX_STEPS: usize = 5;

/// Frames ready to be written to the response body. An `Err` item ends the stream.
pub type FrameStream = BoxStream<'static, Result<String>>;

/// Where a chat request is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum RelayPhase {
    Unauthenticated,
    Validating,
    ToolDiscovery,
    Streaming,
    Completed,
    Failed,
}

impl RelayPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RelayPhase::Completed | RelayPhase::Failed)
    }
}

/// Tracks the phase of a single request and logs every transition
#[derive(Debug)]
pub struct RelayProgress {
    phase: RelayPhase,
}

impl Default for RelayProgress {
    fn default() -> Self {
        Self {
            phase: RelayPhase::Unauthenticated,
        }
    }
}

impl RelayProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> RelayPhase {
        self.phase
    }

    /// Move to the next phase. Terminal phases are final.
    pub fn advance(&mut self, next: RelayPhase) {
        if self.phase.is_terminal() {
            tracing::warn!("Ignoring relay transition {} -> {}", self.phase, next);
            return;
        }
        tracing::debug!("Relay {} -> {}", self.phase, next);
        self.phase = next;
    }

    pub fn fail(&mut self, kind: &str) {
        tracing::error!("Relay failed during {}: {}", self.phase, kind);
        self.advance(RelayPhase::Failed);
    }
}

/// Start streaming a reply.
///
/// The first provider event is awaited before returning, so failures that happen before any
/// output (credentials, rate limits, an unknown model) come back as `Err` rather than as a
/// stream that fails immediately.
pub async fn start(
    provider: Arc<dyn Provider>,
    messages: Vec<Message>,
    tools: ToolSet,
    max_steps: usize,
) -> Result<FrameStream> {
    let mut events = provider.stream(&messages, &tools.definitions()).await?;
    let first = match events.next().await {
        Some(Err(e)) => return Err(e),
        other => other,
    };

    Ok(Box::pin(frames(provider, messages, tools, events, first, max_steps.max(1))))
}

fn frames(
    provider: Arc<dyn Provider>,
    mut messages: Vec<Message>,
    tools: ToolSet,
    mut events: ProviderStream,
    mut pending: Option<Result<ProviderEvent>>,
    max_steps: usize,
) -> impl Stream<Item = Result<String>> + Send + 'static {
    async_stream::try_stream! {
        let mut step = 1;

        loop {
            let mut text = String::new();
            let mut calls = Vec::new();
            let mut reason = FinishReason::Stop;
            let mut usage = Usage::default();

            loop {
                let event = match pending.take() {
                    Some(event) => Some(event),
                    None => events.next().await,
                };
                let Some(event) = event else {
                    break;
                };
                match event? {
                    ProviderEvent::TextDelta(delta) => {
                        yield ProtocolFormatter::format_text(&delta);
                        text.push_str(&delta);
                    }
                    ProviderEvent::ToolCall(call) => calls.push(call),
                    ProviderEvent::Finish { reason: r, usage: u } => {
                        reason = r;
                        usage = u;
                    }
                }
            }

            if calls.is_empty() || !tools.can_execute() || step >= max_steps {
                if !calls.is_empty() {
                    tracing::info!(
                        "Not running {} requested tool calls at step {}",
                        calls.len(),
                        step
                    );
                }
                yield ProtocolFormatter::format_finish(&reason.to_string(), &usage);
                break;
            }

            let mut reply = Message::assistant().with_text(&text);
            for call in calls {
                let mut invocation = ToolInvocation::call(
                    call.id.clone(),
                    call.name.clone(),
                    call.arguments.clone(),
                );
                match tools.execute(&call).await {
                    Ok(result) => invocation.resolve(result)?,
                    Err(e) => {
                        tracing::warn!("Tool {} failed: {}", call.name, e);
                        invocation.fail(json!(e.to_string()))?;
                    }
                }
                reply = reply.with_tool_invocation(invocation);
            }
            messages.push(reply);

            step += 1;
            tracing::info!("Continuing with tool results, step {} of {}", step, max_steps);
            events = provider.stream(&messages, &tools.definitions()).await?;
        }
    }
}
