use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::models::message::Message;
use crate::models::tool::{Tool, ToolCall};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

/// Why the model stopped producing output, named the way the stream trailer reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    Other,
}

/// One incremental piece of a streamed completion
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    TextDelta(String),
    /// A complete tool call, emitted once all of its argument fragments have arrived
    ToolCall(ToolCall),
    Finish { reason: FinishReason, usage: Usage },
}

pub type ProviderStream = BoxStream<'static, Result<ProviderEvent>>;

/// Base trait for AI providers (OpenAI, Anthropic, etc)
#[async_trait]
pub trait Provider: Send + Sync {
    /// The model this provider was configured with
    fn model(&self) -> &str;

    /// Start a streamed completion.
    ///
    /// Errors from establishing the request (credentials, rate limits, unknown model) are
    /// returned directly; errors after that arrive as items of the stream.
    async fn stream(&self, messages: &[Message], tools: &[Tool]) -> Result<ProviderStream>;
}
