use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;

use super::base::{FinishReason, Provider, ProviderEvent, ProviderStream, Usage};
use super::configs::AnthropicProviderConfig;
use super::utils::{
    check_response, messages_to_anthropic_spec, parse_tool_arguments, sse_data,
    tools_to_anthropic_spec,
};
use crate::models::message::Message;
use crate::models::tool::{Tool, ToolCall};
use crate::stream::LineBuffer;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: Client,
    config: AnthropicProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;

        Ok(Self { client, config })
    }

    fn build_payload(&self, messages: &[Message], tools: &[Tool]) -> Result<Value> {
        let (system, messages_spec) = messages_to_anthropic_spec(messages);

        let mut payload = Map::new();
        payload.insert("model".to_string(), json!(self.config.model));
        payload.insert("messages".to_string(), json!(messages_spec));
        payload.insert("max_tokens".to_string(), json!(self.config.max_tokens));
        payload.insert("stream".to_string(), json!(true));
        if let Some(system) = system {
            payload.insert("system".to_string(), json!(system));
        }
        if !tools.is_empty() {
            payload.insert("tools".to_string(), json!(tools_to_anthropic_spec(tools)?));
        }
        if let Some(temp) = self.config.temperature {
            payload.insert("temperature".to_string(), json!(temp));
        }

        Ok(Value::Object(payload))
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn stream(&self, messages: &[Message], tools: &[Tool]) -> Result<ProviderStream> {
        let payload = self.build_payload(messages, tools)?;
        let url = format!("{}/v1/messages", self.config.host.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await?;
        let response = check_response("Anthropic", &self.config.model, response).await?;

        Ok(Box::pin(anthropic_events(response.bytes_stream())))
    }
}

/// Map an in-stream error event onto text the relay can classify
fn stream_error(error: &Value) -> anyhow::Error {
    let kind = error.get("type").and_then(Value::as_str).unwrap_or("error");
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    match kind {
        "rate_limit_error" => anyhow!("Anthropic rate limit exceeded: {}", message),
        "authentication_error" | "permission_error" => {
            anyhow!("Anthropic rejected the API key: {}", message)
        }
        "not_found_error" => anyhow!("Anthropic model not available: {}", message),
        _ => anyhow!("Anthropic API error: {}: {}", kind, message),
    }
}

struct PartialToolUse {
    id: String,
    name: String,
    input: String,
}

#[derive(Default)]
struct AnthropicStreamState {
    tool_uses: HashMap<u64, PartialToolUse>,
    stop_reason: Option<FinishReason>,
    usage: Usage,
    done: bool,
}

impl AnthropicStreamState {
    fn process_line(&mut self, line: &str) -> Result<Option<ProviderEvent>> {
        let Some(data) = sse_data(line) else {
            return Ok(None);
        };
        let event: Value = serde_json::from_str(data)
            .map_err(|e| anyhow!("Malformed Anthropic stream event: {}", e))?;
        let index = event.get("index").and_then(Value::as_u64).unwrap_or(0);

        match event.get("type").and_then(Value::as_str).unwrap_or_default() {
            "message_start" => {
                self.usage.input_tokens = event
                    .pointer("/message/usage/input_tokens")
                    .and_then(Value::as_i64)
                    .map(|v| v as i32);
                Ok(None)
            }
            "content_block_start" => {
                let block = &event["content_block"];
                match block.get("type").and_then(Value::as_str) {
                    Some("tool_use") => {
                        self.tool_uses.insert(
                            index,
                            PartialToolUse {
                                id: block["id"].as_str().unwrap_or_default().to_string(),
                                name: block["name"].as_str().unwrap_or_default().to_string(),
                                input: String::new(),
                            },
                        );
                        Ok(None)
                    }
                    _ => Ok(block
                        .get("text")
                        .and_then(Value::as_str)
                        .filter(|text| !text.is_empty())
                        .map(|text| ProviderEvent::TextDelta(text.to_string()))),
                }
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match delta.get("type").and_then(Value::as_str) {
                    Some("text_delta") => Ok(delta
                        .get("text")
                        .and_then(Value::as_str)
                        .filter(|text| !text.is_empty())
                        .map(|text| ProviderEvent::TextDelta(text.to_string()))),
                    Some("input_json_delta") => {
                        if let (Some(tool_use), Some(partial)) = (
                            self.tool_uses.get_mut(&index),
                            delta.get("partial_json").and_then(Value::as_str),
                        ) {
                            tool_use.input.push_str(partial);
                        }
                        Ok(None)
                    }
                    _ => Ok(None),
                }
            }
            "content_block_stop" => Ok(self.tool_uses.remove(&index).map(|tool_use| {
                let arguments = parse_tool_arguments(&tool_use.name, &tool_use.input);
                ProviderEvent::ToolCall(ToolCall::new(tool_use.id, tool_use.name, arguments))
            })),
            "message_delta" => {
                if let Some(reason) = event.pointer("/delta/stop_reason").and_then(Value::as_str) {
                    self.stop_reason = Some(match reason {
                        "end_turn" | "stop_sequence" => FinishReason::Stop,
                        "max_tokens" => FinishReason::Length,
                        "tool_use" => FinishReason::ToolCalls,
                        "refusal" => FinishReason::ContentFilter,
                        _ => FinishReason::Other,
                    });
                }
                if let Some(output) = event
                    .pointer("/usage/output_tokens")
                    .and_then(Value::as_i64)
                {
                    self.usage.output_tokens = Some(output as i32);
                }
                Ok(None)
            }
            "message_stop" => {
                self.done = true;
                Ok(None)
            }
            "error" => Err(stream_error(&event["error"])),
            // ping and future event types
            _ => Ok(None),
        }
    }

    fn finish(mut self) -> ProviderEvent {
        if let (Some(input), Some(output)) = (self.usage.input_tokens, self.usage.output_tokens) {
            self.usage.total_tokens = Some(input + output);
        }
        ProviderEvent::Finish {
            reason: self.stop_reason.unwrap_or(FinishReason::Stop),
            usage: self.usage,
        }
    }
}

fn anthropic_events<S>(bytes: S) -> impl Stream<Item = Result<ProviderEvent>> + Send + 'static
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    async_stream::try_stream! {
        let mut lines = LineBuffer::new();
        let mut state = AnthropicStreamState::default();
        futures::pin_mut!(bytes);

        while !state.done {
            let Some(chunk) = bytes.next().await else {
                break;
            };
            for line in lines.push(&chunk?) {
                if let Some(event) = state.process_line(&line)? {
                    yield event;
                }
            }
        }

        if let Some(line) = lines.finish() {
            if let Some(event) = state.process_line(&line)? {
                yield event;
            }
        }

        yield state.finish();
    }
}
