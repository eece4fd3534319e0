use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use super::base::{FinishReason, Provider, ProviderEvent, ProviderStream, Usage};
use super::configs::OpenAiProviderConfig;
use super::utils::{
    check_response, messages_to_openai_spec, parse_tool_arguments, sse_data, tools_to_openai_spec,
};
use crate::models::message::Message;
use crate::models::tool::{Tool, ToolCall};
use crate::stream::LineBuffer;

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn build_payload(&self, messages: &[Message], tools: &[Tool]) -> Result<Value> {
        let mut payload = Map::new();
        payload.insert("model".to_string(), json!(self.config.model));
        payload.insert("messages".to_string(), json!(messages_to_openai_spec(messages)));
        payload.insert("stream".to_string(), json!(true));
        payload.insert("stream_options".to_string(), json!({"include_usage": true}));

        // Add optional parameters
        if !tools.is_empty() {
            payload.insert("tools".to_string(), json!(tools_to_openai_spec(tools)?));
        }
        if let Some(temp) = self.config.temperature {
            payload.insert("temperature".to_string(), json!(temp));
        }
        if let Some(tokens) = self.config.max_tokens {
            payload.insert("max_tokens".to_string(), json!(tokens));
        }

        Ok(Value::Object(payload))
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn stream(&self, messages: &[Message], tools: &[Tool]) -> Result<ProviderStream> {
        let payload = self.build_payload(messages, tools)?;
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&payload)
            .send()
            .await?;
        let response = check_response("OpenAI", &self.config.model, response).await?;

        Ok(Box::pin(openai_events(response.bytes_stream())))
    }
}

#[derive(Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulates the pieces of a chat completion chunk stream
#[derive(Default)]
struct OpenAiStreamState {
    tool_calls: BTreeMap<u64, PartialToolCall>,
    finish_reason: Option<FinishReason>,
    usage: Usage,
    done: bool,
}

impl OpenAiStreamState {
    fn process_line(&mut self, line: &str) -> Result<Option<ProviderEvent>> {
        let Some(data) = sse_data(line) else {
            return Ok(None);
        };
        if data == "[DONE]" {
            self.done = true;
            return Ok(None);
        }

        let chunk: Value = serde_json::from_str(data)
            .map_err(|e| anyhow!("Malformed OpenAI stream chunk: {}", e))?;

        if let Some(error) = chunk.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(anyhow!("OpenAI API error: {}", message));
        }

        if let Some(usage) = chunk.get("usage").filter(|u| !u.is_null()) {
            let read = |key: &str| usage.get(key).and_then(Value::as_i64).map(|v| v as i32);
            self.usage = Usage::new(
                read("prompt_tokens"),
                read("completion_tokens"),
                read("total_tokens"),
            );
        }

        let Some(choice) = chunk.pointer("/choices/0") else {
            return Ok(None);
        };

        if let Some(calls) = choice.pointer("/delta/tool_calls").and_then(Value::as_array) {
            for call in calls {
                let index = call.get("index").and_then(Value::as_u64).unwrap_or(0);
                let partial = self.tool_calls.entry(index).or_default();
                if let Some(id) = call.get("id").and_then(Value::as_str) {
                    partial.id = id.to_string();
                }
                if let Some(name) = call.pointer("/function/name").and_then(Value::as_str) {
                    partial.name.push_str(name);
                }
                if let Some(args) = call.pointer("/function/arguments").and_then(Value::as_str) {
                    partial.arguments.push_str(args);
                }
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            self.finish_reason = Some(match reason {
                "stop" => FinishReason::Stop,
                "length" => FinishReason::Length,
                "tool_calls" | "function_call" => FinishReason::ToolCalls,
                "content_filter" => FinishReason::ContentFilter,
                _ => FinishReason::Other,
            });
        }

        Ok(choice
            .pointer("/delta/content")
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
            .map(|text| ProviderEvent::TextDelta(text.to_string())))
    }

    fn finish(self) -> Vec<ProviderEvent> {
        let has_tool_calls = !self.tool_calls.is_empty();
        let mut events: Vec<ProviderEvent> = self
            .tool_calls
            .into_values()
            .map(|partial| {
                let arguments = parse_tool_arguments(&partial.name, &partial.arguments);
                ProviderEvent::ToolCall(ToolCall::new(partial.id, partial.name, arguments))
            })
            .collect();

        let reason = self.finish_reason.unwrap_or(if has_tool_calls {
            FinishReason::ToolCalls
        } else {
            FinishReason::Stop
        });
        events.push(ProviderEvent::Finish {
            reason,
            usage: self.usage,
        });
        events
    }
}

fn openai_events<S>(bytes: S) -> impl Stream<Item = Result<ProviderEvent>> + Send + 'static
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    async_stream::try_stream! {
        let mut lines = LineBuffer::new();
        let mut state = OpenAiStreamState::default();
        futures::pin_mut!(bytes);

        while !state.done {
            let Some(chunk) = bytes.next().await else {
                break;
            };
            for line in lines.push(&chunk?) {
                if let Some(event) = state.process_line(&line)? {
                    yield event;
                }
                if state.done {
                    break;
                }
            }
        }

        if !state.done {
            if let Some(line) = lines.finish() {
                if let Some(event) = state.process_line(&line)? {
                    yield event;
                }
            }
        }

        for event in state.finish() {
            yield event;
        }
    }
}
