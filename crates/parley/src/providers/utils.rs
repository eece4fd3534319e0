use anyhow::{anyhow, Result};
use reqwest::{Response, StatusCode};
use serde_json::{json, Map, Value};
use std::collections::HashSet;

use crate::models::message::{InvocationState, Message, Role, ToolInvocation};
use crate::models::tool::Tool;

/// Extract the payload of an SSE `data:` line, ignoring `event:`, comments and blank lines
pub fn sse_data(line: &str) -> Option<&str> {
    line.trim_end_matches('\r')
        .strip_prefix("data:")
        .map(|data| data.trim_start())
}

/// Turn a non-success provider response into an error whose text names the failure class
pub async fn check_response(provider: &str, model: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::debug!("{} responded with {}: {}", provider, status, body);

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            anyhow!("{} rejected the API key ({})", provider, status)
        }
        StatusCode::TOO_MANY_REQUESTS => anyhow!("{} rate limit exceeded ({})", provider, status),
        StatusCode::NOT_FOUND => {
            anyhow!("{} model '{}' is not available ({})", provider, model, status)
        }
        _ => anyhow!("{} request failed: {} {}", provider, status, body),
    })
}

/// Render a settled tool result the way both providers accept it: plain strings stay as
/// they are, anything structured is sent as JSON text.
fn invocation_output(invocation: &ToolInvocation) -> String {
    let output = match &invocation.result {
        Some(Value::String(text)) => text.clone(),
        Some(value) => value.to_string(),
        None => String::new(),
    };
    match invocation.state {
        InvocationState::Error => {
            format!("The tool call returned the following error:\n{}", output)
        }
        _ => output,
    }
}

fn invocation_args(invocation: &ToolInvocation) -> Value {
    invocation.args.clone().unwrap_or_else(|| json!({}))
}

/// Convert internal Message format to OpenAI's API message specification
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    let mut messages_spec = Vec::new();

    for message in messages {
        let settled: Vec<&ToolInvocation> = message.settled_invocations().collect();

        if message.role != Role::Assistant || settled.is_empty() {
            if !message.content.is_empty() {
                messages_spec.push(json!({
                    "role": message.role,
                    "content": message.content,
                }));
            }
            continue;
        }

        let tool_calls: Vec<Value> = settled
            .iter()
            .map(|invocation| {
                json!({
                    "id": invocation.tool_call_id,
                    "type": "function",
                    "function": {
                        "name": invocation.tool_name,
                        "arguments": invocation_args(invocation).to_string(),
                    }
                })
            })
            .collect();

        let content = if message.content.is_empty() {
            Value::Null
        } else {
            json!(message.content)
        };
        messages_spec.push(json!({
            "role": "assistant",
            "content": content,
            "tool_calls": tool_calls,
        }));

        for invocation in settled {
            messages_spec.push(json!({
                "role": "tool",
                "tool_call_id": invocation.tool_call_id,
                "content": invocation_output(invocation),
            }));
        }
    }

    messages_spec
}

/// Convert internal Tool format to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> Result<Vec<Value>> {
    let mut tool_names = HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.input_schema,
            }
        }));
    }

    Ok(result)
}

/// Convert internal Message format to Anthropic's API message specification.
///
/// Anthropic takes system prompts as a separate parameter, so those are returned apart.
pub fn messages_to_anthropic_spec(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let mut system = Vec::new();
    let mut messages_spec = Vec::new();

    for message in messages {
        match message.role {
            Role::System => system.push(message.content.clone()),
            Role::User => {
                if !message.content.is_empty() {
                    messages_spec.push(json!({
                        "role": "user",
                        "content": [{"type": "text", "text": message.content}],
                    }));
                }
            }
            Role::Assistant => {
                let settled: Vec<&ToolInvocation> = message.settled_invocations().collect();
                let mut blocks = Vec::new();
                if !message.content.is_empty() {
                    blocks.push(json!({"type": "text", "text": message.content}));
                }
                for invocation in &settled {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": invocation.tool_call_id,
                        "name": invocation.tool_name,
                        "input": invocation_args(invocation),
                    }));
                }
                if blocks.is_empty() {
                    continue;
                }
                messages_spec.push(json!({"role": "assistant", "content": blocks}));

                if !settled.is_empty() {
                    let results: Vec<Value> = settled
                        .iter()
                        .map(|invocation| {
                            json!({
                                "type": "tool_result",
                                "tool_use_id": invocation.tool_call_id,
                                "content": invocation_output(invocation),
                                "is_error": invocation.state == InvocationState::Error,
                            })
                        })
                        .collect();
                    messages_spec.push(json!({"role": "user", "content": results}));
                }
            }
        }
    }

    let system = if system.is_empty() {
        None
    } else {
        Some(system.join("\n\n"))
    };
    (system, messages_spec)
}

/// Convert internal Tool format to Anthropic's API tool specification
pub fn tools_to_anthropic_spec(tools: &[Tool]) -> Result<Vec<Value>> {
    let mut tool_names = HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }
        let mut spec = Map::new();
        spec.insert("name".to_string(), json!(tool.name));
        if !tool.description.is_empty() {
            spec.insert("description".to_string(), json!(tool.description));
        }
        spec.insert("input_schema".to_string(), tool.input_schema.clone());
        result.push(Value::Object(spec));
    }

    Ok(result)
}

/// Parse the accumulated argument fragments of a streamed tool call
pub fn parse_tool_arguments(name: &str, raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::warn!("Tool call {} had unparseable arguments: {}", name, e);
        json!({})
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn searched() -> Message {
        let mut invocation = ToolInvocation::call("call_1", "search", json!({"q": "rust"}));
        invocation.resolve(json!("3 results")).unwrap();
        let mut failed = ToolInvocation::call("call_2", "fetch", json!({}));
        failed.fail(json!("timeout")).unwrap();
        Message::assistant()
            .with_text("Let me look.")
            .with_tool_invocation(invocation)
            .with_tool_invocation(failed)
            .with_tool_invocation(ToolInvocation::call("call_3", "pending", json!({})))
    }

    #[test]
    fn test_sse_data() {
        assert_eq!(sse_data("data: {}"), Some("{}"));
        assert_eq!(sse_data("data:{}\r"), Some("{}"));
        assert_eq!(sse_data("event: ping"), None);
        assert_eq!(sse_data(": keep-alive"), None);
    }

    #[test]
    fn test_messages_to_openai_spec() {
        let messages = vec![
            Message::system("Be brief."),
            Message::user("Find rust"),
            searched(),
            Message::assistant(),
        ];
        let spec = messages_to_openai_spec(&messages);

        assert_eq!(spec.len(), 5);
        assert_eq!(spec[0], json!({"role": "system", "content": "Be brief."}));
        assert_eq!(spec[1], json!({"role": "user", "content": "Find rust"}));
        assert_eq!(spec[2]["content"], json!("Let me look."));
        assert_eq!(spec[2]["tool_calls"].as_array().unwrap().len(), 2);
        assert_eq!(
            spec[2]["tool_calls"][0]["function"]["arguments"],
            json!(r#"{"q":"rust"}"#)
        );
        assert_eq!(
            spec[3],
            json!({"role": "tool", "tool_call_id": "call_1", "content": "3 results"})
        );
        assert_eq!(
            spec[4]["content"],
            json!("The tool call returned the following error:\ntimeout")
        );
    }

    #[test]
    fn test_messages_to_anthropic_spec() {
        let messages = vec![
            Message::system("Be brief."),
            Message::user("Find rust"),
            searched(),
        ];
        let (system, spec) = messages_to_anthropic_spec(&messages);

        assert_eq!(system.as_deref(), Some("Be brief."));
        assert_eq!(spec.len(), 3);
        assert_eq!(spec[1]["content"][1]["type"], json!("tool_use"));
        assert_eq!(spec[1]["content"][1]["input"], json!({"q": "rust"}));
        assert_eq!(spec[2]["role"], json!("user"));
        assert_eq!(spec[2]["content"][0]["tool_use_id"], json!("call_1"));
        assert_eq!(spec[2]["content"][1]["is_error"], json!(true));
    }

    #[test]
    fn test_tools_specs_reject_duplicates() {
        let tool = Tool::new("search", "Search the web", json!({"type": "object"}));
        let openai = tools_to_openai_spec(&[tool.clone()]).unwrap();
        assert_eq!(openai[0]["function"]["parameters"], json!({"type": "object"}));

        let anthropic = tools_to_anthropic_spec(&[tool.clone()]).unwrap();
        assert_eq!(anthropic[0]["input_schema"], json!({"type": "object"}));

        let err = tools_to_openai_spec(&[tool.clone(), tool]).unwrap_err();
        assert!(err.to_string().contains("Duplicate tool name"));
    }

    #[test]
    fn test_parse_tool_arguments() {
        assert_eq!(parse_tool_arguments("t", ""), json!({}));
        assert_eq!(parse_tool_arguments("t", r#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(parse_tool_arguments("t", r#"{"a":"#), json!({}));
    }
}
