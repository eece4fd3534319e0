//! Tool discovery against an MCP server over the streamable HTTP transport.
//!
//! Each discovery opens a fresh session (`initialize`, `notifications/initialized`,
//! `tools/list`) with the caller's access token. The session is kept inside the returned
//! [`ToolSet`] so tool calls made during the same chat request reuse it.
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::{DiscoveryError, ToolDiscovery, ToolError, ToolExecutor, ToolResult, ToolSet};
use crate::models::tool::Tool;

pub const PROTOCOL_VERSION: &str = "2025-03-26";
const SESSION_HEADER: &str = "mcp-session-id";
const PROTOCOL_HEADER: &str = "mcp-protocol-version";
// Guards against servers that keep handing out cursors
const MAX_TOOL_PAGES: usize = 20;

pub struct McpToolDiscovery {
    client: Client,
    endpoint: Url,
}

impl McpToolDiscovery {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, DiscoveryError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl ToolDiscovery for McpToolDiscovery {
    async fn discover(&self, access_token: &str) -> Result<ToolSet, DiscoveryError> {
        let session =
            McpSession::connect(self.client.clone(), self.endpoint.clone(), access_token).await?;
        let tools = session.list_tools().await?;
        tracing::info!("Discovered {} tools from {}", tools.len(), self.endpoint);
        Ok(ToolSet::new(tools, Some(Arc::new(session))))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct McpTool {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    input_schema: Option<Value>,
}

impl From<McpTool> for Tool {
    fn from(tool: McpTool) -> Self {
        Tool::new(
            tool.name,
            tool.description.unwrap_or_default(),
            tool.input_schema
                .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListToolsResult {
    tools: Vec<McpTool>,
    #[serde(default)]
    next_cursor: Option<String>,
}

struct McpSession {
    client: Client,
    endpoint: Url,
    access_token: String,
    session_id: Option<String>,
    next_id: AtomicI64,
}

impl McpSession {
    async fn connect(
        client: Client,
        endpoint: Url,
        access_token: &str,
    ) -> Result<Self, DiscoveryError> {
        let mut session = Self {
            client,
            endpoint,
            access_token: access_token.to_string(),
            session_id: None,
            next_id: AtomicI64::new(1),
        };

        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {"name": "parley", "version": env!("CARGO_PKG_VERSION")}
        });
        let (result, session_id) = session.exchange("initialize", Some(params)).await?;
        session.session_id = session_id;
        let server = result
            .pointer("/serverInfo/name")
            .and_then(Value::as_str)
            .unwrap_or("unknown server");
        tracing::debug!("Initialized MCP session with {}", server);

        session.notify("notifications/initialized").await?;
        Ok(session)
    }

    fn headers(&self) -> Result<HeaderMap, DiscoveryError> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.access_token))
            .map_err(|_| DiscoveryError::Unauthorized)?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );
        headers.insert(PROTOCOL_HEADER, HeaderValue::from_static(PROTOCOL_VERSION));
        if let Some(id) = &self.session_id {
            if let Ok(value) = HeaderValue::from_str(id) {
                headers.insert(SESSION_HEADER, value);
            }
        }
        Ok(headers)
    }

    async fn post(&self, body: &Value) -> Result<Response, DiscoveryError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(self.headers()?)
            .json(body)
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(DiscoveryError::Unauthorized),
            status if !status.is_success() => Err(DiscoveryError::Status(status.as_u16())),
            _ => Ok(response),
        }
    }

    /// Send a JSON-RPC request, returning its result and any session id the server assigned
    async fn exchange(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(Value, Option<String>), DiscoveryError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut request = json!({"jsonrpc": "2.0", "id": id, "method": method});
        if let Some(params) = params {
            request["params"] = params;
        }

        let response = self.post(&request).await?;
        let session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(String::from);
        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("text/event-stream"));

        let body = response.text().await?;
        let message = if is_event_stream {
            find_response_event(&body, id)?
        } else {
            serde_json::from_str(&body)
                .map_err(|e| DiscoveryError::Protocol(format!("invalid JSON response: {}", e)))?
        };

        Ok((rpc_result(message)?, session_id))
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, DiscoveryError> {
        self.exchange(method, params).await.map(|(result, _)| result)
    }

    async fn notify(&self, method: &str) -> Result<(), DiscoveryError> {
        self.post(&json!({"jsonrpc": "2.0", "method": method}))
            .await
            .map(|_| ())
    }

    async fn list_tools(&self) -> Result<Vec<Tool>, DiscoveryError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = cursor.as_ref().map(|c| json!({"cursor": c}));
            let result = self.request("tools/list", params).await?;
            let page: ListToolsResult = serde_json::from_value(result).map_err(|e| {
                DiscoveryError::Protocol(format!("invalid tools/list result: {}", e))
            })?;

            tools.extend(page.tools.into_iter().map(Tool::from));
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        tracing::warn!("Stopped listing tools after {} pages", MAX_TOOL_PAGES);
        Ok(tools)
    }
}

#[async_trait]
impl ToolExecutor for McpSession {
    async fn call_tool(&self, name: &str, arguments: Value) -> ToolResult<Value> {
        let result = self
            .request("tools/call", Some(json!({"name": name, "arguments": arguments})))
            .await
            .map_err(|e| ToolError::ExecutionError(e.to_string()))?;

        let content = result.get("content").cloned().unwrap_or(Value::Null);
        if result.get("isError").and_then(Value::as_bool).unwrap_or(false) {
            return Err(ToolError::ExecutionError(content_text(&content)));
        }
        Ok(content)
    }
}

/// Join the text items of an MCP content list
fn content_text(content: &Value) -> String {
    content
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_else(|| content.to_string())
}

/// Pick the JSON-RPC response with the given id out of an SSE body
fn find_response_event(body: &str, id: i64) -> Result<Value, DiscoveryError> {
    body.lines()
        .filter_map(|line| line.trim_end_matches('\r').strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str::<Value>(data.trim_start()).ok())
        .find(|message| message.get("id").and_then(Value::as_i64) == Some(id))
        .ok_or_else(|| DiscoveryError::Protocol(format!("no response for request {}", id)))
}

fn rpc_result(message: Value) -> Result<Value, DiscoveryError> {
    if let Some(error) = message.get("error") {
        let text = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(DiscoveryError::Protocol(text.to_string()));
    }
    message
        .get("result")
        .cloned()
        .ok_or_else(|| DiscoveryError::Protocol("response carried no result".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tool::ToolCall;
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_handshake(server: &MockServer) {
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer user-token"))
            .and(body_partial_json(json!({"method": "initialize"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(SESSION_HEADER, "session-1")
                    .set_body_json(json!({
                        "jsonrpc": "2.0",
                        "id": 1,
                        "result": {"protocolVersion": PROTOCOL_VERSION, "serverInfo": {"name": "hub"}}
                    })),
            )
            .mount(server)
            .await;

        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "notifications/initialized"})))
            .respond_with(ResponseTemplate::new(202))
            .mount(server)
            .await;
    }

    fn discovery(server: &MockServer) -> McpToolDiscovery {
        McpToolDiscovery::new(Url::parse(&server.uri()).unwrap(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_discover_tools_json() {
        let server = MockServer::start().await;
        mount_handshake(&server).await;
        Mock::given(method("POST"))
            .and(header(SESSION_HEADER, "session-1"))
            .and(body_partial_json(json!({"method": "tools/list"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 2,
                "result": {"tools": [
                    {"name": "github_search", "description": "Search GitHub", "inputSchema": {"type": "object"}},
                    {"name": "slack_post"}
                ]}
            })))
            .mount(&server)
            .await;

        let tools = discovery(&server).discover("user-token").await.unwrap();
        assert_eq!(tools.names(), vec!["github_search", "slack_post"]);
        assert_eq!(tools.get("github_search").unwrap().description, "Search GitHub");
        assert_eq!(
            tools.get("slack_post").unwrap().input_schema,
            json!({"type": "object", "properties": {}})
        );
        assert!(tools.can_execute());
    }

    #[tokio::test]
    async fn test_discover_tools_event_stream_and_call() {
        let server = MockServer::start().await;
        mount_handshake(&server).await;
        let list = format!(
            "event: message\ndata: {}\n\n",
            json!({"jsonrpc": "2.0", "id": 2, "result": {"tools": [{"name": "echo"}]}})
        );
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "tools/list"})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(list, "text/event-stream"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "tools/call", "params": {"name": "echo"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 3,
                "result": {"content": [{"type": "text", "text": "pong"}]}
            })))
            .mount(&server)
            .await;

        let tools = discovery(&server).discover("user-token").await.unwrap();
        let result = tools
            .execute(&ToolCall::new("c1", "echo", json!({"text": "ping"})))
            .await
            .unwrap();
        assert_eq!(result, json!([{"type": "text", "text": "pong"}]));
    }

    #[tokio::test]
    async fn test_tool_error_result() {
        let server = MockServer::start().await;
        mount_handshake(&server).await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "tools/list"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 2, "result": {"tools": [{"name": "flaky"}]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "tools/call"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 3,
                "result": {"isError": true, "content": [{"type": "text", "text": "upstream down"}]}
            })))
            .mount(&server)
            .await;

        let tools = discovery(&server).discover("user-token").await.unwrap();
        let err = tools
            .execute(&ToolCall::new("c1", "flaky", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::ExecutionError("upstream down".to_string()));
    }

    #[tokio::test]
    async fn test_rejected_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = discovery(&server).discover("bad").await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Unauthorized));
    }

    #[tokio::test]
    async fn test_rpc_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1, "error": {"code": -32600, "message": "bad request"}
            })))
            .mount(&server)
            .await;

        let err = discovery(&server).discover("user-token").await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Protocol(ref m) if m == "bad request"));
    }
}
