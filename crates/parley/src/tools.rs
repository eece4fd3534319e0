//! Remote tools the model may call mid-conversation.
//!
//! Discovery is best-effort: callers hold a `Result<ToolSet, DiscoveryError>` and collapse a
//! failure to [`ToolSet::empty`] rather than failing the chat request.
pub mod mcp;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::models::tool::{Tool, ToolCall};

pub use mcp::McpToolDiscovery;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Tool server rejected the access token")]
    Unauthorized,

    #[error("Tool server responded with status {0}")]
    Status(u16),

    #[error("Tool server request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Tool server protocol error: {0}")]
    Protocol(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),
}

pub type ToolResult<T> = Result<T, ToolError>;

/// Runs tool calls against wherever the tools were discovered
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn call_tool(&self, name: &str, arguments: Value) -> ToolResult<Value>;
}

/// Finds the tools available to the holder of an access token
#[async_trait]
pub trait ToolDiscovery: Send + Sync {
    async fn discover(&self, access_token: &str) -> Result<ToolSet, DiscoveryError>;
}

/// Discovery for deployments without a tool server
pub struct NoToolDiscovery;

#[async_trait]
impl ToolDiscovery for NoToolDiscovery {
    async fn discover(&self, _access_token: &str) -> Result<ToolSet, DiscoveryError> {
        Ok(ToolSet::empty())
    }
}

/// Tool definitions keyed by name, plus the handle that can execute them
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: BTreeMap<String, Tool>,
    executor: Option<Arc<dyn ToolExecutor>>,
}

impl ToolSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(tools: Vec<Tool>, executor: Option<Arc<dyn ToolExecutor>>) -> Self {
        Self {
            tools: tools.into_iter().map(|tool| (tool.name.clone(), tool)).collect(),
            executor,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    /// Definitions to advertise to the model, ordered by name
    pub fn definitions(&self) -> Vec<Tool> {
        self.tools.values().cloned().collect()
    }

    /// Whether tool calls from the model can actually be run
    pub fn can_execute(&self) -> bool {
        self.executor.is_some() && !self.is_empty()
    }

    pub async fn execute(&self, call: &ToolCall) -> ToolResult<Value> {
        if !self.tools.contains_key(&call.name) {
            return Err(ToolError::ToolNotFound(call.name.clone()));
        }
        let executor = self
            .executor
            .as_ref()
            .ok_or_else(|| ToolError::ExecutionError("No executor for discovered tools".into()))?;
        executor.call_tool(&call.name, call.arguments.clone()).await
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.names())
            .field("executable", &self.executor.is_some())
            .finish()
    }
}
