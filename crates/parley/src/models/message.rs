use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumString};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Map a loosely typed role onto the closed set. A missing or falsy role means `user`,
    /// anything that is neither `user` nor `assistant` is treated as `system`.
    pub fn coerce(value: Option<&Value>) -> Role {
        match value {
            Some(value) if is_truthy(value) => match value.as_str() {
                Some("user") => Role::User,
                Some("assistant") => Role::Assistant,
                _ => Role::System,
            },
            _ => Role::User,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InvocationState {
    Call,
    Result,
    Error,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvocationError {
    #[error("Tool invocation {id} is already settled as {state}")]
    AlreadySettled { id: String, state: InvocationState },
}

/// A tool call made by the model, together with its outcome once known
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub tool_call_id: String,
    pub tool_name: String,
    pub state: InvocationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl ToolInvocation {
    pub fn call<S: Into<String>, N: Into<String>>(
        tool_call_id: S,
        tool_name: N,
        args: Value,
    ) -> Self {
        ToolInvocation {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            state: InvocationState::Call,
            args: Some(args),
            result: None,
        }
    }

    /// Settle the invocation with a successful result
    pub fn resolve(&mut self, result: Value) -> Result<(), InvocationError> {
        self.settle(InvocationState::Result, result)
    }

    /// Settle the invocation with an error payload
    pub fn fail(&mut self, error: Value) -> Result<(), InvocationError> {
        self.settle(InvocationState::Error, error)
    }

    pub fn is_settled(&self) -> bool {
        self.state != InvocationState::Call
    }

    fn settle(&mut self, state: InvocationState, payload: Value) -> Result<(), InvocationError> {
        if self.is_settled() {
            return Err(InvocationError::AlreadySettled {
                id: self.tool_call_id.clone(),
                state: self.state,
            });
        }
        self.state = state;
        self.result = Some(payload);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// A message to or from an LLM
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_invocations: Vec<ToolInvocation>,
}

impl Message {
    pub fn new<S: Into<String>>(role: Role, content: S) -> Self {
        Message {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            tool_invocations: Vec::new(),
        }
    }

    /// Create a new user message
    pub fn user<S: Into<String>>(content: S) -> Self {
        Message::new(Role::User, content)
    }

    /// Create a new, empty assistant message
    pub fn assistant() -> Self {
        Message::new(Role::Assistant, "")
    }

    pub fn system<S: Into<String>>(content: S) -> Self {
        Message::new(Role::System, content)
    }

    pub fn with_text<S: AsRef<str>>(mut self, text: S) -> Self {
        self.content.push_str(text.as_ref());
        self
    }

    pub fn with_tool_invocation(mut self, invocation: ToolInvocation) -> Self {
        self.tool_invocations.push(invocation);
        self
    }

    /// Invocations that already carry an outcome, in call order
    pub fn settled_invocations(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.tool_invocations.iter().filter(|inv| inv.is_settled())
    }
}

/// Javascript-style truthiness, which is what chat clients use when building message lists
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn coerce_content(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Convert a loosely typed message list into our Message type.
///
/// Entries that are not objects or that carry no usable content are dropped rather than
/// rejected, so the result may be shorter than the input (or empty).
pub fn clean_messages(raw: &[Value]) -> Vec<Message> {
    let messages: Vec<Message> = raw
        .iter()
        .filter_map(|entry| {
            let object = entry.as_object()?;
            let content = object.get("content").filter(|c| is_truthy(c))?;

            let id = object
                .get("id")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
                .map(String::from)
                .unwrap_or_else(|| Uuid::new_v4().to_string());

            let tool_invocations = object
                .get("toolInvocations")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| serde_json::from_value(item.clone()).ok())
                        .collect()
                })
                .unwrap_or_default();

            Some(Message {
                id,
                role: Role::coerce(object.get("role")),
                content: coerce_content(content),
                tool_invocations,
            })
        })
        .collect();

    if messages.len() < raw.len() {
        tracing::debug!(
            "Dropped {} malformed messages out of {}",
            raw.len() - messages.len(),
            raw.len()
        );
    }

    messages
}
