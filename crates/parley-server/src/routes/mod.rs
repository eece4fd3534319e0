// Export route modules
pub mod chat;
pub mod user;

use crate::state::AppState;
use axum::{routing::get, Router};

async fn status() -> &'static str {
    "ok"
}

// Function to configure all routes
pub fn configure(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status))
        .merge(chat::routes(state.clone()))
        .merge(user::routes(state))
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::state::AppState;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use parley::auth::{StaticTokenAuthenticator, User};
    use parley::models::message::Message;
    use parley::models::tool::Tool;
    use parley::providers::base::{Provider, ProviderEvent, ProviderStream};
    use parley::tools::{DiscoveryError, ToolDiscovery, ToolSet};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    pub const TEST_TOKEN: &str = "test-token";

    /// Replays the same events for every call and records what it was asked
    pub struct MockProvider {
        events: Mutex<Vec<Option<Result<ProviderEvent>>>>,
        failure: Option<String>,
        calls: Mutex<usize>,
        tool_names: Mutex<Vec<String>>,
    }

    impl MockProvider {
        pub fn new(events: Vec<Result<ProviderEvent>>) -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(events.into_iter().map(Some).collect()),
                failure: None,
                calls: Mutex::new(0),
                tool_names: Mutex::new(Vec::new()),
            })
        }

        /// A provider whose requests fail before any output
        pub fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
                failure: Some(message.to_string()),
                calls: Mutex::new(0),
                tool_names: Mutex::new(Vec::new()),
            })
        }

        pub fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }

        pub fn tool_names(&self) -> Vec<String> {
            self.tool_names.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Provider for MockProvider {
        fn model(&self) -> &str {
            "mock"
        }

        async fn stream(&self, _messages: &[Message], tools: &[Tool]) -> Result<ProviderStream> {
            *self.calls.lock().unwrap() += 1;
            *self.tool_names.lock().unwrap() = tools.iter().map(|t| t.name.clone()).collect();
            if let Some(failure) = &self.failure {
                return Err(anyhow!(failure.clone()));
            }
            // anyhow errors cannot be cloned, so each event is handed out once
            let events: Vec<Result<ProviderEvent>> = self
                .events
                .lock()
                .unwrap()
                .iter_mut()
                .filter_map(Option::take)
                .collect();
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    pub struct FailingDiscovery;

    #[async_trait]
    impl ToolDiscovery for FailingDiscovery {
        async fn discover(&self, _access_token: &str) -> Result<ToolSet, DiscoveryError> {
            Err(DiscoveryError::Status(502))
        }
    }

    /// Offers a single `search` tool and remembers the tokens it was given
    #[derive(Default)]
    pub struct RecordingDiscovery {
        tokens: Mutex<Vec<String>>,
    }

    impl RecordingDiscovery {
        pub fn tokens(&self) -> Vec<String> {
            self.tokens.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ToolDiscovery for RecordingDiscovery {
        async fn discover(&self, access_token: &str) -> Result<ToolSet, DiscoveryError> {
            self.tokens.lock().unwrap().push(access_token.to_string());
            Ok(ToolSet::new(
                vec![Tool::new("search", "Search", json!({"type": "object"}))],
                None,
            ))
        }
    }

    pub fn app_state(provider: Option<Arc<MockProvider>>) -> AppState {
        let mut user = User::new("user-1");
        user.wallet_address = Some("0xabc".to_string());
        AppState {
            provider: provider.map(|p| p as Arc<dyn Provider>),
            authenticator: Arc::new(StaticTokenAuthenticator::new().with_token(TEST_TOKEN, user)),
            discovery: Arc::new(parley::tools::NoToolDiscovery),
            max_steps: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, body::to_bytes, http::Request, http::StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_status() {
        let app = configure(test_support::app_state(None));
        let response = app
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"ok");
    }
}
