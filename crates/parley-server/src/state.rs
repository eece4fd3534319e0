use anyhow::Result;
use parley::auth::{Authenticator, StaticTokenAuthenticator, UserInfoAuthenticator};
use parley::providers::{base::Provider, factory};
use parley::tools::{McpToolDiscovery, NoToolDiscovery, ToolDiscovery};
use std::sync::Arc;
use url::Url;

use crate::configuration::{AuthSettings, Settings};

/// Shared application state. Everything in here is immutable once the server is running.
#[derive(Clone)]
pub struct AppState {
    /// `None` when no gateway key is configured, in which case chat answers 503
    pub provider: Option<Arc<dyn Provider>>,
    pub authenticator: Arc<dyn Authenticator>,
    pub discovery: Arc<dyn ToolDiscovery>,
    pub max_steps: usize,
}

impl AppState {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let provider: Option<Arc<dyn Provider>> = match settings.provider_config()? {
            Some(config) => {
                tracing::info!(
                    "Relaying chat to {} using model {}",
                    settings.model_provider,
                    config.model()
                );
                let provider: Arc<dyn Provider + Send + Sync> =
                    Arc::from(factory::get_provider(config)?);
                Some(provider)
            }
            None => {
                tracing::warn!("AI_GATEWAY_API_KEY is not set, chat requests will be refused");
                None
            }
        };

        let authenticator: Arc<dyn Authenticator> = match &settings.auth {
            AuthSettings::Static { tokens } => {
                let authenticator = StaticTokenAuthenticator::parse(tokens);
                if authenticator.is_empty() {
                    tracing::warn!("No static tokens configured, every request will be rejected");
                }
                Arc::new(authenticator)
            }
            AuthSettings::UserInfo { url } => {
                Arc::new(UserInfoAuthenticator::new(Url::parse(url)?)?)
            }
        };

        let discovery: Arc<dyn ToolDiscovery> = match settings.tools.endpoint()? {
            Some(endpoint) => {
                tracing::info!("Discovering tools from {}", endpoint);
                Arc::new(McpToolDiscovery::new(endpoint, settings.tools.timeout())?)
            }
            None => Arc::new(NoToolDiscovery),
        };

        Ok(Self {
            provider,
            authenticator,
            discovery,
            max_steps: settings.relay.max_steps,
        })
    }
}
