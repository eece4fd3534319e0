use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment};
use parley::providers::{configs::ProviderConfig, factory::ProviderType};
use parley::relay::DEFAULT_MAX_STEPS;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::InvalidValue {
                env_var: to_env_var("server.host"),
                message: e.to_string(),
            })
    }
}

/// Who verifies bearer tokens
#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum AuthSettings {
    /// `token=user_id` pairs, comma separated
    Static {
        #[serde(default)]
        tokens: String,
    },
    UserInfo { url: String },
}

impl Default for AuthSettings {
    fn default() -> Self {
        AuthSettings::Static {
            tokens: String::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ToolSettings {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_tool_timeout(),
        }
    }
}

impl ToolSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn endpoint(&self) -> Result<Option<Url>, ConfigError> {
        self.url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .map(|url| parse_url("tools.url", url))
            .transpose()
    }
}

#[derive(Debug, Deserialize)]
pub struct RelaySettings {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub tools: ToolSettings,
    #[serde(default)]
    pub relay: RelaySettings,
    #[serde(default)]
    pub gateway_api_key: Option<String>,
    #[serde(default)]
    pub model_provider: ProviderType,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub model_host: Option<String>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("auth.type", "static")?
            .add_source(
                Environment::with_prefix("PARLEY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            // AI_GATEWAY_API_KEY, AI_MODEL_PROVIDER, AI_MODEL_NAME, AI_MODEL_HOST
            .add_source(Environment::with_prefix("AI").prefix_separator("_"))
            .build()?;

        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        match result {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                let error_str = err.to_string();
                if let Some(field) = missing_field(&error_str) {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(&qualify(field)),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }

    /// Provider settings for the relay, or `None` when no API key is configured
    pub fn provider_config(&self) -> Result<Option<ProviderConfig>, ConfigError> {
        let Some(api_key) = self
            .gateway_api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
        else {
            return Ok(None);
        };

        if let Some(host) = &self.model_host {
            parse_url("model_host", host)?;
        }
        Ok(Some(self.model_provider.config(
            api_key,
            self.model_name.as_deref(),
            self.model_host.as_deref(),
        )))
    }
}

/// Pull the field name out of "missing field `url`", with or without a trailing key note
fn missing_field(message: &str) -> Option<&str> {
    message.strip_prefix("missing field `")?.split('`').next()
}

/// Required keys that serde reports without their section
fn qualify(field: &str) -> String {
    match field {
        "url" => "auth.url".to_string(),
        other => other.to_string(),
    }
}

fn parse_url(key: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::InvalidValue {
        env_var: to_env_var(key),
        message: e.to_string(),
    })
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_tool_timeout() -> u64 {
    10
}

fn default_max_steps() -> usize {
    DEFAULT_MAX_STEPS
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clean_env() {
        for (key, _) in env::vars() {
            if key.starts_with("PARLEY_") || key.starts_with("AI_") {
                env::remove_var(&key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_default_settings() {
        clean_env();

        let settings = Settings::new().unwrap();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 3000);
        assert!(matches!(settings.auth, AuthSettings::Static { ref tokens } if tokens.is_empty()));
        assert_eq!(settings.tools.url, None);
        assert_eq!(settings.tools.timeout_secs, 10);
        assert_eq!(settings.relay.max_steps, 5);
        assert_eq!(settings.model_provider, ProviderType::OpenAi);
        assert!(settings.provider_config().unwrap().is_none());
    }

    #[test]
    #[serial]
    fn test_environment_override() {
        clean_env();
        env::set_var("PARLEY_SERVER__PORT", "8080");
        env::set_var("PARLEY_AUTH__TYPE", "static");
        env::set_var("PARLEY_AUTH__TOKENS", "dev=alice");
        env::set_var("PARLEY_TOOLS__URL", "http://localhost:9000/mcp");
        env::set_var("PARLEY_RELAY__MAX_STEPS", "3");
        env::set_var("AI_GATEWAY_API_KEY", "test-key");
        env::set_var("AI_MODEL_PROVIDER", "anthropic");
        env::set_var("AI_MODEL_NAME", "claude-test");

        let settings = Settings::new().unwrap();
        assert_eq!(settings.server.port, 8080);
        assert!(
            matches!(settings.auth, AuthSettings::Static { ref tokens } if tokens == "dev=alice")
        );
        assert_eq!(
            settings.tools.endpoint().unwrap().unwrap().as_str(),
            "http://localhost:9000/mcp"
        );
        assert_eq!(settings.relay.max_steps, 3);

        match settings.provider_config().unwrap() {
            Some(ProviderConfig::Anthropic(config)) => {
                assert_eq!(config.api_key, "test-key");
                assert_eq!(config.model, "claude-test");
                assert_eq!(config.host, "https://api.anthropic.com");
            }
            other => panic!("Expected Anthropic provider, got {:?}", other),
        }

        clean_env();
    }

    #[test]
    #[serial]
    fn test_userinfo_requires_url() {
        clean_env();
        env::set_var("PARLEY_AUTH__TYPE", "userinfo");

        match Settings::new() {
            Err(ConfigError::MissingEnvVar { env_var }) => {
                assert_eq!(env_var, "PARLEY_AUTH__URL")
            }
            other => panic!("Expected missing PARLEY_AUTH__URL, got {:?}", other),
        }

        env::set_var("PARLEY_AUTH__URL", "https://id.example.com/userinfo");
        let settings = Settings::new().unwrap();
        assert!(matches!(
            settings.auth,
            AuthSettings::UserInfo { ref url } if url.ends_with("/userinfo")
        ));

        clean_env();
    }

    #[test]
    #[serial]
    fn test_model_provider_is_lenient() {
        clean_env();

        env::set_var("AI_MODEL_PROVIDER", "Anthropic");
        assert_eq!(Settings::new().unwrap().model_provider, ProviderType::Anthropic);

        env::set_var("AI_MODEL_PROVIDER", "OpenAI");
        assert_eq!(Settings::new().unwrap().model_provider, ProviderType::OpenAi);

        env::set_var("AI_MODEL_PROVIDER", "mistral");
        assert_eq!(Settings::new().unwrap().model_provider, ProviderType::OpenAi);

        clean_env();
    }

    #[test]
    #[serial]
    fn test_invalid_model_host() {
        clean_env();
        env::set_var("AI_GATEWAY_API_KEY", "test-key");
        env::set_var("AI_MODEL_HOST", "not a url");

        let settings = Settings::new().unwrap();
        assert!(matches!(
            settings.provider_config(),
            Err(ConfigError::InvalidValue { ref env_var, .. }) if env_var == "AI_MODEL_HOST"
        ));

        clean_env();
    }

    #[test]
    fn test_socket_addr_conversion() {
        let server_settings = ServerSettings {
            host: "127.0.0.1".to_string(),
            port: 3000,
        };
        let addr = server_settings.socket_addr().unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:3000");
    }
}
