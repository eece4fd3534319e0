use super::{
    anthropic::AnthropicProvider,
    base::Provider,
    configs::{AnthropicProviderConfig, OpenAiProviderConfig, ProviderConfig},
    openai::OpenAiProvider,
};
use anyhow::Result;
use serde::Deserialize;
use strum_macros::{Display, EnumIter, EnumString};

#[derive(EnumIter, EnumString, Display, Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProviderType {
    #[default]
    OpenAi,
    Anthropic,
}

impl From<String> for ProviderType {
    /// Anything other than a known provider name selects OpenAI
    fn from(name: String) -> Self {
        name.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Unknown model provider {:?}, using openai", name);
            ProviderType::OpenAi
        })
    }
}

impl ProviderType {
    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderType::OpenAi => "gpt-4o",
            ProviderType::Anthropic => "claude-sonnet-4-5-20250929",
        }
    }

    /// Build the configuration for this provider from an API key and optional overrides
    pub fn config(&self, api_key: &str, model: Option<&str>, host: Option<&str>) -> ProviderConfig {
        let model = model.unwrap_or(self.default_model());
        match self {
            ProviderType::OpenAi => {
                let mut config = OpenAiProviderConfig::new(api_key, model);
                if let Some(host) = host {
                    config.host = host.to_string();
                }
                ProviderConfig::OpenAi(config)
            }
            ProviderType::Anthropic => {
                let mut config = AnthropicProviderConfig::new(api_key, model);
                if let Some(host) = host {
                    config.host = host.to_string();
                }
                ProviderConfig::Anthropic(config)
            }
        }
    }
}

pub fn get_provider(config: ProviderConfig) -> Result<Box<dyn Provider + Send + Sync>> {
    match config {
        ProviderConfig::OpenAi(openai_config) => Ok(Box::new(OpenAiProvider::new(openai_config)?)),
        ProviderConfig::Anthropic(anthropic_config) => {
            Ok(Box::new(AnthropicProvider::new(anthropic_config)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_provider_type_names() {
        assert_eq!(ProviderType::from_str("openai").unwrap(), ProviderType::OpenAi);
        assert_eq!(ProviderType::from_str("anthropic").unwrap(), ProviderType::Anthropic);
        assert_eq!(ProviderType::from_str("OpenAI").unwrap(), ProviderType::OpenAi);
        assert!(ProviderType::from_str("databricks").is_err());
        assert_eq!(ProviderType::iter().count(), 2);
    }

    #[test]
    fn test_provider_type_from_setting() {
        assert_eq!(ProviderType::from("Anthropic".to_string()), ProviderType::Anthropic);
        assert_eq!(ProviderType::from(" anthropic ".to_string()), ProviderType::Anthropic);
        assert_eq!(ProviderType::from("OpenAI".to_string()), ProviderType::OpenAi);
        assert_eq!(ProviderType::from("mistral".to_string()), ProviderType::OpenAi);
        assert_eq!(ProviderType::from(String::new()), ProviderType::OpenAi);
    }

    #[test]
    fn test_config_defaults_and_overrides() {
        let config = ProviderType::Anthropic.config("key", None, None);
        assert_eq!(config.model(), "claude-sonnet-4-5-20250929");

        let config =
            ProviderType::OpenAi.config("key", Some("gpt-4o-mini"), Some("http://localhost:9000"));
        match config {
            ProviderConfig::OpenAi(config) => {
                assert_eq!(config.model, "gpt-4o-mini");
                assert_eq!(config.host, "http://localhost:9000");
                assert_eq!(config.api_key, "key");
            }
            other => panic!("Expected OpenAI config, got {:?}", other),
        }
    }

    #[test]
    fn test_debug_hides_api_key() {
        let config = ProviderType::OpenAi.config("sk-secret", None, None);
        assert!(!format!("{:?}", config).contains("sk-secret"));
    }
}
