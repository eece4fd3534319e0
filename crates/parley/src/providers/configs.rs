//! Provider configuration is injected through these structs at construction time, so
//! credentials never travel through the process environment once the server is running.

const OPENAI_HOST: &str = "https://api.openai.com";
const ANTHROPIC_HOST: &str = "https://api.anthropic.com";
const DEFAULT_ANTHROPIC_MAX_TOKENS: i32 = 4096;

// Unified enum to wrap different provider configurations
#[derive(Clone)]
pub enum ProviderConfig {
    OpenAi(OpenAiProviderConfig),
    Anthropic(AnthropicProviderConfig),
}

impl ProviderConfig {
    pub fn model(&self) -> &str {
        match self {
            ProviderConfig::OpenAi(config) => &config.model,
            ProviderConfig::Anthropic(config) => &config.model,
        }
    }
}

#[derive(Clone)]
pub struct OpenAiProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
}

impl OpenAiProviderConfig {
    pub fn new<K: Into<String>, M: Into<String>>(api_key: K, model: M) -> Self {
        Self {
            host: OPENAI_HOST.to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: None,
            max_tokens: None,
        }
    }
}

#[derive(Clone)]
pub struct AnthropicProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: i32,
}

impl AnthropicProviderConfig {
    pub fn new<K: Into<String>, M: Into<String>>(api_key: K, model: M) -> Self {
        Self {
            host: ANTHROPIC_HOST.to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: None,
            max_tokens: DEFAULT_ANTHROPIC_MAX_TOKENS,
        }
    }
}

// Keep credentials out of debug output
impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (kind, host, model) = match self {
            ProviderConfig::OpenAi(c) => ("openai", &c.host, &c.model),
            ProviderConfig::Anthropic(c) => ("anthropic", &c.host, &c.model),
        };
        f.debug_struct("ProviderConfig")
            .field("type", &kind)
            .field("host", host)
            .field("model", model)
            .finish_non_exhaustive()
    }
}
