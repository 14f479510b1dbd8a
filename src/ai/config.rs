//! Backend selection and connection parameters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{OrganizerError, Result};

const DEFAULT_MAX_TOKENS: u32 = 512;
const DEFAULT_MAX_TEXT_LENGTH: usize = 4096;
const DEFAULT_TEMPERATURE: f32 = 0.2;

/// Supported text-generation backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI chat completions
    OpenAi,
    /// Anthropic messages API
    Anthropic,
    /// Google Gemini generateContent
    Gemini,
    /// Ollama generate API
    Ollama,
    /// Any server speaking the OpenAI chat format (LM Studio, llama.cpp, MLX)
    OpenAiCompatible,
    /// In-process llama service exposing /load and /infer
    Embedded,
}

impl ProviderKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "openai" | "open_ai" => Some(Self::OpenAi),
            "anthropic" | "claude" => Some(Self::Anthropic),
            "gemini" | "google" => Some(Self::Gemini),
            "ollama" => Some(Self::Ollama),
            "openai_compatible" | "lmstudio" | "lm_studio" | "llama_cpp" | "mlx" | "custom" => {
                Some(Self::OpenAiCompatible)
            }
            "embedded" | "local" => Some(Self::Embedded),
            _ => None,
        }
    }

    /// Cloud vendors refuse unauthenticated requests
    pub fn requires_api_key(&self) -> bool {
        matches!(self, Self::OpenAi | Self::Anthropic | Self::Gemini)
    }

    pub fn requires_model(&self) -> bool {
        !matches!(self, Self::Embedded)
    }
}

/// Connection parameters for one backend.
///
/// Owned by the caller; the pipeline only reads it. `Debug` redacts secrets.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub provider: ProviderKind,
    /// Base URL. Empty means the provider's default.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Characters of file text sent with each request
    #[serde(default = "default_max_text_length")]
    pub max_text_length: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Applied last; wins over computed headers
    #[serde(default)]
    pub custom_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub supports_vision: bool,
    #[serde(default)]
    pub model_path: Option<String>,
    #[serde(default)]
    pub context_length: Option<u32>,
    #[serde(default)]
    pub gpu_layers: Option<u32>,
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_max_text_length() -> usize {
    DEFAULT_MAX_TEXT_LENGTH
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

impl ProviderConfig {
    pub fn new(provider: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            provider,
            endpoint: String::new(),
            model: model.into(),
            api_key: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            max_text_length: DEFAULT_MAX_TEXT_LENGTH,
            temperature: DEFAULT_TEMPERATURE,
            custom_headers: BTreeMap::new(),
            system_prompt: None,
            supports_vision: false,
            model_path: None,
            context_length: None,
            gpu_layers: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// API key as sent on the wire: trimmed, `None` when blank.
    pub fn api_key(&self) -> Option<&str> {
        non_blank(self.api_key.as_deref())
    }

    /// Build a config from `ORGANIZER_*` environment variables (and `.env`).
    pub fn from_env() -> Result<Self> {
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_path("../.env");
        }

        let provider_name = std::env::var("ORGANIZER_PROVIDER")
            .map_err(|_| OrganizerError::Config("ORGANIZER_PROVIDER is not set".to_string()))?;
        let provider = ProviderKind::parse(&provider_name).ok_or_else(|| {
            OrganizerError::Config(format!("Unknown provider: {}", provider_name))
        })?;

        let mut config = Self::new(provider, env_string("ORGANIZER_MODEL").unwrap_or_default());
        if let Some(endpoint) = env_string("ORGANIZER_ENDPOINT") {
            config.endpoint = endpoint;
        }
        config.api_key = env_string("ORGANIZER_API_KEY");
        config.model_path = env_string("ORGANIZER_MODEL_PATH");
        if let Some(max_tokens) = env_parse("ORGANIZER_MAX_TOKENS")? {
            config.max_tokens = max_tokens;
        }
        if let Some(max_text_length) = env_parse("ORGANIZER_MAX_TEXT_LENGTH")? {
            config.max_text_length = max_text_length;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot possibly produce a classification.
    pub fn validate(&self) -> Result<()> {
        if self.provider.requires_model() && self.model.trim().is_empty() {
            return Err(OrganizerError::Config(format!(
                "A model identifier is required for {:?}",
                self.provider
            )));
        }

        if self.provider.requires_api_key()
            && self.api_key().is_none()
            && !self.has_custom_auth_header()
        {
            return Err(OrganizerError::Config(format!(
                "An API key is required for {:?}",
                self.provider
            )));
        }

        if self.provider == ProviderKind::Embedded
            && self.model_path.as_deref().map(str::trim).unwrap_or("").is_empty()
        {
            return Err(OrganizerError::Config(
                "A local model path is required for the embedded provider".to_string(),
            ));
        }

        if self.max_text_length == 0 {
            return Err(OrganizerError::Config(
                "max_text_length must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    fn has_custom_auth_header(&self) -> bool {
        self.custom_headers.keys().any(|k| is_secret_header(k))
    }

    /// Replace the configured credential in free text.
    pub fn redact(&self, text: &str) -> String {
        let mut secrets: Vec<&str> = Vec::new();
        if let Some(key) = self.api_key() {
            secrets.push(key);
            secrets.extend(self.api_key.as_deref().filter(|raw| *raw != key));
        }
        for (name, value) in &self.custom_headers {
            if let Some(trimmed) = non_blank(Some(value.as_str())).filter(|_| is_secret_header(name)) {
                secrets.push(trimmed);
                if trimmed != value.as_str() {
                    secrets.push(value.as_str());
                }
            }
        }

        // Longest first so a raw value is replaced before its trimmed core
        secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));
        secrets
            .into_iter()
            .fold(text.to_string(), |out, secret| out.replace(secret, "***"))
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: BTreeMap<&str, &str> = self
            .custom_headers
            .iter()
            .map(|(k, v)| {
                let shown = if is_secret_header(k) { "***" } else { v.as_str() };
                (k.as_str(), shown)
            })
            .collect();

        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("max_tokens", &self.max_tokens)
            .field("max_text_length", &self.max_text_length)
            .field("temperature", &self.temperature)
            .field("custom_headers", &headers)
            .field("system_prompt", &self.system_prompt.is_some())
            .field("supports_vision", &self.supports_vision)
            .field("model_path", &self.model_path)
            .finish()
    }
}

pub(crate) fn is_secret_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower == "authorization" || lower.contains("api-key") || lower.contains("token")
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env_string(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| OrganizerError::Config(format!("{} has an invalid value: {}", name, raw))),
        None => Ok(None),
    }
}
