//! Per-backend wire formats
//!
//! Every supported backend is one [`ProviderKind`] variant. The four methods
//! here are the only place that knows about endpoint paths, request body
//! layout, auth headers and where the answer sits in the response envelope.
//! Adding a backend means adding a variant and a match arm in each.

use base64::Engine;
use serde_json::{json, Value};

use super::config::{ProviderConfig, ProviderKind};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Auth schemes left untouched when found in a caller-supplied Authorization header
const KNOWN_AUTH_SCHEMES: [&str; 6] = ["bearer ", "basic ", "token ", "digest ", "apikey ", "key "];

/// Image bytes sent to vision-capable backends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl ImageAttachment {
    pub fn base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64())
    }
}

/// Provider-neutral completion request
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub system: &'a str,
    pub prompt: &'a str,
    pub image: Option<&'a ImageAttachment>,
}

impl ProviderKind {
    /// Human-readable name used in logs and error text
    pub fn label(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OpenAI",
            ProviderKind::Anthropic => "Anthropic",
            ProviderKind::Gemini => "Gemini",
            ProviderKind::Ollama => "Ollama",
            ProviderKind::OpenAiCompatible => "OpenAI-compatible",
            ProviderKind::Embedded => "Embedded",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Anthropic => "https://api.anthropic.com/v1",
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            ProviderKind::Ollama => "http://localhost:11434",
            ProviderKind::OpenAiCompatible => "http://localhost:8000",
            ProviderKind::Embedded => "http://127.0.0.1:8765",
        }
    }

    pub fn supports_vision(&self) -> bool {
        !matches!(self, ProviderKind::Embedded)
    }

    fn base_url(&self, config: &ProviderConfig) -> String {
        let configured = config.endpoint.trim();
        let base = if configured.is_empty() {
            self.default_base_url()
        } else {
            configured
        };
        base.trim_end_matches('/').to_string()
    }

    /// Full URL for a completion call
    pub fn build_endpoint(&self, config: &ProviderConfig) -> String {
        let base = self.base_url(config);
        match self {
            ProviderKind::OpenAi | ProviderKind::Anthropic => {
                let suffix = if *self == ProviderKind::OpenAi {
                    "/chat/completions"
                } else {
                    "/messages"
                };
                if base.ends_with(suffix) {
                    base
                } else {
                    format!("{}{}", base, suffix)
                }
            }
            ProviderKind::Gemini => {
                let model = config.model.trim().trim_start_matches("models/");
                let mut url = format!("{}/models/{}:generateContent", base, model);
                if let Some(key) = config.api_key() {
                    url.push_str("?key=");
                    url.push_str(key);
                }
                url
            }
            ProviderKind::Ollama => format!("{}/api/generate", base),
            ProviderKind::OpenAiCompatible => {
                if base.ends_with("/chat/completions") {
                    base
                } else if base.ends_with("/v1") {
                    format!("{}/chat/completions", base)
                } else {
                    format!("{}/v1/chat/completions", base)
                }
            }
            ProviderKind::Embedded => format!("{}/infer", base),
        }
    }

    /// Model-load URL; only the embedded runtime has one
    pub fn load_endpoint(&self, config: &ProviderConfig) -> Option<String> {
        match self {
            ProviderKind::Embedded => Some(format!("{}/load", self.base_url(config))),
            _ => None,
        }
    }

    /// Provider-specific request body
    pub fn build_request_body(&self, config: &ProviderConfig, request: &CompletionRequest) -> Value {
        match self {
            ProviderKind::OpenAi | ProviderKind::OpenAiCompatible => {
                let user_content = match request.image {
                    Some(image) => json!([
                        {"type": "image_url", "image_url": {"url": image.data_url()}},
                        {"type": "text", "text": request.prompt}
                    ]),
                    None => json!(request.prompt),
                };
                let mut body = json!({
                    "model": config.model,
                    "messages": [
                        {"role": "system", "content": request.system},
                        {"role": "user", "content": user_content}
                    ],
                    "temperature": config.temperature,
                    "stream": false
                });
                if *self == ProviderKind::OpenAi {
                    body["max_completion_tokens"] = json!(config.max_tokens);
                    body["response_format"] = json!({"type": "json_object"});
                } else {
                    body["max_tokens"] = json!(config.max_tokens);
                }
                body
            }
            ProviderKind::Anthropic => {
                let mut content = Vec::new();
                if let Some(image) = request.image {
                    content.push(json!({
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": image.mime_type,
                            "data": image.base64()
                        }
                    }));
                }
                content.push(json!({"type": "text", "text": request.prompt}));
                json!({
                    "model": config.model,
                    "max_tokens": config.max_tokens,
                    "temperature": config.temperature,
                    "system": request.system,
                    "messages": [{"role": "user", "content": content}]
                })
            }
            ProviderKind::Gemini => {
                let mut parts = Vec::new();
                if let Some(image) = request.image {
                    parts.push(json!({
                        "inline_data": {"mime_type": image.mime_type, "data": image.base64()}
                    }));
                }
                parts.push(json!({"text": request.prompt}));
                json!({
                    "systemInstruction": {"parts": [{"text": request.system}]},
                    "contents": [{"role": "user", "parts": parts}],
                    "generationConfig": {
                        "maxOutputTokens": config.max_tokens,
                        "temperature": config.temperature,
                        "responseMimeType": "application/json"
                    }
                })
            }
            ProviderKind::Ollama => {
                let mut body = json!({
                    "model": config.model,
                    "prompt": request.prompt,
                    "system": request.system,
                    "stream": false,
                    "format": "json",
                    "options": {
                        "num_predict": config.max_tokens,
                        "temperature": config.temperature
                    }
                });
                if let Some(image) = request.image {
                    body["images"] = json!([image.base64()]);
                }
                body
            }
            ProviderKind::Embedded => json!({
                "args": {
                    "prompt": format!("{}\n\n{}", request.system, request.prompt),
                    "temperature": config.temperature,
                    "max_tokens": config.max_tokens
                }
            }),
        }
    }

    /// Body for the embedded runtime's load call
    pub fn build_load_body(&self, config: &ProviderConfig) -> Value {
        json!({
            "config": {
                "model_path": config.model_path.clone().unwrap_or_default(),
                "context_length": config.context_length,
                "gpu_layers": config.gpu_layers
            }
        })
    }

    /// Request headers: content type, provider auth, then caller overrides.
    pub fn build_headers(&self, config: &ProviderConfig) -> Vec<(String, String)> {
        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];

        match self {
            ProviderKind::Anthropic => {
                if let Some(key) = config.api_key() {
                    set_header(&mut headers, "x-api-key", key);
                }
                set_header(&mut headers, "anthropic-version", ANTHROPIC_VERSION);
            }
            // Gemini carries the key in the URL, the embedded runtime has no auth
            ProviderKind::Gemini | ProviderKind::Embedded => {}
            ProviderKind::OpenAi | ProviderKind::OpenAiCompatible | ProviderKind::Ollama => {
                if let Some(key) = config.api_key() {
                    set_header(&mut headers, "Authorization", &format!("Bearer {}", key));
                }
            }
        }

        for (name, value) in &config.custom_headers {
            if name.eq_ignore_ascii_case("authorization") {
                set_header(&mut headers, name, &normalize_authorization(value));
            } else {
                set_header(&mut headers, name, value);
            }
        }

        headers
    }

    /// Locate the assistant content inside a parsed response envelope.
    pub fn extract_content<'a>(&self, response: &'a Value) -> Option<&'a Value> {
        let candidates: &[&str] = match self {
            ProviderKind::OpenAi | ProviderKind::OpenAiCompatible => {
                &["/choices/0/message/content", "/choices/0/text"]
            }
            ProviderKind::Anthropic => &["/content"],
            ProviderKind::Gemini => &["/candidates/0/content/parts"],
            ProviderKind::Ollama => &["/response", "/message/content"],
            ProviderKind::Embedded => &["/content"],
        };

        candidates
            .iter()
            .filter_map(|pointer| response.pointer(pointer))
            .find(|value| !value.is_null())
    }
}

/// Insert or replace a header, matching names case-insensitively.
fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    if let Some(existing) = headers
        .iter_mut()
        .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
    {
        *existing = (name.to_string(), value.to_string());
    } else {
        headers.push((name.to_string(), value.to_string()));
    }
}

/// Wrap a bare token from a caller-supplied Authorization header in `Bearer`.
///
/// Compatibility quirk: values longer than 10 characters without a known
/// scheme prefix are assumed to be raw bearer tokens. This also rewrites
/// intentionally unusual schemes; an explicit auth-scheme setting would
/// make it unnecessary.
pub fn normalize_authorization(value: &str) -> String {
    let trimmed = value.trim();
    let lower = trimmed.to_ascii_lowercase();
    let has_scheme = KNOWN_AUTH_SCHEMES.iter().any(|s| lower.starts_with(s));

    if trimmed.len() > 10 && !has_scheme {
        format!("Bearer {}", trimmed)
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn request() -> CompletionRequest<'static> {
        CompletionRequest {
            system: "sys",
            prompt: "classify me",
            image: None,
        }
    }

    #[test]
    fn test_endpoints() {
        let openai = ProviderConfig::new(ProviderKind::OpenAi, "gpt-4o-mini");
        assert_eq!(
            ProviderKind::OpenAi.build_endpoint(&openai),
            "https://api.openai.com/v1/chat/completions"
        );

        let compat = ProviderConfig::new(ProviderKind::OpenAiCompatible, "local")
            .with_endpoint("http://localhost:1234/v1/");
        assert_eq!(
            ProviderKind::OpenAiCompatible.build_endpoint(&compat),
            "http://localhost:1234/v1/chat/completions"
        );

        let ollama = ProviderConfig::new(ProviderKind::Ollama, "llama3.2");
        assert_eq!(
            ProviderKind::Ollama.build_endpoint(&ollama),
            "http://localhost:11434/api/generate"
        );
    }

    #[test]
    fn test_gemini_key_in_url_not_header() {
        let config = ProviderConfig::new(ProviderKind::Gemini, "models/gemini-1.5-flash")
            .with_api_key("AIzaKEY");
        let url = ProviderKind::Gemini.build_endpoint(&config);
        assert!(url.ends_with("/models/gemini-1.5-flash:generateContent?key=AIzaKEY"));

        let headers = ProviderKind::Gemini.build_headers(&config);
        assert_eq!(header(&headers, "Content-Type"), Some("application/json"));
        assert!(header(&headers, "Authorization").is_none());
    }

    #[test]
    fn test_anthropic_uses_vendor_header() {
        let config = ProviderConfig::new(ProviderKind::Anthropic, "claude-3-5-haiku-latest")
            .with_api_key("sk-ant-1");
        let headers = ProviderKind::Anthropic.build_headers(&config);
        assert_eq!(header(&headers, "x-api-key"), Some("sk-ant-1"));
        assert_eq!(header(&headers, "anthropic-version"), Some(ANTHROPIC_VERSION));
        assert!(header(&headers, "Authorization").is_none());
    }

    #[test]
    fn test_bearer_default_and_omitted_without_key() {
        let config = ProviderConfig::new(ProviderKind::OpenAi, "gpt").with_api_key("sk-1");
        let headers = ProviderKind::OpenAi.build_headers(&config);
        assert_eq!(header(&headers, "Authorization"), Some("Bearer sk-1"));

        let local = ProviderConfig::new(ProviderKind::Ollama, "llama3.2");
        let headers = ProviderKind::Ollama.build_headers(&local);
        assert!(header(&headers, "Authorization").is_none());
    }

    #[test]
    fn test_custom_headers_win() {
        let mut config = ProviderConfig::new(ProviderKind::OpenAi, "gpt").with_api_key("sk-1");
        config
            .custom_headers
            .insert("content-type".to_string(), "application/vnd+json".to_string());
        config
            .custom_headers
            .insert("authorization".to_string(), "Basic dXNlcjpwYXNz".to_string());
        let headers = ProviderKind::OpenAi.build_headers(&config);
        assert_eq!(header(&headers, "Content-Type"), Some("application/vnd+json"));
        assert_eq!(header(&headers, "Authorization"), Some("Basic dXNlcjpwYXNz"));
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn test_normalize_authorization_quirk() {
        assert_eq!(normalize_authorization("abcdefghijklmnop"), "Bearer abcdefghijklmnop");
        assert_eq!(normalize_authorization("Bearer abcdefghijk"), "Bearer abcdefghijk");
        assert_eq!(normalize_authorization("token abcdefghijk"), "token abcdefghijk");
        assert_eq!(normalize_authorization("short"), "short");
    }

    #[test]
    fn test_max_token_field_names() {
        let config = ProviderConfig::new(ProviderKind::OpenAi, "m");
        let openai = ProviderKind::OpenAi.build_request_body(&config, &request());
        assert_eq!(openai["max_completion_tokens"], 512);
        assert!(openai.get("max_tokens").is_none());

        let compat = ProviderKind::OpenAiCompatible.build_request_body(&config, &request());
        assert_eq!(compat["max_tokens"], 512);

        let gemini = ProviderKind::Gemini.build_request_body(&config, &request());
        assert_eq!(gemini["generationConfig"]["maxOutputTokens"], 512);

        let ollama = ProviderKind::Ollama.build_request_body(&config, &request());
        assert_eq!(ollama["options"]["num_predict"], 512);
        assert_eq!(ollama["prompt"], "classify me");

        let embedded = ProviderKind::Embedded.build_request_body(&config, &request());
        assert_eq!(embedded["args"]["max_tokens"], 512);
        assert_eq!(embedded["args"]["prompt"], "sys\n\nclassify me");
    }

    #[test]
    fn test_image_parts() {
        let config = ProviderConfig::new(ProviderKind::OpenAi, "m");
        let image = ImageAttachment {
            data: vec![1, 2, 3],
            mime_type: "image/png".to_string(),
        };
        let req = CompletionRequest {
            image: Some(&image),
            ..request()
        };

        let openai = ProviderKind::OpenAi.build_request_body(&config, &req);
        assert_eq!(
            openai["messages"][1]["content"][0]["image_url"]["url"],
            "data:image/png;base64,AQID"
        );

        let anthropic = ProviderKind::Anthropic.build_request_body(&config, &req);
        assert_eq!(anthropic["messages"][0]["content"][0]["source"]["data"], "AQID");

        let ollama = ProviderKind::Ollama.build_request_body(&config, &req);
        assert_eq!(ollama["images"][0], "AQID");
    }

    #[test]
    fn test_extract_content_locations() {
        let openai = json!({"choices": [{"message": {"content": "{}"}}]});
        assert_eq!(ProviderKind::OpenAi.extract_content(&openai), Some(&json!("{}")));

        let anthropic = json!({"content": [{"type": "text", "text": "{}"}]});
        assert!(ProviderKind::Anthropic.extract_content(&anthropic).unwrap().is_array());

        let gemini = json!({"candidates": [{"content": {"parts": [{"text": "{}"}]}}]});
        assert!(ProviderKind::Gemini.extract_content(&gemini).is_some());

        let ollama = json!({"response": "{}", "done": true});
        assert_eq!(ProviderKind::Ollama.extract_content(&ollama), Some(&json!("{}")));

        let wrong = json!({"error": "nope"});
        assert!(ProviderKind::OpenAi.extract_content(&wrong).is_none());
        let null_content = json!({"choices": [{"message": {"content": null}}]});
        assert!(ProviderKind::OpenAi.extract_content(&null_content).is_none());
    }

    #[test]
    fn test_embedded_load_request() {
        let mut config = ProviderConfig::new(ProviderKind::Embedded, "");
        config.model_path = Some("/m/phi.gguf".to_string());
        config.gpu_layers = Some(33);
        assert_eq!(
            ProviderKind::Embedded.load_endpoint(&config).as_deref(),
            Some("http://127.0.0.1:8765/load")
        );
        let body = ProviderKind::Embedded.build_load_body(&config);
        assert_eq!(body["config"]["model_path"], "/m/phi.gguf");
        assert_eq!(body["config"]["gpu_layers"], 33);
        assert!(ProviderKind::OpenAi.load_endpoint(&config).is_none());
    }
}
