//! Classification adapter
//!
//! Turns one file's content into a normalized [`ClassificationResult`] using
//! whichever backend the [`ProviderConfig`] selects. Per-file failures never
//! escape [`ClassificationAdapter::classify`]: they degrade to the
//! `uncategorized` fallback with the error recorded in `raw`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use super::config::ProviderConfig;
use super::http_client::{HttpMethod, HttpRequest, HttpTransport, ReqwestTransport};
use super::json_parser::parse_model_output;
use super::prompts::{build_classification_prompt, CLASSIFY_SYSTEM_PROMPT};
use super::provider::{CompletionRequest, ImageAttachment};
use crate::error::{truncate_for_log, ClassifyError, OrganizerError, Result};
use crate::security::FALLBACK_CATEGORY;

/// Response bodies kept in error text are capped at this many characters
const MAX_ERROR_BODY_CHARS: usize = 500;

const CATEGORY_KEYS: [&str; 3] = ["category_path", "categoryPath", "category"];
const FILENAME_KEYS: [&str; 4] = [
    "suggested_filename",
    "suggestedFilename",
    "filename",
    "suggested_name",
];

/// Normalized output of any backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub category_path: String,
    pub suggested_filename: String,
    /// Provider, confidence and the parsed response, or the fallback error
    #[serde(default)]
    pub raw: Value,
}

impl ClassificationResult {
    /// Safe default: `uncategorized` plus the original name without extension.
    pub fn fallback(original_filename: &str, provider: &str, error: Option<&ClassifyError>) -> Self {
        let mut raw = json!({ "fallback": true, "provider": provider });
        if let Some(err) = error {
            raw["error"] = json!(err.to_string());
            raw["error_kind"] = json!(err.kind());
        }

        Self {
            category_path: FALLBACK_CATEGORY.to_string(),
            suggested_filename: original_stem(original_filename),
            raw,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.raw.get("fallback").and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn error(&self) -> Option<&str> {
        self.raw.get("error").and_then(Value::as_str)
    }

    pub fn confidence(&self) -> Option<f64> {
        self.raw.get("confidence").and_then(Value::as_f64)
    }
}

fn original_stem(original_filename: &str) -> String {
    Path::new(original_filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| original_filename.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LoadedModel {
    endpoint: String,
    model_path: String,
}

/// Sends classification requests through an injected [`HttpTransport`].
///
/// Owns the embedded runtime's "last loaded model" cache; call
/// [`invalidate`](Self::invalidate) when the provider or model path changes.
pub struct ClassificationAdapter {
    transport: Arc<dyn HttpTransport>,
    loaded_model: Mutex<Option<LoadedModel>>,
}

impl ClassificationAdapter {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            loaded_model: Mutex::new(None),
        }
    }

    /// Adapter using the shared reqwest client
    pub fn with_default_transport() -> Self {
        Self::new(Arc::new(ReqwestTransport::new()))
    }

    /// Forget which embedded model is loaded; the next call reloads it.
    pub fn invalidate(&self) {
        let mut loaded = self.loaded_model.lock().unwrap_or_else(PoisonError::into_inner);
        if loaded.take().is_some() {
            tracing::debug!("Embedded model cache invalidated");
        }
    }

    /// Model path the adapter believes is currently loaded, if any
    pub fn loaded_model_path(&self) -> Option<String> {
        self.loaded_model
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|m| m.model_path.clone())
    }

    /// Classify extracted text.
    ///
    /// Only an invalid `config` returns `Err`; every transport, status and
    /// parse failure yields the fallback result.
    pub async fn classify(
        &self,
        config: &ProviderConfig,
        text: &str,
        original_filename: &str,
        category_hints: &[String],
    ) -> Result<ClassificationResult> {
        config.validate()?;

        let prompt = build_classification_prompt(
            original_filename,
            Some(text),
            false,
            config.max_text_length,
            category_hints,
        );
        Ok(self.classify_prompt(config, &prompt, None, original_filename).await)
    }

    /// Classify an image with a vision-capable backend.
    pub async fn classify_image(
        &self,
        config: &ProviderConfig,
        image: &ImageAttachment,
        original_filename: &str,
        category_hints: &[String],
    ) -> Result<ClassificationResult> {
        config.validate()?;
        if !accepts_images(config) {
            return Err(OrganizerError::Config(format!(
                "{} is not configured for image input",
                config.provider.label()
            )));
        }

        let prompt = build_classification_prompt(
            original_filename,
            None,
            true,
            config.max_text_length,
            category_hints,
        );
        Ok(self
            .classify_prompt(config, &prompt, Some(image), original_filename)
            .await)
    }

    async fn classify_prompt(
        &self,
        config: &ProviderConfig,
        prompt: &str,
        image: Option<&ImageAttachment>,
        original_filename: &str,
    ) -> ClassificationResult {
        let provider = config.provider.label();
        let system = config
            .system_prompt
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(CLASSIFY_SYSTEM_PROMPT);

        let request = CompletionRequest {
            system,
            prompt,
            image,
        };

        let outcome = match self.complete(config, &request).await {
            Ok(value) => interpret(&value, provider, config),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(result) => {
                tracing::debug!(
                    provider,
                    file = original_filename,
                    category = %result.category_path,
                    "Classified file"
                );
                result
            }
            Err(err) => {
                tracing::warn!(
                    provider,
                    file = original_filename,
                    kind = err.kind(),
                    "Classification failed, using fallback: {}",
                    err
                );
                ClassificationResult::fallback(original_filename, provider, Some(&err))
            }
        }
    }

    /// One request/response round-trip, returning the parsed JSON payload.
    pub async fn complete(
        &self,
        config: &ProviderConfig,
        request: &CompletionRequest<'_>,
    ) -> std::result::Result<Value, ClassifyError> {
        let provider = config.provider;
        let label = provider.label();

        self.ensure_model_loaded(config).await?;

        let body = provider.build_request_body(config, request);
        let http_request = HttpRequest {
            url: provider.build_endpoint(config),
            method: HttpMethod::Post,
            headers: provider.build_headers(config),
            body: Some(body.to_string()),
        };

        let response = self
            .transport
            .send(http_request)
            .await
            .map_err(|e| ClassifyError::Network {
                provider: label.to_string(),
                message: config.redact(&e.to_string()),
            })?;

        if !response.is_success() {
            return Err(ClassifyError::Status {
                provider: label.to_string(),
                status: response.status,
                body: config.redact(&truncate_for_log(&response.body, MAX_ERROR_BODY_CHARS)),
            });
        }

        let envelope: Value =
            serde_json::from_str(&response.body).map_err(|e| ClassifyError::Envelope {
                provider: label.to_string(),
                detail: format!("response is not JSON ({})", e),
            })?;

        let content = provider
            .extract_content(&envelope)
            .ok_or_else(|| ClassifyError::Envelope {
                provider: label.to_string(),
                detail: format!(
                    "no content at the expected location: {}",
                    config.redact(&truncate_for_log(&response.body, MAX_ERROR_BODY_CHARS))
                ),
            })?;

        parse_model_output(content).ok_or_else(|| ClassifyError::Parse {
            provider: label.to_string(),
        })
    }

    /// Issue the embedded runtime's load call unless this model is already loaded.
    async fn ensure_model_loaded(&self, config: &ProviderConfig) -> std::result::Result<(), ClassifyError> {
        let provider = config.provider;
        let Some(endpoint) = provider.load_endpoint(config) else {
            return Ok(());
        };

        let wanted = LoadedModel {
            endpoint,
            model_path: config.model_path.clone().unwrap_or_default(),
        };

        if self.loaded_model.lock().unwrap_or_else(PoisonError::into_inner).as_ref() == Some(&wanted) {
            return Ok(());
        }

        tracing::info!(model_path = %wanted.model_path, "Loading embedded model");

        let response = self
            .transport
            .send(HttpRequest {
                url: wanted.endpoint.clone(),
                method: HttpMethod::Post,
                headers: provider.build_headers(config),
                body: Some(provider.build_load_body(config).to_string()),
            })
            .await
            .map_err(|e| ClassifyError::Network {
                provider: provider.label().to_string(),
                message: format!("model load failed: {}", config.redact(&e.to_string())),
            })?;

        if !response.is_success() {
            return Err(ClassifyError::Status {
                provider: provider.label().to_string(),
                status: response.status,
                body: config.redact(&truncate_for_log(&response.body, MAX_ERROR_BODY_CHARS)),
            });
        }

        *self.loaded_model.lock().unwrap_or_else(PoisonError::into_inner) = Some(wanted);
        Ok(())
    }
}

/// Whether image files can be sent to this backend at all
pub fn accepts_images(config: &ProviderConfig) -> bool {
    config.supports_vision && config.provider.supports_vision()
}

/// Pick the two result keys out of whatever object the model produced.
fn interpret(
    value: &Value,
    provider: &str,
    config: &ProviderConfig,
) -> std::result::Result<ClassificationResult, ClassifyError> {
    let object = match value {
        Value::Array(items) => items.iter().find(|v| v.is_object()),
        other if other.is_object() => Some(other),
        _ => None,
    }
    .ok_or_else(|| ClassifyError::Parse {
        provider: provider.to_string(),
    })?;

    let category = first_string(object, &CATEGORY_KEYS);
    let filename = first_string(object, &FILENAME_KEYS);

    if category.is_none() && filename.is_none() {
        return Err(ClassifyError::Envelope {
            provider: provider.to_string(),
            detail: "JSON has neither category_path nor suggested_filename".to_string(),
        });
    }

    Ok(ClassificationResult {
        category_path: category.unwrap_or_else(|| FALLBACK_CATEGORY.to_string()),
        suggested_filename: filename.unwrap_or_default(),
        raw: json!({
            "provider": provider,
            "model": config.model,
            "confidence": object.get("confidence").cloned().unwrap_or(Value::Null),
            "response": object,
        }),
    })
}

fn first_string(object: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| object.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::config::ProviderKind;
    use crate::test_support::ScriptedTransport;

    fn openai_config() -> ProviderConfig {
        ProviderConfig::new(ProviderKind::OpenAi, "gpt-4o-mini").with_api_key("sk-secret-key")
    }

    fn chat_reply(content: &str) -> String {
        json!({"choices": [{"message": {"role": "assistant", "content": content}}]}).to_string()
    }

    #[tokio::test]
    async fn test_classify_success() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_ok(
            200,
            &chat_reply(r#"{"category_path":"Finance/Invoices","suggested_filename":"acme_invoice_2024","confidence":0.9}"#),
        );
        let adapter = ClassificationAdapter::new(transport.clone());

        let result = adapter
            .classify(&openai_config(), "Invoice #1", "invoice.txt", &[])
            .await
            .unwrap();

        assert_eq!(result.category_path, "Finance/Invoices");
        assert_eq!(result.suggested_filename, "acme_invoice_2024");
        assert_eq!(result.confidence(), Some(0.9));
        assert!(!result.is_fallback());

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].url, "https://api.openai.com/v1/chat/completions");
        assert!(sent[0].body.as_deref().unwrap().contains("invoice.txt"));
    }

    #[tokio::test]
    async fn test_network_failure_falls_back_without_secret() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_err("connection refused for https://x?key=sk-secret-key");
        let adapter = ClassificationAdapter::new(transport);

        let result = adapter
            .classify(&openai_config(), "text", "report.final.pdf", &[])
            .await
            .unwrap();

        assert!(result.is_fallback());
        assert_eq!(result.category_path, "uncategorized");
        assert_eq!(result.suggested_filename, "report.final");
        assert_eq!(result.raw["error_kind"], "network");
        assert!(!result.error().unwrap().contains("sk-secret-key"));
    }

    #[tokio::test]
    async fn test_padded_key_never_reaches_error_text() {
        let transport = Arc::new(ScriptedTransport::with_responder(|request| {
            Err(OrganizerError::Transport(format!(
                "error sending request for url ({})",
                request.url
            )))
        }));
        let adapter = ClassificationAdapter::new(transport.clone());
        let config =
            ProviderConfig::new(ProviderKind::Gemini, "gemini-1.5-flash").with_api_key("AIzaSECRET\n");

        let result = adapter.classify(&config, "text", "a.txt", &[]).await.unwrap();

        assert!(transport.requests()[0].url.ends_with("?key=AIzaSECRET"));
        assert!(result.is_fallback());
        let error = result.error().unwrap();
        assert!(!error.contains("AIzaSECRET"), "leaked: {error}");
        assert!(error.contains("key=***"));
    }

    #[tokio::test]
    async fn test_status_error_names_provider_and_truncates_body() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_ok(429, &"x".repeat(2000));
        let adapter = ClassificationAdapter::new(transport);

        let result = adapter
            .classify(&openai_config(), "text", "a.txt", &[])
            .await
            .unwrap();

        let error = result.error().unwrap();
        assert!(error.contains("OpenAI"));
        assert!(error.contains("429"));
        assert!(error.len() < 700);
        assert_eq!(result.raw["error_kind"], "status");
    }

    #[tokio::test]
    async fn test_malformed_responses_fall_back() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_ok(200, "<html>not json</html>");
        transport.push_ok(200, r#"{"unexpected": true}"#);
        transport.push_ok(200, &chat_reply("I think it is a tax form."));
        let adapter = ClassificationAdapter::new(transport);
        let config = openai_config();

        let kinds: Vec<String> = {
            let mut kinds = Vec::new();
            for _ in 0..3 {
                let result = adapter.classify(&config, "t", "a.txt", &[]).await.unwrap();
                assert!(result.is_fallback());
                kinds.push(result.raw["error_kind"].as_str().unwrap().to_string());
            }
            kinds
        };
        assert_eq!(kinds, vec!["envelope", "envelope", "parse"]);
    }

    #[tokio::test]
    async fn test_think_preamble_and_alternate_keys() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_ok(
            200,
            &json!({"response": "<think>hmm {\"category\": \"no\"}</think>\n{\"category\":\"Health/Records\",\"filename\":\"lab_results\"}"}).to_string(),
        );
        let adapter = ClassificationAdapter::new(transport);
        let config = ProviderConfig::new(ProviderKind::Ollama, "qwen3");

        let result = adapter.classify(&config, "t", "scan.txt", &[]).await.unwrap();
        assert_eq!(result.category_path, "Health/Records");
        assert_eq!(result.suggested_filename, "lab_results");
    }

    #[tokio::test]
    async fn test_config_error_is_raised() {
        let transport = Arc::new(ScriptedTransport::new());
        let adapter = ClassificationAdapter::new(transport.clone());
        let config = ProviderConfig::new(ProviderKind::Embedded, "");

        let err = adapter.classify(&config, "t", "a.txt", &[]).await.unwrap_err();
        assert!(matches!(err, OrganizerError::Config(_)));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_embedded_model_loaded_once_until_invalidated() {
        let transport = Arc::new(ScriptedTransport::new());
        let reply = json!({"content": "{\"category_path\":\"work\",\"suggested_filename\":\"notes\"}"}).to_string();
        transport.push_ok(200, r#"{"ok":true}"#);
        transport.push_ok(200, &reply);
        transport.push_ok(200, &reply);
        transport.push_ok(200, r#"{"ok":true}"#);
        transport.push_ok(200, &reply);

        let adapter = ClassificationAdapter::new(transport.clone());
        let mut config = ProviderConfig::new(ProviderKind::Embedded, "");
        config.model_path = Some("/models/phi.gguf".to_string());

        adapter.classify(&config, "a", "a.txt", &[]).await.unwrap();
        adapter.classify(&config, "b", "b.txt", &[]).await.unwrap();
        assert_eq!(adapter.loaded_model_path().as_deref(), Some("/models/phi.gguf"));

        adapter.invalidate();
        assert!(adapter.loaded_model_path().is_none());
        let result = adapter.classify(&config, "c", "c.txt", &[]).await.unwrap();
        assert_eq!(result.category_path, "work");

        let urls: Vec<String> = transport.requests().into_iter().map(|r| r.url).collect();
        assert_eq!(
            urls,
            vec![
                "http://127.0.0.1:8765/load",
                "http://127.0.0.1:8765/infer",
                "http://127.0.0.1:8765/infer",
                "http://127.0.0.1:8765/load",
                "http://127.0.0.1:8765/infer",
            ]
        );
    }

    #[tokio::test]
    async fn test_model_path_change_triggers_reload() {
        let transport = Arc::new(ScriptedTransport::new());
        let reply = json!({"content": "{\"category_path\":\"a\",\"suggested_filename\":\"b\"}"}).to_string();
        for _ in 0..2 {
            transport.push_ok(200, "{}");
            transport.push_ok(200, &reply);
        }
        let adapter = ClassificationAdapter::new(transport.clone());
        let mut config = ProviderConfig::new(ProviderKind::Embedded, "");
        config.model_path = Some("/m/one.gguf".to_string());
        adapter.classify(&config, "x", "x.txt", &[]).await.unwrap();

        config.model_path = Some("/m/two.gguf".to_string());
        adapter.classify(&config, "x", "x.txt", &[]).await.unwrap();

        let loads = transport
            .requests()
            .iter()
            .filter(|r| r.url.ends_with("/load"))
            .count();
        assert_eq!(loads, 2);
    }

    #[tokio::test]
    async fn test_image_requires_vision_config() {
        let transport = Arc::new(ScriptedTransport::new());
        let adapter = ClassificationAdapter::new(transport);
        let image = ImageAttachment {
            data: vec![0xFF, 0xD8],
            mime_type: "image/jpeg".to_string(),
        };

        let config = openai_config();
        let err = adapter
            .classify_image(&config, &image, "photo.jpg", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, OrganizerError::Config(_)));
    }

    #[test]
    fn test_fallback_shape() {
        let result = ClassificationResult::fallback("notes.tar.gz", "Gemini", None);
        assert_eq!(result.category_path, "uncategorized");
        assert_eq!(result.suggested_filename, "notes.tar");
        assert!(result.is_fallback());
        assert!(result.error().is_none());
    }
}
