use crate::config::BackendConfig;
use crate::error::LlmError;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum length for error content in error messages
const MAX_ERROR_CONTENT_LEN: usize = 200;

/// Rate limit retry configuration
pub(crate) const MAX_RETRIES: u32 = 3;
pub(crate) const INITIAL_BACKOFF_MS: u64 = 2000; // 2 seconds
pub(crate) const BACKOFF_MULTIPLIER: u64 = 2; // Exponential backoff

/// Token cap sent to generic gateways, which have no model-side default.
const GATEWAY_MAX_TOKENS: u32 = 900;

/// How the backend should shape its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    /// Free text.
    Text,
    /// A single JSON object; the backend's JSON mode is requested when the
    /// endpoint supports one.
    Json,
}

/// Seam between the pipeline and whatever produces text from a prompt.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Whether calls can be attempted at all.
    fn is_configured(&self) -> bool;

    /// Send `prompt` and return the raw text answer.
    async fn generate(&self, prompt: &str, mode: GenerationMode) -> Result<String, LlmError>;
}

/// Request/response dialect, picked from the endpoint URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiFlavor {
    /// OpenAI Responses API (`/v1/responses`).
    Responses,
    /// OpenAI-compatible chat completions (`/chat/completions`).
    ChatCompletions,
    /// Any other gateway taking `{prompt, max_tokens, temperature}`.
    Gateway,
}

impl ApiFlavor {
    pub fn detect(endpoint: &str) -> Self {
        let path = url::Url::parse(endpoint)
            .map(|u| u.path().trim_end_matches('/').to_ascii_lowercase())
            .unwrap_or_else(|_| endpoint.to_ascii_lowercase());
        if path.ends_with("/responses") {
            ApiFlavor::Responses
        } else if path.ends_with("/chat/completions") {
            ApiFlavor::ChatCompletions
        } else {
            ApiFlavor::Gateway
        }
    }
}

#[derive(Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: &'a str,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<ResponsesTextConfig>,
}

#[derive(Serialize)]
struct ResponsesTextConfig {
    format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Serialize)]
struct GatewayRequest<'a> {
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
}

/// HTTP backend client.
pub struct HttpTextGenerator {
    config: BackendConfig,
    client: reqwest::Client,
}

impl HttpTextGenerator {
    /// Build a client with the configured request timeout. Construction
    /// succeeds for an unconfigured backend; calls then fail fast.
    pub fn new(config: BackendConfig) -> Result<Self, LlmError> {
        let client = create_http_client(config.timeout_secs)?;
        Ok(Self { config, client })
    }

    fn credentials(&self) -> Result<(&str, &str), LlmError> {
        if !self.config.is_configured() {
            return Err(LlmError::NotConfigured);
        }
        match (self.config.endpoint.as_deref(), self.config.api_key.as_deref()) {
            (Some(endpoint), Some(key)) => Ok((endpoint.trim(), key.trim())),
            _ => Err(LlmError::NotConfigured),
        }
    }

    fn request_body(&self, flavor: ApiFlavor, prompt: &str, mode: GenerationMode) -> Result<Value, LlmError> {
        let json_format = || ResponseFormat {
            format_type: "json_object",
        };
        let body = match flavor {
            ApiFlavor::Responses => serde_json::to_value(ResponsesRequest {
                model: &self.config.model,
                input: prompt,
                temperature: 0.0,
                text: (mode == GenerationMode::Json).then(|| ResponsesTextConfig {
                    format: json_format(),
                }),
            }),
            ApiFlavor::ChatCompletions => serde_json::to_value(ChatRequest {
                model: &self.config.model,
                messages: vec![Message {
                    role: "user",
                    content: prompt,
                }],
                temperature: 0.0,
                response_format: (mode == GenerationMode::Json).then(json_format),
            }),
            ApiFlavor::Gateway => serde_json::to_value(GatewayRequest {
                prompt,
                max_tokens: GATEWAY_MAX_TOKENS,
                temperature: 0.0,
            }),
        };
        body.map_err(|e| LlmError::Transport(format!("Failed to encode request: {}", e)))
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    async fn generate(&self, prompt: &str, mode: GenerationMode) -> Result<String, LlmError> {
        let (endpoint, api_key) = self.credentials()?;
        let flavor = ApiFlavor::detect(endpoint);
        debug!(?flavor, ?mode, prompt_chars = prompt.len(), "Calling text-generation backend");

        let body = self.request_body(flavor, prompt, mode)?;
        let text = send_with_retry(
            &self.client,
            endpoint,
            api_key,
            &body,
            self.config.timeout_secs,
        )
        .await?;

        let content = match serde_json::from_str::<Value>(&text) {
            Ok(parsed) => extract_output_text(flavor, &parsed).unwrap_or(text),
            // Some gateways answer with plain text.
            Err(_) => text,
        };

        if content.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(content)
    }
}

/// Pull the generated text out of a successful response body.
pub(crate) fn extract_output_text(flavor: ApiFlavor, body: &Value) -> Option<String> {
    let non_blank = |s: &str| (!s.trim().is_empty()).then(|| s.to_string());
    match flavor {
        ApiFlavor::Responses => {
            if let Some(text) = body.get("output_text").and_then(Value::as_str).and_then(non_blank) {
                return Some(text);
            }
            let chunks: Vec<&str> = body
                .get("output")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(|item| item.get("content").and_then(Value::as_array))
                .flatten()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .filter(|t| !t.trim().is_empty())
                .collect();
            if !chunks.is_empty() {
                return Some(chunks.join("\n").trim().to_string());
            }
            body.get("text").and_then(Value::as_str).and_then(non_blank)
        }
        ApiFlavor::ChatCompletions => body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .and_then(non_blank),
        ApiFlavor::Gateway => body
            .get("text")
            .and_then(Value::as_str)
            .or_else(|| body.pointer("/choices/0/text").and_then(Value::as_str))
            .and_then(non_blank),
    }
}

/// Create a configured HTTP client for backend requests
pub(crate) fn create_http_client(timeout_secs: u64) -> Result<reqwest::Client, LlmError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| LlmError::Transport(format!("Failed to create HTTP client: {}", e)))
}

pub(crate) fn backoff_secs(retry_count: u32) -> u64 {
    (INITIAL_BACKOFF_MS * BACKOFF_MULTIPLIER.pow(retry_count.saturating_sub(1))) / 1000
}

/// Extract retry-after hint from a rate-limit body (if present)
fn parse_retry_after(text: &str) -> Option<u64> {
    let text_lower = text.to_lowercase();
    let pos = text_lower.find("retry")?;
    text_lower[pos..]
        .split_whitespace()
        .skip(1)
        .take(5)
        .filter_map(|word| {
            word.trim_matches(|c: char| !c.is_numeric())
                .parse::<u64>()
                .ok()
        })
        .find(|secs| *secs > 0 && *secs < 300)
}

fn is_retryable_network_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn map_network_error(err: reqwest::Error, timeout_secs: u64) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout(timeout_secs)
    } else {
        LlmError::Transport(err.to_string())
    }
}

/// Send a request with automatic retry on transient failures.
///
/// Handles:
/// - Network errors (timeout, connection failures)
/// - Rate limits (429)
/// - Server errors (5xx)
///
/// Returns the response text on success, or an error after all retries exhausted.
async fn send_with_retry<T: Serialize + ?Sized>(
    client: &reqwest::Client,
    endpoint: &str,
    api_key: &str,
    request_body: &T,
    timeout_secs: u64,
) -> Result<String, LlmError> {
    let mut retry_count = 0;

    loop {
        let response = match client
            .post(endpoint)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", api_key))
            .json(request_body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                if is_retryable_network_error(&err) && retry_count < MAX_RETRIES {
                    retry_count += 1;
                    warn!("Backend unreachable ({}), retry {}/{}", err, retry_count, MAX_RETRIES);
                    tokio::time::sleep(Duration::from_secs(backoff_secs(retry_count))).await;
                    continue;
                }
                return Err(map_network_error(err, timeout_secs));
            }
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(err) => {
                if is_retryable_network_error(&err) && retry_count < MAX_RETRIES {
                    retry_count += 1;
                    tokio::time::sleep(Duration::from_secs(backoff_secs(retry_count))).await;
                    continue;
                }
                return Err(map_network_error(err, timeout_secs));
            }
        };

        if status.is_success() {
            return Ok(text);
        }

        let retryable = status.as_u16() == 429 || status.is_server_error();
        if retryable && retry_count < MAX_RETRIES {
            retry_count += 1;
            let retry_after = if status.as_u16() == 429 {
                parse_retry_after(&text).unwrap_or_else(|| backoff_secs(retry_count))
            } else {
                backoff_secs(retry_count)
            };
            warn!(
                "Backend returned {}. Retrying in {}s (attempt {}/{})",
                status, retry_after, retry_count, MAX_RETRIES
            );
            tokio::time::sleep(Duration::from_secs(retry_after)).await;
            continue;
        }

        let message = match status.as_u16() {
            401 | 403 => "Backend rejected the credential.".to_string(),
            429 => format!("Rate limited after {} retries.", retry_count),
            _ => sanitize_api_response(&text),
        };
        return Err(LlmError::Api {
            status: status.as_u16(),
            message,
        });
    }
}

/// Sanitize API response content for error messages to prevent credential leakage.
fn sanitize_api_response(content: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "api_key",
        "apikey",
        "secret",
        "password",
        "credential",
        "bearer",
        "sk-",
    ];

    let truncated = truncate_str(content, MAX_ERROR_CONTENT_LEN);
    let lower = truncated.to_lowercase();
    if SECRET_PATTERNS.iter().any(|p| lower.contains(p)) {
        return "(response details redacted - may contain sensitive data)".to_string();
    }
    truncated.to_string()
}

/// Truncate a string for display (Unicode-safe)
pub(crate) fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn configured() -> BackendConfig {
        BackendConfig {
            endpoint: Some("https://api.openai.com/v1/chat/completions".to_string()),
            api_key: Some("sk-test".to_string()),
            ..BackendConfig::default()
        }
    }

    #[test]
    fn test_flavor_detection_from_endpoint_path() {
        assert_eq!(
            ApiFlavor::detect("https://api.openai.com/v1/responses"),
            ApiFlavor::Responses
        );
        assert_eq!(
            ApiFlavor::detect("https://api.openai.com/v1/chat/completions/"),
            ApiFlavor::ChatCompletions
        );
        assert_eq!(
            ApiFlavor::detect("https://llm.example.org/generate"),
            ApiFlavor::Gateway
        );
    }

    #[test]
    fn test_responses_output_prefers_output_text() {
        let body = json!({"output_text": "hello", "output": [{"content": [{"text": "ignored"}]}]});
        assert_eq!(
            extract_output_text(ApiFlavor::Responses, &body).as_deref(),
            Some("hello")
        );
    }

    #[test]
    fn test_responses_output_joins_content_chunks() {
        let body = json!({
            "output": [
                {"type": "reasoning"},
                {"content": [{"type": "output_text", "text": "first"}, {"text": "  "}]},
                {"content": [{"text": "second"}]}
            ]
        });
        assert_eq!(
            extract_output_text(ApiFlavor::Responses, &body).as_deref(),
            Some("first\nsecond")
        );
    }

    #[test]
    fn test_chat_and_gateway_output() {
        let chat = json!({"choices": [{"message": {"content": "chat answer"}}]});
        assert_eq!(
            extract_output_text(ApiFlavor::ChatCompletions, &chat).as_deref(),
            Some("chat answer")
        );

        let gateway = json!({"choices": [{"text": "gateway answer"}]});
        assert_eq!(
            extract_output_text(ApiFlavor::Gateway, &gateway).as_deref(),
            Some("gateway answer")
        );
        assert_eq!(extract_output_text(ApiFlavor::Gateway, &json!({"x": 1})), None);
    }

    #[test]
    fn test_json_mode_sets_response_format() {
        let generator = HttpTextGenerator::new(configured()).unwrap();
        let chat = generator
            .request_body(ApiFlavor::ChatCompletions, "p", GenerationMode::Json)
            .unwrap();
        assert_eq!(chat["response_format"]["type"], "json_object");
        assert_eq!(chat["messages"][0]["content"], "p");
        assert_eq!(chat["temperature"], 0.0);

        let plain = generator
            .request_body(ApiFlavor::Responses, "p", GenerationMode::Text)
            .unwrap();
        assert!(plain.get("text").is_none());
        assert_eq!(plain["input"], "p");

        let gateway = generator
            .request_body(ApiFlavor::Gateway, "p", GenerationMode::Json)
            .unwrap();
        assert_eq!(gateway["max_tokens"], GATEWAY_MAX_TOKENS);
    }

    #[tokio::test]
    async fn test_unconfigured_backend_fails_fast() {
        let generator = HttpTextGenerator::new(BackendConfig::default()).unwrap();
        assert!(!generator.is_configured());
        let err = generator
            .generate("hello", GenerationMode::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::NotConfigured));
    }

    #[test]
    fn test_retry_after_and_backoff() {
        assert_eq!(parse_retry_after("Please retry after 7 seconds"), Some(7));
        assert_eq!(parse_retry_after("slow down"), None);
        assert_eq!(backoff_secs(1), 2);
        assert_eq!(backoff_secs(2), 4);
        assert_eq!(backoff_secs(3), 8);
    }

    #[test]
    fn test_sanitize_redacts_secrets_and_truncates() {
        assert!(sanitize_api_response("invalid api_key sk-abc").contains("redacted"));
        let long = "x".repeat(500);
        assert_eq!(sanitize_api_response(&long).len(), MAX_ERROR_CONTENT_LEN);
        assert_eq!(truncate_str("héllo", 2), "hé");
    }
}
