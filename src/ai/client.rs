use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::util::truncate_chars;

/// Error bodies are echoed into logs and API errors; keep them short
const MAX_ERROR_BODY_CHARS: usize = 300;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("AI service is not configured (no API key)")]
    NotConfigured,
    #[error("AI request timed out after {0:?}")]
    Timeout(Duration),
    #[error("AI request failed: {0}")]
    Network(#[source] reqwest::Error),
    #[error("AI service returned {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("AI response could not be decoded: {0}")]
    Decode(String),
    #[error("AI response contained no text")]
    EmptyResponse,
    #[error("Insecure AI base URL: HTTPS required (except localhost for testing)")]
    InsecureBaseUrl,
}

impl AiError {
    /// Returns true if this error is transient and the request should be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            AiError::Timeout(_) | AiError::Network(_) => true,
            AiError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            AiError::NotConfigured
            | AiError::Decode(_)
            | AiError::EmptyResponse
            | AiError::InsecureBaseUrl => false,
        }
    }
}

// ============================================================================
// Chat completions wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

// ============================================================================
// Client
// ============================================================================

/// Client for an OpenAI-compatible `chat/completions` endpoint.
///
/// Every call is bounded by `timeout` and retried up to `max_retries` times
/// on transient failures (network, timeout, 429, 5xx). Anything else fails
/// on the first attempt.
#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    timeout: Duration,
    max_retries: u32,
    base_delay: Duration,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl LlmClient {
    pub fn new(
        base_url: &str,
        api_key: SecretString,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, AiError> {
        let base_url = base_url.trim_end_matches('/').to_owned();

        // The bearer token must not travel in clear text
        if !base_url.starts_with("https://") {
            let is_localhost = base_url.starts_with("http://127.0.0.1")
                || base_url.starts_with("http://localhost");
            if !is_localhost {
                return Err(AiError::InsecureBaseUrl);
            }
            tracing::warn!(base_url = %base_url, "Using non-HTTPS AI base URL (localhost only)");
        }
        if api_key.expose_secret().trim().is_empty() {
            return Err(AiError::NotConfigured);
        }

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(AiError::Network)?;

        Ok(Self {
            http,
            base_url,
            api_key,
            timeout,
            max_retries,
            base_delay: Duration::from_secs(1),
        })
    }

    /// Override the first backoff delay (doubles per retry).
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    fn headers(&self) -> Result<HeaderMap, AiError> {
        let mut headers = HeaderMap::new();
        let mut bearer =
            HeaderValue::from_str(&format!("Bearer {}", self.api_key.expose_secret()))
                .map_err(|_| AiError::NotConfigured)?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);
        Ok(headers)
    }

    /// One system + user exchange; returns the assistant's text.
    pub async fn complete(&self, model: &str, system: &str, user: &str) -> Result<String, AiError> {
        let mut retry_count = 0;

        loop {
            let attempt = tokio::time::timeout(self.timeout, self.send_once(model, system, user))
                .await
                .unwrap_or(Err(AiError::Timeout(self.timeout)));

            match attempt {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && retry_count < self.max_retries => {
                    let delay = self.base_delay.saturating_mul(1u32 << retry_count.min(16));
                    tracing::debug!(
                        error = %e,
                        retry = retry_count + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying AI request after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(&self, model: &str, system: &str, user: &str) -> Result<String, AiError> {
        let request = ChatRequest {
            model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.3,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await
            .map_err(AiError::Network)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::HttpStatus {
                status: status.as_u16(),
                body: truncate_chars(body.trim(), MAX_ERROR_BODY_CHARS).into_owned(),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AiError::Decode(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|text| text.trim().to_owned())
            .filter(|text| !text.is_empty())
            .ok_or(AiError::EmptyResponse)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::LlmClient;
    use secrecy::SecretString;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::ResponseTemplate;

    pub fn client_for(server: &wiremock::MockServer) -> LlmClient {
        LlmClient::new(
            &server.uri(),
            SecretString::from("test-key".to_string()),
            Duration::from_secs(5),
            2,
        )
        .unwrap()
        .with_base_delay(Duration::from_millis(1))
    }

    pub fn reply(text: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": text}}]
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{client_for, reply};
    use super::*;
    use wiremock::matchers::{any, body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_complete_sends_bearer_and_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({"model": "gpt-4o-mini"})))
            .respond_with(reply("  AI/ML \n"))
            .expect(1)
            .mount(&server)
            .await;

        let text = client_for(&server)
            .complete("gpt-4o-mini", "system", "user")
            .await
            .unwrap();
        assert_eq!(text, "AI/ML");
    }

    #[tokio::test]
    async fn test_complete_retries_transient_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(any())
            .respond_with(reply("ok"))
            .mount(&server)
            .await;

        let text = client_for(&server).complete("m", "s", "u").await.unwrap();
        assert_eq!(text, "ok");
    }

    #[tokio::test]
    async fn test_complete_gives_up_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .expect(3) // Initial request + 2 retries
            .mount(&server)
            .await;

        let err = client_for(&server).complete("m", "s", "u").await.unwrap_err();
        assert!(matches!(err, AiError::HttpStatus { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_complete_does_not_retry_client_errors() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server).complete("m", "s", "u").await.unwrap_err();
        assert!(matches!(err, AiError::HttpStatus { status: 400, ref body } if body == "bad request"));
    }

    #[tokio::test]
    async fn test_empty_choice_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
            .mount(&server)
            .await;

        let err = client_for(&server).complete("m", "s", "u").await.unwrap_err();
        assert!(matches!(err, AiError::EmptyResponse));
    }

    #[test]
    fn test_rejects_plain_http_remote() {
        let err = LlmClient::new(
            "http://api.example.com/v1",
            SecretString::from("k".to_string()),
            Duration::from_secs(1),
            0,
        )
        .unwrap_err();
        assert!(matches!(err, AiError::InsecureBaseUrl));
    }

    #[test]
    fn test_rejects_blank_key() {
        let err = LlmClient::new(
            "https://api.example.com/v1",
            SecretString::from("  ".to_string()),
            Duration::from_secs(1),
            0,
        )
        .unwrap_err();
        assert!(matches!(err, AiError::NotConfigured));
    }

    #[test]
    fn test_debug_redacts_key() {
        let client = LlmClient::new(
            "https://api.example.com/v1",
            SecretString::from("sk-very-secret".to_string()),
            Duration::from_secs(1),
            0,
        )
        .unwrap();
        let debug = format!("{:?}", client);
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
