//! OpenAI-compatible chat-completions backend.
//!
//! Covers OpenRouter, Groq, and any other endpoint speaking the
//! `/chat/completions` dialect; the concrete service is just configuration.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::provider::ChatProvider;

#[derive(Clone)]
pub struct CompatibleProvider {
    client: reqwest::Client,
    provider_name: String,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl fmt::Debug for CompatibleProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompatibleProvider")
            .field("provider_name", &self.provider_name)
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ApiMessage<'a>; 2],
    max_tokens: u32,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

impl CompatibleProvider {
    #[must_use]
    pub fn new(
        provider_name: String,
        api_key: String,
        mut base_url: String,
        model: String,
        max_tokens: u32,
        timeout: Duration,
    ) -> Self {
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: crate::http::default_client(timeout),
            provider_name,
            api_key,
            base_url,
            model,
            max_tokens,
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn map_transport(error: reqwest::Error) -> LlmError {
        if error.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Http(error)
        }
    }
}

impl ChatProvider for CompatibleProvider {
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ApiMessage {
                    role: "system",
                    content: system,
                },
                ApiMessage {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(Self::map_transport)?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited);
        }

        let text = response.text().await.map_err(Self::map_transport)?;
        if !status.is_success() {
            tracing::error!(
                provider = %self.provider_name,
                %status,
                "chat completion request failed"
            );
            return Err(LlmError::Other(format!(
                "{} request failed (status {status})",
                self.provider_name
            )));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        if content.is_empty() {
            return Err(LlmError::EmptyResponse {
                provider: self.provider_name.clone(),
            });
        }
        Ok(content)
    }

    fn name(&self) -> &str {
        &self.provider_name
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn provider_for(url: &str) -> CompatibleProvider {
        CompatibleProvider::new(
            "groq".into(),
            "key".into(),
            url.into(),
            "llama-3.3-70b".into(),
            2048,
            Duration::from_secs(5),
        )
    }

    #[test]
    fn name_returns_configured_provider_name() {
        assert_eq!(provider_for("http://localhost").name(), "groq");
    }

    #[test]
    fn trailing_slashes_trimmed_from_base_url() {
        let p = provider_for("http://localhost///");
        assert_eq!(p.base_url, "http://localhost");
    }

    #[test]
    fn debug_redacts_api_key() {
        let p = CompatibleProvider::new(
            "groq".into(),
            "sk-secret-123".into(),
            "http://localhost".into(),
            "m".into(),
            100,
            Duration::from_secs(5),
        );
        let debug = format!("{p:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("sk-secret-123"));
    }

    #[tokio::test]
    async fn complete_returns_first_choice_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer key"))
            .and(body_partial_json(
                serde_json::json!({"model": "llama-3.3-70b"}),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "{\"contacts\": []}"}}]
            })))
            .mount(&server)
            .await;

        let p = provider_for(&server.uri());
        let body = p.complete("system", "user").await.unwrap();
        assert_eq!(body, "{\"contacts\": []}");
    }

    #[tokio::test]
    async fn complete_maps_429_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let p = provider_for(&server.uri());
        let err = p.complete("s", "u").await.unwrap_err();
        assert!(matches!(err, LlmError::RateLimited));
    }

    #[tokio::test]
    async fn complete_maps_server_error_to_other() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let p = provider_for(&server.uri());
        let err = p.complete("s", "u").await.unwrap_err();
        assert!(matches!(err, LlmError::Other(_)));
    }

    #[tokio::test]
    async fn complete_empty_choices_is_empty_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let p = provider_for(&server.uri());
        let err = p.complete("s", "u").await.unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse { provider } if provider == "groq"));
    }

    #[tokio::test]
    async fn complete_unreachable_host_errors() {
        let p = provider_for("http://127.0.0.1:1");
        assert!(p.complete("s", "u").await.is_err());
    }
}
