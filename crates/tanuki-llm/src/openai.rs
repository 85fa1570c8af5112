//! Hosted chat-completions backend (OpenAI and compatible gateways).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::OpenAiConfig;
use crate::http::{build_client, check_status, map_send_error};
use crate::{AiBackend, GenerateRequest, LlmError, LlmResult, Message};

const MAX_TOKENS: u32 = 1000;
const TEMPERATURE: f32 = 0.7;

/// Backend for the `/chat/completions` API.
#[derive(Clone)]
pub struct OpenAiBackend {
    client: Client,
    config: OpenAiConfig,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("config", &self.config)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiBackend {
    pub fn new(config: OpenAiConfig) -> LlmResult<Self> {
        if config.api_key.trim().is_empty() {
            return Err(LlmError::AuthError("OpenAI API key is empty".into()));
        }
        Ok(Self {
            client: build_client()?,
            config,
        })
    }

    fn build_body<'a>(
        &'a self,
        request: &'a GenerateRequest,
        messages: &'a [Message],
    ) -> ChatCompletionRequest<'a> {
        let mut chat = Vec::with_capacity(messages.len() + 1);
        chat.push(ChatMessage {
            role: "system",
            content: &request.system,
        });
        chat.extend(messages.iter().map(|m| ChatMessage {
            role: match m.role {
                crate::Role::User => "user",
                crate::Role::Assistant => "assistant",
            },
            content: &m.content,
        }));

        ChatCompletionRequest {
            model: &self.config.model,
            messages: chat,
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
        }
    }
}

#[async_trait]
impl AiBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn generate(&self, request: &GenerateRequest) -> LlmResult<String> {
        let messages = request.to_messages();
        let body = self.build_body(request, &messages);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url()))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_send_error)?;
        let response = check_status(response).await?;

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::MalformedResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::EmptyResponse(self.name().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(server: &MockServer) -> OpenAiBackend {
        let mut config = OpenAiConfig::new("sk-test");
        config.base_url = Some(format!("{}/v1", server.uri()));
        OpenAiBackend::new(config).unwrap()
    }

    #[test]
    fn test_empty_key_rejected() {
        let err = OpenAiBackend::new(OpenAiConfig::new("")).unwrap_err();
        assert!(matches!(err, LlmError::AuthError(_)));
    }

    #[tokio::test]
    async fn test_generate_sends_system_history_and_command() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-3.5-turbo",
                "max_tokens": 1000,
                "messages": [
                    {"role": "system", "content": "be bash"},
                    {"role": "user", "content": "pwd"},
                    {"role": "assistant", "content": "/root"},
                    {"role": "user", "content": "whoami"},
                ],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "root"}}],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = GenerateRequest::new("be bash", "whoami")
            .with_history(vec![Message::user("pwd"), Message::assistant("/root")]);
        let text = backend(&server).generate(&request).await.unwrap();
        assert_eq!(text, "root");
    }

    #[tokio::test]
    async fn test_no_choices_is_empty_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let err = backend(&server)
            .generate(&GenerateRequest::new("s", "ls"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse(_)));
    }

    #[tokio::test]
    async fn test_rate_limit_maps() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota"))
            .mount(&server)
            .await;

        let err = backend(&server)
            .generate(&GenerateRequest::new("s", "ls"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::RateLimited(_)));
    }
}
