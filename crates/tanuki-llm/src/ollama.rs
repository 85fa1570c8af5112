//! Ollama-style local model backend (`POST /api/generate`).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::LlamaConfig;
use crate::http::{build_client, check_status, map_send_error};
use crate::{AiBackend, GenerateRequest, LlmError, LlmResult};

/// Backend for LLaMA-family models served by Ollama or a compatible server.
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    client: Client,
    config: LlamaConfig,
}

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: Option<String>,
}

impl OllamaBackend {
    pub fn new(config: LlamaConfig) -> LlmResult<Self> {
        Ok(Self {
            client: build_client()?,
            config,
        })
    }

    fn url(&self) -> String {
        format!("{}/api/generate", self.config.endpoint.trim_end_matches('/'))
    }
}

#[async_trait]
impl AiBackend for OllamaBackend {
    fn name(&self) -> &str {
        "llama"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn generate(&self, request: &GenerateRequest) -> LlmResult<String> {
        let body = GenerateBody {
            model: &self.config.model,
            prompt: request.render_prompt(),
            stream: false,
        };

        let response = self
            .client
            .post(self.url())
            .json(&body)
            .send()
            .await
            .map_err(map_send_error)?;
        let response = check_status(response).await?;

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::MalformedResponse(e.to_string()))?;

        parsed
            .response
            .ok_or_else(|| LlmError::EmptyResponse(self.name().to_string()))
    }
}
