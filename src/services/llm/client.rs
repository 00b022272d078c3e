//! LLM Client - HTTP client for OpenAI-compatible APIs
//!
//! Compatible with OpenAI, Azure OpenAI, DeepSeek and other
//! OpenAI-compatible endpoints. Temperature is pinned to 0 so agent
//! variants stay as deterministic as the backend allows.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use super::LlmError;
use crate::config::LlmConfig;

pub struct LlmClient {
    http_client: Client,
    cfg: LlmConfig,
    permits: Arc<Semaphore>,
}

impl LlmClient {
    pub fn new(cfg: LlmConfig) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds.max(1)))
            .build()
            .expect("Failed to create LLM HTTP client");
        let permits = Arc::new(Semaphore::new(cfg.max_concurrent.max(1)));

        Self { http_client, cfg, permits }
    }

    pub fn is_configured(&self) -> bool {
        self.cfg.enabled && self.cfg.api_key.is_some()
    }

    /// Call the chat completion endpoint and return the raw content of the
    /// first choice. The payload is serialized as the user message.
    pub async fn chat_completion<P: Serialize>(
        &self,
        system_prompt: &str,
        payload: &P,
    ) -> Result<String, LlmError> {
        if !self.cfg.enabled {
            return Err(LlmError::Disabled);
        }
        let api_key = self.cfg.api_key.as_ref().ok_or(LlmError::NoApiKey)?;

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| LlmError::ApiError("LLM semaphore closed".to_string()))?;

        let user_prompt = serde_json::to_string_pretty(payload)
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        let chat_request = ChatCompletionRequest {
            model: self.cfg.model_name.clone(),
            messages: vec![
                ChatMessage { role: "system".to_string(), content: system_prompt.to_string() },
                ChatMessage { role: "user".to_string(), content: user_prompt },
            ],
            max_tokens: Some(self.cfg.max_tokens),
            temperature: Some(0.0),
            response_format: Some(ResponseFormat { r#type: "json_object".to_string() }),
        };

        let url = format!("{}/chat/completions", self.cfg.api_base.trim_end_matches('/'));
        tracing::debug!("Calling LLM API: {} with model {}", url, self.cfg.model_name);

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&chat_request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.cfg.timeout_seconds)
                } else {
                    LlmError::ApiError(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimited(retry_after));
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::ApiError(format!("API error {}: {}", status, error_text)));
        }

        let chat_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::ParseError("Empty response from LLM".to_string()))
    }

    /// Lightweight connectivity probe for the health surface.
    pub async fn probe(&self) -> Result<(), LlmError> {
        if !self.cfg.enabled {
            return Err(LlmError::Disabled);
        }
        let api_key = self.cfg.api_key.as_ref().ok_or(LlmError::NoApiKey)?;

        let url = format!("{}/models", self.cfg.api_base.trim_end_matches('/'));
        let response = self
            .http_client
            .get(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(10)
                } else {
                    LlmError::ApiError(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(LlmError::ApiError("Invalid API key".to_string()));
        }
        if !status.is_success() {
            return Err(LlmError::ApiError(format!("API error {}", status)));
        }

        Ok(())
    }
}

// ============================================================================
// OpenAI API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}
