//! LLM backend client
//!
//! One OpenAI-compatible chat client shared by the optional LLM-backed
//! agent variants (`llm-agents` feature) and the health surface. The
//! provider is deployment-static configuration; deterministic agents remain
//! the default pipeline.

mod client;

use std::sync::Arc;

use crate::services::agents::{Agent, AgentHealth};

pub use client::LlmClient;

/// Health surface for the configured LLM backend; registered only when the
/// backend is enabled in configuration.
pub struct LlmBackendAgent {
    client: Arc<LlmClient>,
}

impl LlmBackendAgent {
    pub fn new(client: Arc<LlmClient>) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Agent for LlmBackendAgent {
    fn id(&self) -> &'static str {
        "llm_backend"
    }

    fn name(&self) -> &'static str {
        "LLM Backend"
    }

    async fn health(&self) -> AgentHealth {
        match self.client.probe().await {
            Ok(()) => AgentHealth::healthy(),
            Err(e) => AgentHealth::unhealthy(e.to_string()),
        }
    }
}

/// LLM backend errors
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM backend disabled")]
    Disabled,

    #[error("no API key configured")]
    NoApiKey,

    #[error("LLM API error: {0}")]
    ApiError(String),

    #[error("LLM response parsing error: {0}")]
    ParseError(String),

    #[error("LLM timeout after {0}s")]
    Timeout(u64),

    #[error("LLM rate limited, retry after {0}s")]
    RateLimited(u64),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::RateLimited(_))
    }
}
