//! Pipeline agents
//!
//! Each stage of the pipeline is an agent: a small capability with an
//! identity, a health check and one primary operation. The supervisor depends
//! only on these capabilities, so deterministic and LLM-backed
//! implementations are interchangeable.

pub mod confidence;
pub mod executor;
pub mod language;
pub mod normalizer;
pub mod schema_retriever;
pub mod sql_corrector;
pub mod sql_generator;
pub mod sql_validator;
pub mod translator;
pub mod viz_router;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::models::{
    GeneratedSql, ProcessedQuery, QueryResult, RankedDescriptor, SessionContext, UserContext,
};

pub use confidence::ConfidenceScorer;
pub use executor::WarehouseExecutor;
pub use language::LanguageDetector;
pub use normalizer::TerminologyNormalizer;
pub use schema_retriever::SchemaRetriever;
pub use sql_corrector::SqlCorrector;
pub use sql_generator::TemplateSqlGenerator;
pub use sql_validator::SqlValidator;
pub use translator::QueryTranslator;
pub use viz_router::VisualizationRouter;

// ============================================================================
// Agent capability
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentHealth {
    pub status: AgentStatus,
    pub detail: Option<String>,
}

impl AgentHealth {
    pub fn healthy() -> Self {
        Self { status: AgentStatus::Healthy, detail: None }
    }

    pub fn degraded(detail: impl Into<String>) -> Self {
        Self { status: AgentStatus::Degraded, detail: Some(detail.into()) }
    }

    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self { status: AgentStatus::Unhealthy, detail: Some(detail.into()) }
    }
}

/// Common capability every pipeline agent exposes.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable short id (used as the registry key and in health reports)
    fn id(&self) -> &'static str;

    /// Human-readable name
    fn name(&self) -> &'static str;

    /// Deterministic agents are healthy by construction; agents wrapping a
    /// backend override this.
    async fn health(&self) -> AgentHealth {
        AgentHealth::healthy()
    }
}

// ============================================================================
// Primary-operation capabilities the supervisor depends on as trait objects
// ============================================================================

/// SQL generation: deterministic template generator by default, LLM-backed
/// behind the `llm-agents` feature.
#[async_trait]
pub trait GenerateSql: Agent {
    async fn generate(
        &self,
        query: &ProcessedQuery,
        schema_context: &[RankedDescriptor],
        session_context: Option<&SessionContext>,
    ) -> Result<GeneratedSql, PipelineError>;
}

/// Query execution under the read-only warehouse principal.
#[async_trait]
pub trait ExecuteQuery: Agent {
    async fn execute(
        &self,
        sql: &str,
        params: &[String],
        ctx: &UserContext,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, PipelineError>;
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct AgentReport {
    pub id: String,
    pub name: String,
    pub status: AgentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Registry of every agent in the pipeline, keyed by agent id; backs the
/// health endpoint.
#[derive(Default)]
pub struct AgentRegistry {
    agents: Vec<Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.push(agent);
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Agent>> {
        self.agents.iter().find(|a| a.id() == id)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub async fn report(&self) -> Vec<AgentReport> {
        let mut reports = Vec::with_capacity(self.agents.len());
        for agent in &self.agents {
            let health = agent.health().await;
            reports.push(AgentReport {
                id: agent.id().to_string(),
                name: agent.name().to_string(),
                status: health.status,
                detail: health.detail,
            });
        }
        reports
    }
}

// ============================================================================
// Pipeline error taxonomy
// ============================================================================

/// Classified execution failures; drives the corrector's rewrite choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorClass {
    ColumnNotFound,
    RelationNotFound,
    AmbiguousReference,
    SyntaxError,
    GroupByMissing,
    TypeMismatch,
    Timeout,
    Connection,
    PermissionDenied,
    InvalidLiteral,
    Unknown,
}

impl ExecutionErrorClass {
    /// Retryable without changing the SQL.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Connection)
    }

    /// Never corrected; the pipeline fails terminally.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::PermissionDenied | Self::InvalidLiteral | Self::Unknown)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    #[error("empty input")]
    EmptyInput,

    #[error("query intent could not be resolved: {0}")]
    UnresolvedIntent(String),

    #[error("schema retrieval backend unavailable: {0}")]
    SchemaUnavailable(String),

    #[error("query blocked: {0}")]
    ValidationBlocked(String),

    #[error("query blocked by policy")]
    PolicyDenied,

    #[error("query execution timed out after {0} ms")]
    ExecutionTimeout(u64),

    #[error("query execution failed: {message}")]
    ExecutionFailure { class: ExecutionErrorClass, message: String },

    #[error("correction budget exhausted after {0} attempts")]
    CorrectionExhausted(u32),

    #[error("request cancelled")]
    Cancelled,

    #[error("LLM backend unavailable: {0}")]
    LlmUnavailable(String),

    #[error("internal pipeline error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ExecutionTimeout(_) | Self::SchemaUnavailable(_) => true,
            Self::ExecutionFailure { class, .. } => class.is_transient(),
            _ => false,
        }
    }
}
