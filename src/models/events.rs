//! Progressive stream events emitted to the client
//!
//! The event stream for one request is strictly ordered:
//! `thinking* sql_preview* (result | clarification | error)`.

use serde::{Deserialize, Serialize};

use super::pipeline::{EvidenceTrail, VisualizationSpec};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultData {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Thinking {
        message: String,
    },
    SqlPreview {
        sql: String,
    },
    Result {
        chart_kind: String,
        data: ResultData,
        visualization: VisualizationSpec,
        confidence: f64,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        evidence: Option<EvidenceTrail>,
    },
    Clarification {
        message: String,
        options: Vec<String>,
    },
    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_after: Option<u64>,
    },
}

impl StreamEvent {
    /// Terminal events end the stream; at most one is emitted per request.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result { .. } | Self::Clarification { .. } | Self::Error { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Thinking { .. } => "thinking",
            Self::SqlPreview { .. } => "sql_preview",
            Self::Result { .. } => "result",
            Self::Clarification { .. } => "clarification",
            Self::Error { .. } => "error",
        }
    }
}
