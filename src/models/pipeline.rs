//! In-flight pipeline artifacts
//!
//! These types are owned by the per-request supervisor and dropped when the
//! request terminates; none of them outlive a request except through the
//! session's conversation turns.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::context::{CalendarSystem, Locale};
use super::glossary::TermCategory;

// ============================================================================
// Language detection / translation
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageDetection {
    pub locale: Locale,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatedQuery {
    pub translated_utterance: String,
    pub preserved_terms: Vec<String>,
    pub source_locale: Locale,
    pub target_locale: Locale,
    pub confidence: f64,
}

// ============================================================================
// Normalization
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedMapping {
    pub original: String,
    pub canonical: String,
    pub sql_fragment: String,
    pub category: TermCategory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainContext {
    pub healthcare_terms: Vec<String>,
    pub accounting_terms: Vec<String>,
    pub general_terms: Vec<String>,
    pub candidate_tables: BTreeSet<String>,
    pub candidate_columns: BTreeSet<String>,
    pub sql_hints: Vec<String>,
}

impl DomainContext {
    pub fn is_empty(&self) -> bool {
        self.healthcare_terms.is_empty()
            && self.accounting_terms.is_empty()
            && self.general_terms.is_empty()
            && self.candidate_tables.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedQuery {
    pub original: String,
    pub normalized_english: String,
    pub detected_locale: Locale,
    pub locale_confidence: f64,
    /// Translator confidence decayed 0.02 per applied mapping, floored at 0.7.
    pub intent_confidence: f64,
    pub applied_mappings: Vec<AppliedMapping>,
    pub domain_context: DomainContext,
}

// ============================================================================
// SQL generation / validation
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedSql {
    pub sql: String,
    pub tables_used: BTreeSet<String>,
    pub parameterized: bool,
    #[serde(default)]
    pub params: Vec<String>,
    pub model_confidence: f64,
    pub explanation: String,
    pub attempt: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SqlValidationResult {
    pub valid: bool,
    pub blocked_reason: Option<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub sanitized_sql: Option<String>,
}

// ============================================================================
// Execution
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: usize,
    pub truncated: bool,
    pub execution_time_ms: u64,
}

// ============================================================================
// Visualization
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    KpiCard,
    Line,
    Bar,
    Pie,
    Scatter,
    Table,
}

impl ChartKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KpiCard => "kpi_card",
            Self::Line => "line",
            Self::Bar => "bar",
            Self::Pie => "pie",
            Self::Scatter => "scatter",
            Self::Table => "table",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumeralSystem {
    Western,
    EasternArabic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatHints {
    pub locale: Locale,
    pub numeral_system: NumeralSystem,
    pub thousands_separator: String,
    pub decimal_separator: String,
    pub currency_symbol: String,
    pub calendar: CalendarSystem,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AxesSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default)]
    pub y: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesSpec {
    pub name: String,
    pub column: String,
}

/// Pure chart description; rendering happens in the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualizationSpec {
    pub chart_kind: ChartKind,
    pub axes: AxesSpec,
    pub series: Vec<SeriesSpec>,
    pub format_hints: FormatHints,
}

// ============================================================================
// Confidence
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingDecision {
    Normal,
    Warning,
    Clarify,
}

impl RoutingDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Warning => "warning",
            Self::Clarify => "clarify",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfidenceFactors {
    pub intent_clarity: f64,
    pub schema_match_quality: f64,
    pub sql_complexity_penalty: f64,
    pub retry_penalty: f64,
    pub hallucination_risk: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceScore {
    pub score: f64,
    pub factors: ConfidenceFactors,
    pub routing_decision: RoutingDecision,
    pub needs_queue: bool,
}

/// Recognized analytical intents. `Lookup` is the unclassified fallback and
/// earns no clarity bonus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Kpi,
    Trend,
    Comparison,
    Breakdown,
    Lookup,
}

impl IntentKind {
    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Lookup)
    }
}

/// Optional knowledge-graph evidence attached by the scorer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceTrail {
    pub node_ids: Vec<String>,
    pub path: Vec<String>,
    pub relevance_scores: Vec<f64>,
    pub hop_count: u32,
}
