//! SQL Generator agent
//!
//! Deterministic template generator: one SELECT (or WITH..SELECT) per
//! request, built only from the supplied schema context. Free-text literals
//! from the utterance are parameterized; computed date bounds are inlined.
//! An LLM-backed variant with the same contract sits behind the
//! `llm-agents` feature.

use async_trait::async_trait;
use chrono::Datelike;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{Agent, GenerateSql, PipelineError};
use crate::models::{
    GeneratedSql, IntentKind, ProcessedQuery, RankedDescriptor, SchemaDescriptor, SessionContext,
};

static MONTH_YEAR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(january|february|march|april|may|june|july|august|september|october|november|december)\s*,?\s+(\d{4})\b",
    )
    .expect("valid month/year regex")
});

static LAST_N_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\blast\s+(\d+)\s+(day|week|month|year)s?\b").expect("valid last-N regex")
});

static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(20\d{2})\b").expect("valid year regex"));

static QUOTED_LITERAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"'([^']+)'|"([^"]+)""#).expect("valid quoted-literal regex"));

/// Date constraint recognized in the utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DateRange {
    /// [start, end) with inclusive ISO start and exclusive ISO end
    Absolute { start: String, end: String },
    /// Sliding window relative to the current date
    LastInterval { n: u32, unit: &'static str },
    CurrentMonth,
    CurrentYear,
    Today,
}

impl DateRange {
    fn predicate(&self, column: &str) -> String {
        match self {
            Self::Absolute { start, end } => {
                format!("{col} >= '{start}' AND {col} < '{end}'", col = column)
            },
            Self::LastInterval { n, unit } => format!(
                "{col} >= DATE_SUB(CURRENT_DATE(), INTERVAL {n} {unit})",
                col = column,
                n = n,
                unit = unit
            ),
            Self::CurrentMonth => format!(
                "{col} >= DATE_FORMAT(CURRENT_DATE(), '%Y-%m-01')",
                col = column
            ),
            Self::CurrentYear => format!(
                "{col} >= DATE_FORMAT(CURRENT_DATE(), '%Y-01-01')",
                col = column
            ),
            Self::Today => format!("{col} = CURRENT_DATE()", col = column),
        }
    }
}

pub struct TemplateSqlGenerator;

impl TemplateSqlGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TemplateSqlGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for TemplateSqlGenerator {
    fn id(&self) -> &'static str {
        "sql_generator"
    }

    fn name(&self) -> &'static str {
        "SQL Generator"
    }
}

#[async_trait]
impl GenerateSql for TemplateSqlGenerator {
    async fn generate(
        &self,
        query: &ProcessedQuery,
        schema_context: &[RankedDescriptor],
        session_context: Option<&SessionContext>,
    ) -> Result<GeneratedSql, PipelineError> {
        if schema_context.is_empty() {
            return Err(PipelineError::UnresolvedIntent(
                "no schema context available for this question".to_string(),
            ));
        }

        let intent = classify_intent(query);
        let (descriptor, table_from_fallback) =
            choose_table(query, schema_context, session_context, intent)?;

        let mut confidence: f64 = 0.95;
        if table_from_fallback {
            confidence -= 0.15;
        }

        let (measure_expr, measure_alias, measure_from_fallback) = choose_measure(query, descriptor);
        if measure_from_fallback {
            confidence -= 0.10;
        }

        let temporal = descriptor.first_temporal().map(|c| c.name.clone());
        let date_range = parse_date_range(&query.normalized_english)
            .or_else(|| parse_date_range(&query.original.to_lowercase()));

        let mut predicates: Vec<String> = Vec::new();
        if let (Some(range), Some(column)) = (&date_range, &temporal) {
            predicates.push(range.predicate(column));
        } else if intent == IntentKind::Trend && date_range.is_some() && temporal.is_none() {
            confidence -= 0.05;
        }

        // quoted free-text literal -> parameterized equality filter
        let mut params: Vec<String> = Vec::new();
        if let Some(value) = quoted_literal(&query.original)
            && let Some(filter_column) = descriptor
                .first_category()
                .or_else(|| {
                    descriptor
                        .columns
                        .iter()
                        .find(|c| c.semantic_type == crate::models::SemanticType::Text)
                })
        {
            predicates.push(format!("{} = ?", filter_column.name));
            params.push(value);
        }

        let where_clause = if predicates.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", predicates.join(" AND "))
        };

        let sql = match intent {
            IntentKind::Kpi => format!(
                "SELECT {measure} AS {alias} FROM {table}{where_clause}",
                measure = measure_expr,
                alias = measure_alias,
                table = descriptor.table,
            ),
            IntentKind::Trend => {
                match &temporal {
                    Some(column) => format!(
                        "SELECT DATE_FORMAT({column}, '%Y-%m') AS period, {measure} AS {alias} \
                         FROM {table}{where_clause} GROUP BY period ORDER BY period",
                        column = column,
                        measure = measure_expr,
                        alias = measure_alias,
                        table = descriptor.table,
                    ),
                    // no temporal column: degrade to a categorical comparison
                    None => grouped_sql(descriptor, &measure_expr, &measure_alias, &where_clause)?,
                }
            },
            IntentKind::Comparison | IntentKind::Breakdown => {
                grouped_sql(descriptor, &measure_expr, &measure_alias, &where_clause)?
            },
            IntentKind::Lookup => {
                let projection: Vec<&str> = descriptor
                    .columns
                    .iter()
                    .take(8)
                    .map(|c| c.name.as_str())
                    .collect();
                format!(
                    "SELECT {cols} FROM {table}{where_clause} LIMIT 100",
                    cols = projection.join(", "),
                    table = descriptor.table,
                )
            },
        };

        let explanation = format!(
            "{} query over {} ({} mapping(s) applied)",
            intent_label(intent),
            descriptor.table,
            query.applied_mappings.len()
        );

        Ok(GeneratedSql {
            sql,
            tables_used: std::iter::once(descriptor.table.clone()).collect(),
            parameterized: !params.is_empty(),
            params,
            model_confidence: confidence.clamp(0.0, 1.0),
            explanation,
            attempt: 0,
        })
    }
}

// ============================================================================
// Intent classification
// ============================================================================

/// Classify the analytical intent from the raw and normalized utterances.
/// Normalization may have rewritten the aggregate phrasing into canonical
/// references, so both texts are inspected.
pub fn classify_intent(query: &ProcessedQuery) -> IntentKind {
    let text = format!(
        "{} {}",
        query.original.to_lowercase(),
        query.normalized_english.to_lowercase()
    );

    let trend = ["trend", "over time", "monthly", "per month", "by month", "growth"]
        .iter()
        .any(|kw| text.contains(kw))
        || LAST_N_RE.is_match(&text);
    if trend {
        return IntentKind::Trend;
    }

    if ["breakdown", "share", "distribution", "percentage", "split by", "proportion"]
        .iter()
        .any(|kw| text.contains(kw))
    {
        return IntentKind::Breakdown;
    }

    if ["compare", " vs ", "versus", "top "].iter().any(|kw| text.contains(kw))
        || text.contains(" by ")
    {
        return IntentKind::Comparison;
    }

    if ["total", "sum", "count", "how many", "average", "avg", "revenue"]
        .iter()
        .any(|kw| text.contains(kw))
    {
        return IntentKind::Kpi;
    }

    IntentKind::Lookup
}

fn intent_label(intent: IntentKind) -> &'static str {
    match intent {
        IntentKind::Kpi => "KPI",
        IntentKind::Trend => "Trend",
        IntentKind::Comparison => "Comparison",
        IntentKind::Breakdown => "Breakdown",
        IntentKind::Lookup => "Lookup",
    }
}

// ============================================================================
// Table / measure selection
// ============================================================================

/// Pick the table the query is about. Candidates nominated by the normalizer
/// win (preferring ones referenced by a SQL hint), then the session's data
/// source for elliptical follow-ups, then the top retrieval hit for a
/// recognized intent. A vague query with no anchor stays unresolved.
fn choose_table<'a>(
    query: &ProcessedQuery,
    schema_context: &'a [RankedDescriptor],
    session_context: Option<&SessionContext>,
    intent: IntentKind,
) -> Result<(&'a SchemaDescriptor, bool), PipelineError> {
    let candidates: Vec<&RankedDescriptor> = schema_context
        .iter()
        .filter(|r| {
            query
                .domain_context
                .candidate_tables
                .iter()
                .any(|t| t.eq_ignore_ascii_case(&r.descriptor.table))
        })
        .collect();

    if !candidates.is_empty() {
        let hinted = candidates.iter().find(|r| {
            query
                .domain_context
                .sql_hints
                .iter()
                .any(|hint| hint.contains(&r.descriptor.table))
        });
        let chosen = hinted.unwrap_or(&candidates[0]);
        return Ok((chosen.descriptor.as_ref(), false));
    }

    if let Some(session) = session_context {
        for table in session
            .data_source_hint
            .iter()
            .chain(session.last_tables.iter())
        {
            if let Some(hit) = schema_context
                .iter()
                .find(|r| r.descriptor.table.eq_ignore_ascii_case(table))
            {
                return Ok((hit.descriptor.as_ref(), true));
            }
        }
    }

    if intent != IntentKind::Lookup {
        if let Some(top) = schema_context.first() {
            return Ok((top.descriptor.as_ref(), true));
        }
    }

    Err(PipelineError::UnresolvedIntent(
        "the question does not name any known data entity".to_string(),
    ))
}

/// Aggregation expression for the chosen table: a nominated measure column,
/// a glossary SQL hint, the table's first numeric column, then COUNT(*).
/// Returns (expression, alias, fell_back_to_count).
fn choose_measure(query: &ProcessedQuery, descriptor: &SchemaDescriptor) -> (String, String, bool) {
    for qualified in &query.domain_context.candidate_columns {
        if let Some((table, column)) = qualified.rsplit_once('.')
            && table.eq_ignore_ascii_case(&descriptor.table)
            && descriptor.column(column).is_some()
        {
            return (format!("SUM({}.{})", descriptor.table, column), column.to_string(), false);
        }
    }

    for hint in &query.domain_context.sql_hints {
        if hint.contains(&descriptor.table) {
            return (hint.clone(), "metric_value".to_string(), false);
        }
    }

    if let Some(column) = descriptor.first_numeric() {
        return (
            format!("SUM({}.{})", descriptor.table, column.name),
            column.name.clone(),
            false,
        );
    }

    ("COUNT(*)".to_string(), "row_count".to_string(), true)
}

fn grouped_sql(
    descriptor: &SchemaDescriptor,
    measure_expr: &str,
    measure_alias: &str,
    where_clause: &str,
) -> Result<String, PipelineError> {
    let dimension = descriptor
        .first_category()
        .map(|c| c.name.clone())
        .ok_or_else(|| {
            PipelineError::UnresolvedIntent(format!(
                "table {} has no categorical column to group by",
                descriptor.table
            ))
        })?;

    Ok(format!(
        "SELECT {dim}, {measure} AS {alias} FROM {table}{where_clause} \
         GROUP BY {dim} ORDER BY {alias} DESC LIMIT 50",
        dim = dimension,
        measure = measure_expr,
        alias = measure_alias,
        table = descriptor.table,
    ))
}

// ============================================================================
// Date phrase parsing
// ============================================================================

fn month_number(name: &str) -> u32 {
    match name.to_lowercase().as_str() {
        "january" => 1,
        "february" => 2,
        "march" => 3,
        "april" => 4,
        "may" => 5,
        "june" => 6,
        "july" => 7,
        "august" => 8,
        "september" => 9,
        "october" => 10,
        "november" => 11,
        _ => 12,
    }
}

fn parse_date_range(text: &str) -> Option<DateRange> {
    if let Some(caps) = MONTH_YEAR_RE.captures(text) {
        let month = month_number(&caps[1]);
        let year: i32 = caps[2].parse().ok()?;
        let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
        return Some(DateRange::Absolute {
            start: format!("{:04}-{:02}-01", year, month),
            end: format!("{:04}-{:02}-01", next_year, next_month),
        });
    }

    if let Some(caps) = LAST_N_RE.captures(text) {
        let n: u32 = caps[1].parse().ok()?;
        let unit = match caps[2].to_lowercase().as_str() {
            "day" => "DAY",
            "week" => "WEEK",
            "year" => "YEAR",
            _ => "MONTH",
        };
        return Some(DateRange::LastInterval { n, unit });
    }

    if text.contains("this month") {
        return Some(DateRange::CurrentMonth);
    }
    if text.contains("this year") {
        return Some(DateRange::CurrentYear);
    }
    if text.contains("today") {
        return Some(DateRange::Today);
    }

    if let Some(caps) = YEAR_RE.captures(text) {
        let year: i32 = caps[1].parse().ok()?;
        // sanity bound so stray codes are not read as years
        if (2000..=chrono::Utc::now().year() + 10).contains(&year) {
            return Some(DateRange::Absolute {
                start: format!("{:04}-01-01", year),
                end: format!("{:04}-01-01", year + 1),
            });
        }
    }

    None
}

fn quoted_literal(text: &str) -> Option<String> {
    QUOTED_LITERAL_RE.captures(text).map(|caps| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    })
}

// ============================================================================
// LLM-backed variant
// ============================================================================

#[cfg(feature = "llm-agents")]
pub use llm_variant::LlmSqlGenerator;

#[cfg(feature = "llm-agents")]
mod llm_variant {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::json;

    use super::super::{Agent, AgentHealth, GenerateSql, PipelineError};
    use crate::models::{GeneratedSql, ProcessedQuery, RankedDescriptor, SessionContext};
    use crate::services::llm::LlmClient;

    const SYSTEM_PROMPT: &str = "You translate analytical questions into a single read-only SQL \
        statement for a MySQL-protocol warehouse. Use only the tables and columns listed in the \
        provided schema context. Reply as JSON: {\"sql\": string, \"explanation\": string, \
        \"confidence\": number between 0 and 1}. The statement must start with SELECT or WITH.";

    #[derive(Debug, Deserialize)]
    struct LlmSqlResponse {
        sql: String,
        #[serde(default)]
        explanation: String,
        #[serde(default)]
        confidence: f64,
    }

    /// Generator backed by an OpenAI-compatible chat API. Honors the exact
    /// contract of the deterministic generator; its output still passes
    /// through the validator before anything executes.
    pub struct LlmSqlGenerator {
        client: Arc<LlmClient>,
    }

    impl LlmSqlGenerator {
        pub fn new(client: Arc<LlmClient>) -> Self {
            Self { client }
        }
    }

    #[async_trait]
    impl Agent for LlmSqlGenerator {
        fn id(&self) -> &'static str {
            "sql_generator"
        }

        fn name(&self) -> &'static str {
            "SQL Generator (LLM)"
        }

        async fn health(&self) -> AgentHealth {
            if self.client.is_configured() {
                AgentHealth::healthy()
            } else {
                AgentHealth::unhealthy("no LLM provider configured")
            }
        }
    }

    #[async_trait]
    impl GenerateSql for LlmSqlGenerator {
        async fn generate(
            &self,
            query: &ProcessedQuery,
            schema_context: &[RankedDescriptor],
            session_context: Option<&SessionContext>,
        ) -> Result<GeneratedSql, PipelineError> {
            if schema_context.is_empty() {
                return Err(PipelineError::UnresolvedIntent(
                    "no schema context available for this question".to_string(),
                ));
            }

            let tables: Vec<serde_json::Value> = schema_context
                .iter()
                .map(|r| {
                    json!({
                        "table": r.descriptor.table,
                        "columns": r.descriptor.columns.iter().map(|c| {
                            json!({"name": c.name, "type": c.semantic_type, "description": c.description})
                        }).collect::<Vec<_>>(),
                    })
                })
                .collect();

            let payload = json!({
                "question": query.normalized_english,
                "schema_context": tables,
                "previous_sql": session_context.and_then(|s| s.last_sql.clone()),
            });

            let content = self
                .client
                .chat_completion(SYSTEM_PROMPT, &payload)
                .await
                .map_err(|e| PipelineError::LlmUnavailable(e.to_string()))?;

            let parsed: LlmSqlResponse = serde_json::from_str(&content).map_err(|e| {
                PipelineError::LlmUnavailable(format!("malformed generator response: {}", e))
            })?;

            let tables_used = schema_context
                .iter()
                .filter(|r| parsed.sql.contains(&r.descriptor.table))
                .map(|r| r.descriptor.table.clone())
                .collect();

            Ok(GeneratedSql {
                sql: parsed.sql,
                tables_used,
                parameterized: false,
                params: Vec::new(),
                model_confidence: parsed.confidence.clamp(0.0, 1.0),
                explanation: parsed.explanation,
                attempt: 0,
            })
        }
    }
}
