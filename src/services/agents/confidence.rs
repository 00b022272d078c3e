//! Confidence Scorer agent
//!
//! Combines deterministic signals into a gating score and the routing
//! decision that drives human-in-the-loop handling: `normal` emits the
//! result, `warning` emits it with a caveat and queues it for review,
//! `clarify` suppresses it and asks back.

use super::Agent;
use crate::models::{
    ConfidenceFactors, ConfidenceScore, GeneratedSql, IntentKind, ProcessedQuery, QueryResult,
    RoutingDecision,
};

/// Fixed availability term inside the clamp; without it the weighted factors
/// cap at 0.70 and the normal band would be unreachable for any real query.
const BASE_AVAILABILITY: f64 = 0.30;

const SHORT_INTENT_TOKENS: usize = 5;
const AMBIGUOUS_MATCH_COUNT: usize = 6;
const SLOW_EXECUTION_MS: u64 = 10_000;
const EXTREME_ROW_COUNT: usize = 50_000;

#[derive(Debug, Clone, Copy)]
pub struct ScoreInput<'a> {
    pub query: &'a ProcessedQuery,
    pub generated: Option<&'a GeneratedSql>,
    pub result: Option<&'a QueryResult>,
    pub intent: IntentKind,
    pub attempt_count: u32,
    pub validator_warnings: &'a [String],
    pub validation_passed: bool,
    /// Tables returned by schema retrieval
    pub retrieved_count: usize,
    /// Tables the generated SQL uses that retrieval also returned
    pub matched_tables: usize,
}

impl<'a> ScoreInput<'a> {
    pub fn pre_execution(
        query: &'a ProcessedQuery,
        intent: IntentKind,
        retrieved_count: usize,
    ) -> Self {
        Self {
            query,
            generated: None,
            result: None,
            intent,
            attempt_count: 0,
            validator_warnings: &[],
            validation_passed: false,
            retrieved_count,
            matched_tables: 0,
        }
    }
}

pub struct ConfidenceScorer {
    normal_threshold: f64,
    clarify_threshold: f64,
}

impl ConfidenceScorer {
    pub fn new(normal_threshold: f64, clarify_threshold: f64) -> Self {
        Self { normal_threshold, clarify_threshold }
    }

    pub fn score(&self, input: &ScoreInput<'_>) -> ConfidenceScore {
        let intent_clarity = intent_clarity(input);
        let schema_match_quality = schema_match_quality(input);
        let sql_complexity_penalty = input
            .generated
            .map(|g| complexity_penalty(&g.sql))
            .unwrap_or(0.0);
        let retry_penalty = (0.1 * input.attempt_count as f64).min(0.3);
        let hallucination_risk = hallucination_risk(input, sql_complexity_penalty);

        let aggregate = BASE_AVAILABILITY + 0.35 * intent_clarity + 0.35 * schema_match_quality
            - sql_complexity_penalty
            - retry_penalty
            - 0.25 * hallucination_risk;
        let score = 100.0 * aggregate.clamp(0.0, 1.0);

        let routing_decision = self.routing_for(score);

        ConfidenceScore {
            score,
            factors: ConfidenceFactors {
                intent_clarity,
                schema_match_quality,
                sql_complexity_penalty,
                retry_penalty,
                hallucination_risk,
            },
            routing_decision,
            needs_queue: routing_decision == RoutingDecision::Warning,
        }
    }

    pub fn routing_for(&self, score: f64) -> RoutingDecision {
        if score >= self.normal_threshold {
            RoutingDecision::Normal
        } else if score < self.clarify_threshold {
            RoutingDecision::Clarify
        } else {
            RoutingDecision::Warning
        }
    }
}

#[async_trait::async_trait]
impl Agent for ConfidenceScorer {
    fn id(&self) -> &'static str {
        "confidence_scorer"
    }

    fn name(&self) -> &'static str {
        "Confidence Scorer"
    }
}

// ============================================================================
// Factors
// ============================================================================

fn intent_clarity(input: &ScoreInput<'_>) -> f64 {
    let mut clarity = input.query.intent_confidence;

    let token_count = input.query.normalized_english.split_whitespace().count();
    if token_count < SHORT_INTENT_TOKENS {
        clarity -= 0.25;
    }
    if input.query.applied_mappings.is_empty() {
        clarity -= 0.20;
    }
    if input.intent.is_recognized() {
        clarity += 0.10;
    }

    clarity.clamp(0.0, 1.0)
}

fn schema_match_quality(input: &ScoreInput<'_>) -> f64 {
    let mut quality = if input.matched_tables == 0 {
        if input.query.domain_context.candidate_tables.is_empty() {
            0.0
        } else {
            0.2
        }
    } else {
        // saturates: every additional matched table helps less
        (0.85 + 0.05 * input.matched_tables as f64).min(1.0)
    };

    if input.retrieved_count >= AMBIGUOUS_MATCH_COUNT {
        quality -= 0.15;
    }
    if input
        .result
        .map(|r| r.execution_time_ms > SLOW_EXECUTION_MS)
        .unwrap_or(false)
    {
        quality -= 0.10;
    }

    quality.clamp(0.0, 1.0)
}

fn hallucination_risk(input: &ScoreInput<'_>, complexity: f64) -> f64 {
    let mut risk: f64 = 0.10;

    if let Some(result) = input.result {
        if result.row_count == 0 {
            risk += 0.25;
        } else if result.row_count >= EXTREME_ROW_COUNT {
            risk += 0.15;
        }
    }
    if input.query.intent_confidence < 0.8 {
        risk += 0.15;
    }
    if input.retrieved_count >= AMBIGUOUS_MATCH_COUNT {
        risk += 0.10;
    }
    if !input.validator_warnings.is_empty() {
        risk += 0.10;
    }
    if !input.validation_passed && complexity > 0.15 {
        risk += 0.20;
    }
    if input.validation_passed {
        risk -= 0.15;
    }

    risk.clamp(0.0, 1.0)
}

/// Weighted structural complexity of the statement, capped at 0.3.
fn complexity_penalty(sql: &str) -> f64 {
    let upper = sql.to_uppercase();
    let compact: String = upper.split_whitespace().collect::<Vec<_>>().join(" ");

    let joins = count_occurrences(&compact, " JOIN ");
    let subqueries = count_occurrences(&compact, "(SELECT");
    let windows = count_occurrences(&compact, " OVER ") + count_occurrences(&compact, " OVER(");
    let aggregations = ["SUM(", "COUNT(", "AVG(", "MIN(", "MAX("]
        .iter()
        .map(|kw| count_occurrences(&compact, kw))
        .sum::<usize>();
    let ctes = if compact.starts_with("WITH ") {
        count_occurrences(&compact, " AS (")
    } else {
        0
    };

    let penalty = 0.04 * joins as f64
        + 0.05 * subqueries as f64
        + 0.01 * aggregations as f64
        + 0.06 * windows as f64
        + 0.03 * ctes as f64;
    penalty.min(0.3)
}

fn count_occurrences(haystack: &str, needle: &str) -> usize {
    haystack.matches(needle).count()
}
