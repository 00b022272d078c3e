//! Visualization Router agent
//!
//! Chooses a chart kind from the result shape and the query intent, and
//! attaches locale-aware format hints. Pure decision logic; nothing is
//! rendered here.

use once_cell::sync::Lazy;
use regex::Regex;

use super::Agent;
use crate::models::{
    AxesSpec, ChartKind, IntentKind, ProcessedQuery, QueryResult, SeriesSpec, UserContext,
    VisualizationSpec,
};
use crate::utils::locale::format_hints;

const MAX_BAR_CATEGORIES: usize = 12;
const SHAPE_SAMPLE_ROWS: usize = 32;

static DATE_VALUE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}(-\d{2})?([ T].*)?$").expect("valid date-value regex"));

static TEMPORAL_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(date|time|period|month|year|day|week)").expect("valid temporal-name regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnShape {
    Numeric,
    Temporal,
    Categorical,
}

pub struct VisualizationRouter {
    currency_symbol: String,
}

impl VisualizationRouter {
    pub fn new(currency_symbol: impl Into<String>) -> Self {
        Self { currency_symbol: currency_symbol.into() }
    }

    pub fn route(
        &self,
        result: &QueryResult,
        query: &ProcessedQuery,
        intent: IntentKind,
        ctx: &UserContext,
    ) -> VisualizationSpec {
        let shapes = classify_columns(result);
        let numeric: Vec<usize> = positions(&shapes, ColumnShape::Numeric);
        let temporal: Vec<usize> = positions(&shapes, ColumnShape::Temporal);
        let categorical: Vec<usize> = positions(&shapes, ColumnShape::Categorical);

        let chart_kind = if result.row_count == 1 && numeric.len() == 1 && result.columns.len() == 1
        {
            ChartKind::KpiCard
        } else if !temporal.is_empty() && !numeric.is_empty() {
            ChartKind::Line
        } else if categorical.len() == 1 && numeric.len() == 1 {
            let distinct = distinct_count(result, categorical[0]);
            if wants_share(query, intent) {
                ChartKind::Pie
            } else if distinct <= MAX_BAR_CATEGORIES {
                ChartKind::Bar
            } else {
                ChartKind::Table
            }
        } else if numeric.len() == 2 && categorical.is_empty() && temporal.is_empty() {
            ChartKind::Scatter
        } else {
            ChartKind::Table
        };

        let x = match chart_kind {
            ChartKind::Line => temporal.first(),
            ChartKind::Bar | ChartKind::Pie => categorical.first(),
            ChartKind::Scatter => numeric.first(),
            _ => None,
        }
        .map(|idx| result.columns[*idx].clone());

        let y: Vec<String> = match chart_kind {
            ChartKind::Scatter => numeric
                .iter()
                .skip(1)
                .map(|idx| result.columns[*idx].clone())
                .collect(),
            ChartKind::KpiCard | ChartKind::Table => Vec::new(),
            _ => numeric
                .iter()
                .map(|idx| result.columns[*idx].clone())
                .collect(),
        };

        let series = y
            .iter()
            .map(|column| SeriesSpec { name: column.clone(), column: column.clone() })
            .collect();

        VisualizationSpec {
            chart_kind,
            axes: AxesSpec { x, y },
            series,
            format_hints: format_hints(ctx.locale, ctx.calendar, &self.currency_symbol),
        }
    }
}

#[async_trait::async_trait]
impl Agent for VisualizationRouter {
    fn id(&self) -> &'static str {
        "visualization_router"
    }

    fn name(&self) -> &'static str {
        "Visualization Router"
    }
}

fn positions(shapes: &[ColumnShape], wanted: ColumnShape) -> Vec<usize> {
    shapes
        .iter()
        .enumerate()
        .filter(|(_, s)| **s == wanted)
        .map(|(i, _)| i)
        .collect()
}

fn classify_columns(result: &QueryResult) -> Vec<ColumnShape> {
    result
        .columns
        .iter()
        .enumerate()
        .map(|(idx, name)| classify_column(result, idx, name))
        .collect()
}

fn classify_column(result: &QueryResult, idx: usize, name: &str) -> ColumnShape {
    let sample = result.rows.iter().take(SHAPE_SAMPLE_ROWS);

    let mut saw_value = false;
    let mut all_numeric = true;
    let mut all_temporal = true;

    for row in sample {
        let Some(value) = row.get(idx) else { continue };
        match value {
            serde_json::Value::Null => continue,
            serde_json::Value::Number(_) => {
                saw_value = true;
                all_temporal = false;
            },
            serde_json::Value::String(s) => {
                saw_value = true;
                if !DATE_VALUE_RE.is_match(s) {
                    all_temporal = false;
                }
                all_numeric = false;
            },
            _ => {
                saw_value = true;
                all_numeric = false;
                all_temporal = false;
            },
        }
    }

    if saw_value && all_numeric {
        ColumnShape::Numeric
    } else if (saw_value && all_temporal) || (!saw_value && TEMPORAL_NAME_RE.is_match(name)) {
        ColumnShape::Temporal
    } else {
        ColumnShape::Categorical
    }
}

fn distinct_count(result: &QueryResult, idx: usize) -> usize {
    let mut seen: Vec<&serde_json::Value> = Vec::new();
    for row in &result.rows {
        if let Some(value) = row.get(idx)
            && !seen.contains(&value)
        {
            seen.push(value);
        }
    }
    seen.len()
}

fn wants_share(query: &ProcessedQuery, intent: IntentKind) -> bool {
    intent == IntentKind::Breakdown
        || ["share", "breakdown", "percentage", "distribution", "proportion"]
            .iter()
            .any(|kw| query.original.to_lowercase().contains(kw))
}
