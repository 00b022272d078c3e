//! SQL Corrector agent
//!
//! Diagnoses execution errors and proposes a bounded rewrite: column
//! similarity substitution, schema qualification, table qualification for
//! ambiguous references, GROUP BY repair, and whitespace/semicolon
//! normalization for syntax errors. Transient classes retry unchanged;
//! permission and literal errors are never corrected.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{Agent, ExecutionErrorClass, PipelineError};
use crate::models::{GeneratedSql, RankedDescriptor};

static UNKNOWN_COLUMN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)unknown column '([^']+)'|column "([^"]+)" does not exist"#)
        .expect("valid unknown-column regex")
});

static UNKNOWN_TABLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)table '([^']+)' doesn't exist|relation "([^"]+)" does not exist"#)
        .expect("valid unknown-table regex")
});

static AMBIGUOUS_COLUMN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)column '([^']+)'[^']*is ambiguous"#).expect("valid ambiguous-column regex")
});

static GROUP_BY_COLUMN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)'([^']+)'[^']*(?:isn't in group by|not in group by)"#)
        .expect("valid group-by regex")
});

// MySQL-style wording places the offending column after the phrase
static GROUP_BY_COLUMN_AFTER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:not in group by|group by clause)[^']*'([^']+)'"#)
        .expect("valid group-by-after regex")
});

static TYPE_MISMATCH_COLUMN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)for column\s+'([^']+)'|column\s+'([^']+)'|(?:comparison|conversion|mismatch)\s+for\s+([A-Za-z_][A-Za-z0-9_.]*)"#,
    )
    .expect("valid type-mismatch column regex")
});

pub struct SqlCorrector;

impl SqlCorrector {
    pub fn new() -> Self {
        Self
    }

    /// Produce a corrected attempt or fail terminally. The retry budget is
    /// enforced by the supervisor; this agent always returns `attempt + 1`.
    pub fn correct(
        &self,
        failing: &GeneratedSql,
        class: ExecutionErrorClass,
        message: &str,
        schema_context: &[RankedDescriptor],
    ) -> Result<GeneratedSql, PipelineError> {
        if class.is_terminal() {
            return Err(PipelineError::ExecutionFailure {
                class,
                message: message.to_string(),
            });
        }

        if class.is_transient() {
            // retry unchanged
            return Ok(next_attempt(failing, failing.sql.clone(), "transient error, retrying"));
        }

        let rewritten = match class {
            ExecutionErrorClass::ColumnNotFound => {
                substitute_similar_column(failing, message, schema_context)
            },
            ExecutionErrorClass::RelationNotFound => {
                qualify_or_substitute_table(failing, message, schema_context)
            },
            ExecutionErrorClass::AmbiguousReference => qualify_ambiguous_column(failing, message),
            ExecutionErrorClass::GroupByMissing => repair_group_by(failing, message),
            ExecutionErrorClass::SyntaxError => Some(normalize_syntax(&failing.sql)),
            ExecutionErrorClass::TypeMismatch => quote_bare_dates(failing, message),
            _ => None,
        };

        match rewritten {
            Some(sql) if sql != failing.sql => {
                tracing::debug!(
                    "Corrected attempt {} ({:?}): {}",
                    failing.attempt + 1,
                    class,
                    sql
                );
                Ok(next_attempt(failing, sql, class_label(class)))
            },
            _ => Err(PipelineError::ExecutionFailure {
                class,
                message: format!("no applicable correction: {}", message),
            }),
        }
    }
}

impl Default for SqlCorrector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Agent for SqlCorrector {
    fn id(&self) -> &'static str {
        "sql_corrector"
    }

    fn name(&self) -> &'static str {
        "SQL Corrector"
    }
}

fn next_attempt(failing: &GeneratedSql, sql: String, note: &str) -> GeneratedSql {
    GeneratedSql {
        sql,
        tables_used: failing.tables_used.clone(),
        parameterized: failing.parameterized,
        params: failing.params.clone(),
        model_confidence: failing.model_confidence,
        explanation: format!("{} (correction: {})", failing.explanation, note),
        attempt: failing.attempt + 1,
    }
}

fn class_label(class: ExecutionErrorClass) -> &'static str {
    match class {
        ExecutionErrorClass::ColumnNotFound => "column substitution",
        ExecutionErrorClass::RelationNotFound => "relation qualification",
        ExecutionErrorClass::AmbiguousReference => "column qualification",
        ExecutionErrorClass::GroupByMissing => "group by repair",
        ExecutionErrorClass::SyntaxError => "syntax normalization",
        ExecutionErrorClass::TypeMismatch => "literal quoting",
        _ => "retry",
    }
}

// ============================================================================
// Rewrites
// ============================================================================

fn substitute_similar_column(
    failing: &GeneratedSql,
    message: &str,
    schema_context: &[RankedDescriptor],
) -> Option<String> {
    let offending = capture_any(&UNKNOWN_COLUMN_RE, message)?;
    // strip a table qualifier if the driver reported one
    let offending_column = offending.rsplit('.').next().unwrap_or(&offending);

    let mut best: Option<(&str, f64)> = None;
    for ranked in schema_context {
        if !failing.tables_used.is_empty()
            && !failing
                .tables_used
                .iter()
                .any(|t| t.eq_ignore_ascii_case(&ranked.descriptor.table))
        {
            continue;
        }
        for column in &ranked.descriptor.columns {
            let score = bigram_similarity(offending_column, &column.name);
            if score > best.map(|(_, s)| s).unwrap_or(0.0) {
                best = Some((column.name.as_str(), score));
            }
        }
    }

    let (replacement, score) = best?;
    if score < 0.3 {
        return None;
    }

    let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(offending_column))).ok()?;
    Some(pattern.replace_all(&failing.sql, replacement).into_owned())
}

fn qualify_or_substitute_table(
    failing: &GeneratedSql,
    message: &str,
    schema_context: &[RankedDescriptor],
) -> Option<String> {
    let offending = capture_any(&UNKNOWN_TABLE_RE, message)?;
    let offending_table = offending.rsplit('.').next().unwrap_or(&offending);

    // exact name known but unqualified: qualify it with its schema
    if let Some(hit) = schema_context
        .iter()
        .find(|r| r.descriptor.table.eq_ignore_ascii_case(offending_table))
        && !hit.descriptor.schema.is_empty()
    {
        let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(offending_table))).ok()?;
        return Some(
            pattern
                .replace_all(&failing.sql, hit.descriptor.qualified_name())
                .into_owned(),
        );
    }

    // otherwise substitute the most similar known table
    let mut best: Option<(String, f64)> = None;
    for ranked in schema_context {
        let score = bigram_similarity(offending_table, &ranked.descriptor.table);
        if score > best.as_ref().map(|(_, s)| *s).unwrap_or(0.0) {
            best = Some((ranked.descriptor.table.clone(), score));
        }
    }

    let (replacement, score) = best?;
    if score < 0.3 {
        return None;
    }
    let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(offending_table))).ok()?;
    Some(pattern.replace_all(&failing.sql, replacement.as_str()).into_owned())
}

fn qualify_ambiguous_column(failing: &GeneratedSql, message: &str) -> Option<String> {
    let offending = capture_any(&AMBIGUOUS_COLUMN_RE, message)?;
    let table = failing.tables_used.iter().next()?;

    let pattern = Regex::new(&format!(r"(?P<pre>^|[^.\w]){}\b", regex::escape(&offending))).ok()?;
    Some(
        pattern
            .replace_all(&failing.sql, format!("${{pre}}{}.{}", table, offending))
            .into_owned(),
    )
}

fn repair_group_by(failing: &GeneratedSql, message: &str) -> Option<String> {
    let captured = capture_any(&GROUP_BY_COLUMN_RE, message)
        .or_else(|| capture_any(&GROUP_BY_COLUMN_AFTER_RE, message))?;
    // qualified reports ('db.t.col') repair by the bare column name
    let offending = captured
        .rsplit('.')
        .next()
        .unwrap_or(captured.as_str())
        .to_string();
    let sql = &failing.sql;
    let upper = sql.to_uppercase();

    if let Some(pos) = upper.find("GROUP BY") {
        // extend the existing GROUP BY list
        let after = &sql[pos + "GROUP BY".len()..];
        let clause_end = after
            .to_uppercase()
            .find(" ORDER BY")
            .or_else(|| after.to_uppercase().find(" LIMIT"))
            .map(|i| pos + "GROUP BY".len() + i)
            .unwrap_or(sql.len());
        let mut rewritten = sql.clone();
        rewritten.insert_str(clause_end, &format!(", {}", offending));
        return Some(rewritten);
    }

    // add a GROUP BY before ORDER BY / LIMIT, or at the end
    let insert_at = upper
        .find(" ORDER BY")
        .or_else(|| upper.find(" LIMIT"))
        .unwrap_or(sql.len());
    let mut rewritten = sql.clone();
    rewritten.insert_str(insert_at, &format!(" GROUP BY {}", offending));
    Some(rewritten)
}

fn normalize_syntax(sql: &str) -> String {
    sql.trim()
        .trim_end_matches(';')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Quote the bare date literal compared against the column the error names.
/// Without a named column there is nothing to anchor the rewrite to, and the
/// class is terminal.
fn quote_bare_dates(failing: &GeneratedSql, message: &str) -> Option<String> {
    let captured = capture_any(&TYPE_MISMATCH_COLUMN_RE, message)?;
    let column = captured
        .rsplit('.')
        .next()
        .unwrap_or(captured.as_str())
        .to_string();

    let pattern = Regex::new(&format!(
        r"\b{}\s*(=|>=|<=|>|<)\s*(\d{{4}}-\d{{2}}-\d{{2}})\b",
        regex::escape(&column)
    ))
    .ok()?;
    if !pattern.is_match(&failing.sql) {
        return None;
    }
    Some(
        pattern
            .replace_all(&failing.sql, format!("{} ${{1}} '${{2}}'", column))
            .into_owned(),
    )
}

fn capture_any(re: &Regex, message: &str) -> Option<String> {
    re.captures(message).and_then(|caps| {
        (1..caps.len())
            .filter_map(|i| caps.get(i))
            .next()
            .map(|m| m.as_str().to_string())
    })
}

/// Dice coefficient over character bigrams, case-insensitive.
fn bigram_similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    if a == b {
        return 1.0;
    }
    let bigrams = |s: &str| -> Vec<(char, char)> {
        let chars: Vec<char> = s.chars().collect();
        chars.windows(2).map(|w| (w[0], w[1])).collect()
    };
    let a_grams = bigrams(&a);
    let mut b_grams = bigrams(&b);
    if a_grams.is_empty() || b_grams.is_empty() {
        return 0.0;
    }

    let mut matches = 0usize;
    for gram in &a_grams {
        if let Some(pos) = b_grams.iter().position(|g| g == gram) {
            b_grams.swap_remove(pos);
            matches += 1;
        }
    }
    (2.0 * matches as f64) / (a_grams.len() + bigrams(&b).len()) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnDescriptor, SchemaDescriptor, SemanticType};
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn context() -> Vec<RankedDescriptor> {
        vec![RankedDescriptor {
            descriptor: Arc::new(SchemaDescriptor {
                schema: "medisync".into(),
                table: "patients".into(),
                columns: vec![
                    col("patient_id", SemanticType::Identifier),
                    col("name_en", SemanticType::Text),
                    col("name_ar", SemanticType::Text),
                    col("date_of_birth", SemanticType::Date),
                ],
                embedding: Vec::new(),
                access_tags: Vec::new(),
            }),
            score: 1.0,
        }]
    }

    fn col(name: &str, semantic_type: SemanticType) -> ColumnDescriptor {
        ColumnDescriptor {
            name: name.into(),
            semantic_type,
            description: String::new(),
            sample_values: Vec::new(),
        }
    }

    fn failing(sql: &str) -> GeneratedSql {
        GeneratedSql {
            sql: sql.to_string(),
            tables_used: BTreeSet::from(["patients".to_string()]),
            parameterized: false,
            params: Vec::new(),
            model_confidence: 0.9,
            explanation: "test".into(),
            attempt: 0,
        }
    }

    #[test]
    fn substitutes_the_most_similar_column() {
        let corrector = SqlCorrector::new();
        let corrected = corrector
            .correct(
                &failing("SELECT patient_name FROM patients"),
                ExecutionErrorClass::ColumnNotFound,
                r#"column "patient_name" does not exist"#,
                &context(),
            )
            .unwrap();
        assert_eq!(corrected.attempt, 1);
        assert!(
            corrected.sql.contains("patient_id") || corrected.sql.contains("name_en"),
            "substituted sql: {}",
            corrected.sql
        );
        assert!(!corrected.sql.contains("patient_name"));
    }

    #[test]
    fn mysql_style_unknown_column_is_also_recognized() {
        let corrector = SqlCorrector::new();
        let corrected = corrector
            .correct(
                &failing("SELECT nam_en FROM patients"),
                ExecutionErrorClass::ColumnNotFound,
                "Unknown column 'nam_en' in 'field list'",
                &context(),
            )
            .unwrap();
        assert!(corrected.sql.contains("name_en"));
    }

    #[test]
    fn qualifies_an_unqualified_relation() {
        let corrector = SqlCorrector::new();
        let corrected = corrector
            .correct(
                &failing("SELECT patient_id FROM patients"),
                ExecutionErrorClass::RelationNotFound,
                "Table 'patients' doesn't exist",
                &context(),
            )
            .unwrap();
        assert!(corrected.sql.contains("medisync.patients"), "sql: {}", corrected.sql);
    }

    #[test]
    fn qualifies_an_ambiguous_column() {
        let corrector = SqlCorrector::new();
        let corrected = corrector
            .correct(
                &failing("SELECT name_en FROM patients JOIN visits"),
                ExecutionErrorClass::AmbiguousReference,
                "Column 'name_en' in field list is ambiguous",
                &context(),
            )
            .unwrap();
        assert!(corrected.sql.contains("patients.name_en"), "sql: {}", corrected.sql);
    }

    #[test]
    fn extends_an_existing_group_by() {
        let corrector = SqlCorrector::new();
        let corrected = corrector
            .correct(
                &failing(
                    "SELECT name_en, COUNT(*) FROM patients GROUP BY patient_id ORDER BY 2 DESC",
                ),
                ExecutionErrorClass::GroupByMissing,
                "'name_en' isn't in GROUP BY",
                &context(),
            )
            .unwrap();
        assert!(
            corrected.sql.contains("GROUP BY patient_id, name_en"),
            "sql: {}",
            corrected.sql
        );
        assert!(corrected.sql.ends_with("ORDER BY 2 DESC"));
    }

    #[test]
    fn adds_a_missing_group_by() {
        let corrector = SqlCorrector::new();
        let corrected = corrector
            .correct(
                &failing("SELECT name_en, COUNT(*) FROM patients"),
                ExecutionErrorClass::GroupByMissing,
                "'name_en' isn't in GROUP BY",
                &context(),
            )
            .unwrap();
        assert!(corrected.sql.ends_with("GROUP BY name_en"), "sql: {}", corrected.sql);
    }

    #[test]
    fn normalizes_syntax_noise() {
        let corrector = SqlCorrector::new();
        let corrected = corrector
            .correct(
                &failing("SELECT  patient_id   FROM patients ;;"),
                ExecutionErrorClass::SyntaxError,
                "You have an error in your SQL syntax",
                &context(),
            )
            .unwrap();
        assert_eq!(corrected.sql, "SELECT patient_id FROM patients");
    }

    #[test]
    fn quotes_the_bare_date_bound_to_the_reported_column() {
        let corrector = SqlCorrector::new();
        let corrected = corrector
            .correct(
                &failing("SELECT patient_id FROM patients WHERE date_of_birth >= 1990-01-01"),
                ExecutionErrorClass::TypeMismatch,
                "invalid type comparison for date_of_birth",
                &context(),
            )
            .unwrap();
        assert!(
            corrected.sql.contains("date_of_birth >= '1990-01-01'"),
            "sql: {}",
            corrected.sql
        );
    }

    #[test]
    fn type_mismatch_column_is_also_read_from_mysql_wording() {
        let corrector = SqlCorrector::new();
        let corrected = corrector
            .correct(
                &failing("SELECT patient_id FROM patients WHERE date_of_birth = 1990-01-01"),
                ExecutionErrorClass::TypeMismatch,
                "Incorrect DATE value: '1990-01-01' for column 'date_of_birth' at row 1",
                &context(),
            )
            .unwrap();
        assert!(corrected.sql.contains("= '1990-01-01'"), "sql: {}", corrected.sql);
    }

    #[test]
    fn type_mismatch_without_a_named_column_is_terminal() {
        let corrector = SqlCorrector::new();
        // a bare date exists in the statement, but the error anchors nothing
        let result = corrector.correct(
            &failing("SELECT patient_id FROM patients WHERE date_of_birth >= 1990-01-01"),
            ExecutionErrorClass::TypeMismatch,
            "type mismatch in expression",
            &context(),
        );
        assert!(matches!(
            result,
            Err(PipelineError::ExecutionFailure {
                class: ExecutionErrorClass::TypeMismatch,
                ..
            })
        ));
    }

    #[test]
    fn type_mismatch_naming_an_unrelated_column_is_terminal() {
        let corrector = SqlCorrector::new();
        // the named column has no bare date literal bound to it
        let result = corrector.correct(
            &failing("SELECT name_en FROM patients WHERE date_of_birth >= 1990-01-01"),
            ExecutionErrorClass::TypeMismatch,
            "invalid type comparison for name_en",
            &context(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn transient_errors_retry_unchanged() {
        let corrector = SqlCorrector::new();
        let original = failing("SELECT patient_id FROM patients");
        let corrected = corrector
            .correct(&original, ExecutionErrorClass::Timeout, "query timed out", &context())
            .unwrap();
        assert_eq!(corrected.sql, original.sql);
        assert_eq!(corrected.attempt, 1);
    }

    #[test]
    fn permission_denied_is_terminal() {
        let corrector = SqlCorrector::new();
        let result = corrector.correct(
            &failing("SELECT patient_id FROM patients"),
            ExecutionErrorClass::PermissionDenied,
            "Access denied",
            &context(),
        );
        assert!(matches!(
            result,
            Err(PipelineError::ExecutionFailure {
                class: ExecutionErrorClass::PermissionDenied,
                ..
            })
        ));
    }

    #[test]
    fn unfixable_correction_is_terminal() {
        let corrector = SqlCorrector::new();
        let result = corrector.correct(
            &failing("SELECT zzz FROM patients"),
            ExecutionErrorClass::ColumnNotFound,
            "Unknown column 'zzz' in 'field list'",
            &context(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn bigram_similarity_prefers_close_names() {
        assert!(bigram_similarity("patient_name", "name_en") > 0.2);
        assert!(
            bigram_similarity("patient_name", "patient_id")
                > bigram_similarity("patient_name", "date_of_birth")
        );
        assert!((bigram_similarity("same", "same") - 1.0).abs() < f64::EPSILON);
    }
}
