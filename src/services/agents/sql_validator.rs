//! SQL Validator agent
//!
//! Enforces the read-only contract before anything reaches the warehouse:
//! SELECT/WITH only, no write/DDL keywords as SQL tokens, a single
//! statement, no system catalogs outside the allowlist, and only tables
//! known to the schema context. Sanitization only ever narrows (first
//! statement, nothing added).

use std::collections::HashSet;

use once_cell::sync::Lazy;

use super::Agent;
use crate::models::{GeneratedSql, RankedDescriptor, SqlValidationResult};

static FORBIDDEN_KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE", "GRANT", "REVOKE",
        "EXEC", "EXECUTE", "CALL", "COPY", "MERGE",
    ])
});

static SYSTEM_CATALOG_PREFIXES: &[&str] =
    &["information_schema.", "performance_schema.", "mysql.", "sys.", "pg_catalog."];

/// System objects that remain queryable despite living in a system catalog.
/// Empty by default; deployments extend it deliberately.
static SYSTEM_CATALOG_ALLOWLIST: Lazy<HashSet<&'static str>> = Lazy::new(HashSet::new);

pub struct SqlValidator;

impl SqlValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(
        &self,
        generated: &GeneratedSql,
        schema_context: &[RankedDescriptor],
    ) -> SqlValidationResult {
        let mut result = SqlValidationResult { valid: true, ..Default::default() };

        let statements = split_statements(&generated.sql);
        let statement = match statements.first() {
            Some(first) => first.clone(),
            None => {
                return blocked(result, "empty SQL statement");
            },
        };

        // Rule 1: must start with SELECT or WITH
        let tokens = tokenize_sql(&statement);
        match tokens.first().map(|t| t.to_uppercase()) {
            Some(first) if first == "SELECT" || first == "WITH" => {},
            Some(first) => {
                return blocked(
                    result,
                    format!("statement must start with SELECT or WITH, found {}", first),
                );
            },
            None => {
                return blocked(result, "empty SQL statement");
            },
        }

        // Rule 2: no forbidden keyword anywhere in the input, including in a
        // piggybacked second statement
        for token in tokenize_sql(&generated.sql) {
            let upper = token.to_uppercase();
            if FORBIDDEN_KEYWORDS.contains(upper.as_str()) {
                return blocked(result, format!("forbidden SQL keyword: {}", upper));
            }
        }

        // Rule 3: a second statement is discarded with a warning; sanitation
        // narrows to the first statement only.
        if statements.len() > 1 {
            result
                .warnings
                .push("multiple statements supplied; only the first will be executed".to_string());
            result.sanitized_sql = Some(statement.clone());
        } else if generated.sql.trim() != statement {
            // lone trailing semicolon
            result.sanitized_sql = Some(statement.clone());
        }

        // Rule 4: system catalog references
        for token in &tokens {
            let lower = token.to_lowercase();
            if SYSTEM_CATALOG_PREFIXES.iter().any(|p| lower.starts_with(p))
                && !SYSTEM_CATALOG_ALLOWLIST.contains(lower.as_str())
            {
                return blocked(result, format!("system catalog access is not allowed: {}", token));
            }
        }

        // Rule 5: every referenced table must be known to the schema context
        // (or be a CTE defined in this statement)
        let known: HashSet<String> = schema_context
            .iter()
            .flat_map(|r| {
                [
                    r.descriptor.table.to_lowercase(),
                    r.descriptor.qualified_name().to_lowercase(),
                ]
            })
            .collect();
        let ctes = cte_names(&tokens);

        for table in referenced_tables(&tokens) {
            let lower = table.to_lowercase();
            if !known.contains(&lower) && !ctes.contains(&lower) {
                return blocked(result, format!("unknown table: {}", table));
            }
        }

        result
    }
}

impl Default for SqlValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Agent for SqlValidator {
    fn id(&self) -> &'static str {
        "sql_validator"
    }

    fn name(&self) -> &'static str {
        "SQL Validator"
    }
}

fn blocked(mut result: SqlValidationResult, reason: impl Into<String>) -> SqlValidationResult {
    let reason = reason.into();
    result.valid = false;
    result.errors.push(reason.clone());
    result.blocked_reason = Some(reason);
    // a blocked statement is never sanitized into an executable one
    result.sanitized_sql = None;
    result
}

/// Split on semicolons outside quoted strings and backticked identifiers.
fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut in_backtick = false;

    for ch in sql.chars() {
        match ch {
            '\'' if !in_double_quote && !in_backtick => {
                in_single_quote = !in_single_quote;
                current.push(ch);
            },
            '"' if !in_single_quote && !in_backtick => {
                in_double_quote = !in_double_quote;
                current.push(ch);
            },
            '`' if !in_single_quote && !in_double_quote => {
                in_backtick = !in_backtick;
                current.push(ch);
            },
            ';' if !in_single_quote && !in_double_quote && !in_backtick => {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    statements.push(trimmed.to_string());
                }
                current.clear();
            },
            _ => {
                current.push(ch);
            },
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }

    statements
}

/// Word tokens outside string literals. Backticked identifiers become plain
/// tokens; quoted strings are skipped entirely so a literal can never trip
/// the keyword rules.
fn tokenize_sql(sql: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\'' | '"' => {
                flush(&mut tokens, &mut current);
                let quote = ch;
                for inner in chars.by_ref() {
                    if inner == quote {
                        break;
                    }
                }
            },
            '`' => {
                flush(&mut tokens, &mut current);
                for inner in chars.by_ref() {
                    if inner == '`' {
                        break;
                    }
                    current.push(inner);
                }
                flush(&mut tokens, &mut current);
            },
            c if c.is_alphanumeric() || c == '_' || c == '.' || c == '$' => {
                current.push(c);
            },
            _ => {
                flush(&mut tokens, &mut current);
            },
        }
    }
    flush(&mut tokens, &mut current);

    tokens
}

fn flush(tokens: &mut Vec<String>, current: &mut String) {
    if !current.is_empty() {
        tokens.push(std::mem::take(current));
    }
}

/// Identifiers appearing where a relation is expected: after FROM or JOIN.
fn referenced_tables(tokens: &[String]) -> Vec<String> {
    let mut tables = Vec::new();
    let mut iter = tokens.iter().peekable();
    while let Some(token) = iter.next() {
        let upper = token.to_uppercase();
        if upper == "FROM" || upper == "JOIN" {
            if let Some(next) = iter.peek() {
                // a parenthesized subquery has no relation token here
                if !next.eq_ignore_ascii_case("select") {
                    tables.push((*next).clone());
                }
            }
        }
    }
    tables
}

/// Names defined by `WITH name AS (...)` (and `, name AS (`) in this
/// statement.
fn cte_names(tokens: &[String]) -> HashSet<String> {
    let mut names = HashSet::new();
    if tokens.first().map(|t| t.to_uppercase()) != Some("WITH".to_string()) {
        return names;
    }
    for window in tokens.windows(2) {
        if window[1].to_uppercase() == "AS" {
            names.insert(window[0].to_lowercase());
        }
    }
    names
}
