//! Terminology Normalizer agent
//!
//! Replaces business synonyms with canonical warehouse references in a
//! case-insensitive, longest-match, left-to-right pass. Each synonym is
//! applied at most once; collisions resolve by length, then category
//! priority (healthcare > accounting > general), then insertion order —
//! the matcher ordering the glossary snapshot precomputes.

use std::collections::HashSet;
use std::sync::Arc;

use super::Agent;
use crate::models::{
    AppliedMapping, DomainContext, LanguageDetection, Locale, ProcessedQuery, TermCategory,
    TranslatedQuery,
};
use crate::services::glossary::GlossaryService;

pub struct TerminologyNormalizer {
    glossary: Arc<GlossaryService>,
}

impl TerminologyNormalizer {
    pub fn new(glossary: Arc<GlossaryService>) -> Self {
        Self { glossary }
    }

    pub fn normalize(
        &self,
        original: &str,
        translated: &TranslatedQuery,
        detection: &LanguageDetection,
        locale: Locale,
    ) -> ProcessedQuery {
        let snapshot = self.glossary.snapshot();
        let matchers = snapshot.matchers_for(locale);

        let mut text = translated.translated_utterance.clone();
        let mut applied: Vec<AppliedMapping> = Vec::new();
        let mut used_matchers: HashSet<usize> = HashSet::new();

        let mut cursor = 0usize;
        while cursor < text.len() {
            let mut matched = None;
            for (matcher_idx, matcher) in matchers.iter().enumerate() {
                if used_matchers.contains(&matcher_idx) {
                    continue;
                }
                if matches_at(&text, cursor, &matcher.surface_lower) {
                    matched = Some((matcher_idx, matcher.surface_lower.len(), matcher.entry_index));
                    break;
                }
            }

            match matched {
                Some((matcher_idx, surface_len, entry_index)) => {
                    let entry = snapshot.entry(entry_index);
                    let matched_text = text[cursor..cursor + surface_len].to_string();

                    applied.push(AppliedMapping {
                        original: matched_text,
                        canonical: entry.canonical_term.clone(),
                        sql_fragment: entry.sql_fragment.clone(),
                        category: entry.category,
                    });
                    used_matchers.insert(matcher_idx);

                    text.replace_range(cursor..cursor + surface_len, &entry.canonical_term);
                    cursor += entry.canonical_term.len();
                },
                None => {
                    cursor += text[cursor..]
                        .chars()
                        .next()
                        .map(char::len_utf8)
                        .unwrap_or(1);
                },
            }
        }

        let domain_context = build_domain_context(&applied);

        // 0.02 decay per mapping, never dragged below 0.7 (or below an
        // already-low translation confidence).
        let base = translated.confidence;
        let decayed = base - 0.02 * applied.len() as f64;
        let intent_confidence = decayed.max(0.7f64.min(base));

        ProcessedQuery {
            original: original.to_string(),
            normalized_english: text,
            detected_locale: detection.locale,
            locale_confidence: detection.confidence,
            intent_confidence,
            applied_mappings: applied,
            domain_context,
        }
    }
}

#[async_trait::async_trait]
impl Agent for TerminologyNormalizer {
    fn id(&self) -> &'static str {
        "terminology_normalizer"
    }

    fn name(&self) -> &'static str {
        "Terminology Normalizer"
    }

    async fn health(&self) -> super::AgentHealth {
        let snapshot = self.glossary.snapshot();
        if snapshot.is_empty() {
            super::AgentHealth::unhealthy("glossary snapshot is empty")
        } else {
            super::AgentHealth::healthy()
        }
    }
}

/// Case-insensitive match at `pos` with word boundaries on both sides.
/// The surface form is stored lowercase; the scanned text is lowercase for
/// English input by construction, so a direct byte compare is enough after
/// lowercasing the candidate slice.
fn matches_at(text: &str, pos: usize, surface: &str) -> bool {
    if !text.is_char_boundary(pos) || pos + surface.len() > text.len() {
        return false;
    }
    let end = pos + surface.len();
    if !text.is_char_boundary(end) {
        return false;
    }
    if !text[pos..end].eq_ignore_ascii_case(surface) {
        return false;
    }

    let before_ok = pos == 0
        || text[..pos]
            .chars()
            .next_back()
            .map(|c| !c.is_alphanumeric() && c != '_')
            .unwrap_or(true);
    let after_ok = end == text.len()
        || text[end..]
            .chars()
            .next()
            .map(|c| !c.is_alphanumeric() && c != '_')
            .unwrap_or(true);

    before_ok && after_ok
}

fn build_domain_context(mappings: &[AppliedMapping]) -> DomainContext {
    let mut ctx = DomainContext::default();

    for mapping in mappings {
        match mapping.category {
            TermCategory::Healthcare => ctx.healthcare_terms.push(mapping.canonical.clone()),
            TermCategory::Accounting => ctx.accounting_terms.push(mapping.canonical.clone()),
            TermCategory::General => ctx.general_terms.push(mapping.canonical.clone()),
        }

        match mapping.canonical.rsplit_once('.') {
            Some((table_part, _column)) => {
                let table = table_part
                    .rsplit_once('.')
                    .map(|(_, t)| t)
                    .unwrap_or(table_part);
                ctx.candidate_tables.insert(table.to_string());
                ctx.candidate_columns.insert(mapping.canonical.clone());
            },
            None => {
                ctx.candidate_tables.insert(mapping.canonical.clone());
            },
        }

        if !mapping.sql_fragment.is_empty() {
            ctx.sql_hints.push(mapping.sql_fragment.clone());
        }
    }

    ctx
}
