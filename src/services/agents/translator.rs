//! Query Translator agent
//!
//! Maps Arabic utterances to English intent tokens through a domain-aware
//! phrase table, longest phrase first. English input passes through with
//! whitespace/case normalization only. An LLM-backed variant can replace
//! this behind the `llm-agents` feature; the contract is identical.

use once_cell::sync::Lazy;

use super::{Agent, PipelineError};
use crate::models::{Locale, TranslatedQuery};
use crate::utils::locale::fold_arabic_digits;

/// (arabic phrase, english replacement, names a domain concept)
type PhraseEntry = (&'static [&'static str], &'static str, bool);

static PHRASE_TABLE: Lazy<Vec<PhraseEntry>> = Lazy::new(|| {
    let mut table: Vec<PhraseEntry> = vec![
        // multi-token phrases first; the table is re-sorted by length below
        (&["الأشهر", "الستة", "الماضية"], "last 6 months", false),
        (&["الأشهر", "الثلاثة", "الماضية"], "last 3 months", false),
        (&["إجمالي", "الإيرادات"], "total revenue", true),
        (&["اجمالي", "الايرادات"], "total revenue", true),
        (&["مطالبات", "التأمين"], "insurance claims", true),
        (&["الشهر", "الماضي"], "last month", false),
        (&["السنة", "الماضية"], "last year", false),
        (&["هذا", "الشهر"], "this month", false),
        (&["هذه", "السنة"], "this year", false),
        (&["أظهر"], "show", false),
        (&["اعرض"], "show", false),
        (&["قائمة"], "list", false),
        (&["اتجاه"], "trend", false),
        (&["مقارنة"], "compare", false),
        (&["توزيع"], "breakdown", false),
        (&["نسبة"], "share of", false),
        (&["متوسط"], "average", false),
        (&["عدد"], "count of", false),
        (&["كم"], "how many", false),
        (&["خلال"], "over the", false),
        (&["في"], "in", false),
        (&["حسب"], "by", false),
        (&["لكل"], "per", false),
        (&["اليوم"], "today", false),
        (&["الماضية"], "last", false),
        (&["الماضي"], "last", false),
        (&["الستة"], "6", false),
        (&["شهر"], "month", false),
        (&["أشهر"], "months", false),
        (&["الأشهر"], "months", false),
        (&["الإيرادات"], "revenue", true),
        (&["الايرادات"], "revenue", true),
        (&["المصروفات"], "expenses", true),
        (&["النفقات"], "expenses", true),
        (&["الفواتير"], "invoices", true),
        (&["زيارات"], "visits", true),
        (&["الزيارات"], "visits", true),
        (&["المرضى"], "patients", true),
        (&["مرضى"], "patients", true),
        (&["المواعيد"], "appointments", true),
        (&["الأقسام"], "departments", true),
        (&["القسم"], "department", true),
    ];
    table.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    table
});

pub struct QueryTranslator;

impl QueryTranslator {
    pub fn new() -> Self {
        Self
    }

    pub fn translate(
        &self,
        utterance: &str,
        source_locale: Locale,
    ) -> Result<TranslatedQuery, PipelineError> {
        let trimmed = utterance.trim();
        if trimmed.is_empty() {
            return Err(PipelineError::EmptyInput);
        }

        if source_locale == Locale::En {
            return Ok(TranslatedQuery {
                translated_utterance: normalize_whitespace(&trimmed.to_lowercase()),
                preserved_terms: Vec::new(),
                source_locale,
                target_locale: Locale::En,
                confidence: 1.0,
            });
        }

        let folded = fold_arabic_digits(trimmed);
        let tokens: Vec<String> = folded
            .split_whitespace()
            .map(strip_punctuation)
            .filter(|t| !t.is_empty())
            .collect();

        let mut output: Vec<&str> = Vec::new();
        let mut preserved: Vec<String> = Vec::new();
        let mut matched_tokens = 0usize;
        let mut passthrough_tokens = 0usize;

        let mut i = 0usize;
        'outer: while i < tokens.len() {
            for (phrase, english, is_domain) in PHRASE_TABLE.iter() {
                if phrase.len() <= tokens.len() - i
                    && phrase
                        .iter()
                        .zip(&tokens[i..i + phrase.len()])
                        .all(|(p, t)| t.as_str() == *p)
                {
                    output.push(english);
                    if *is_domain {
                        preserved.push((*english).to_string());
                    }
                    matched_tokens += phrase.len();
                    i += phrase.len();
                    continue 'outer;
                }
            }

            // numbers survive translation untouched; unrecognized Arabic is dropped
            let token = &tokens[i];
            if token.chars().all(|c| c.is_ascii_alphanumeric()) {
                output.push(token.as_str());
                passthrough_tokens += 1;
            }
            i += 1;
        }

        if tokens.is_empty() {
            return Err(PipelineError::EmptyInput);
        }

        let coverage = (matched_tokens + passthrough_tokens) as f64 / tokens.len() as f64;
        let confidence = (0.55 + 0.4 * coverage).min(0.95);

        Ok(TranslatedQuery {
            translated_utterance: normalize_whitespace(&output.join(" ")),
            preserved_terms: preserved,
            source_locale,
            target_locale: Locale::En,
            confidence,
        })
    }
}

impl Default for QueryTranslator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Agent for QueryTranslator {
    fn id(&self) -> &'static str {
        "query_translator"
    }

    fn name(&self) -> &'static str {
        "Query Translator"
    }
}

fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_punctuation(token: &str) -> String {
    token
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn english_passes_through_normalized() {
        let translator = QueryTranslator::new();
        let result = translator
            .translate("  Show   me Total Revenue ", Locale::En)
            .unwrap();
        assert_eq!(result.translated_utterance, "show me total revenue");
        assert!((result.confidence - 1.0).abs() < f64::EPSILON);
        assert!(result.preserved_terms.is_empty());
    }

    #[test]
    fn arabic_trend_query_translates_with_domain_terms() {
        let translator = QueryTranslator::new();
        let result = translator
            .translate("أظهر اتجاه زيارات المرضى خلال الأشهر الستة الماضية", Locale::Ar)
            .unwrap();
        assert!(result.translated_utterance.contains("visits"));
        assert!(result.translated_utterance.contains("patients"));
        assert!(result.translated_utterance.contains("6 months"));
        assert!(result.preserved_terms.contains(&"visits".to_string()));
        assert!(result.preserved_terms.contains(&"patients".to_string()));
        assert!(result.confidence > 0.9, "confidence {}", result.confidence);
    }

    #[test]
    fn arabic_kpi_query_translates() {
        let translator = QueryTranslator::new();
        let result = translator
            .translate("كم إجمالي الإيرادات هذا الشهر", Locale::Ar)
            .unwrap();
        assert!(result.translated_utterance.contains("total revenue"));
        assert!(result.translated_utterance.contains("this month"));
    }

    #[test]
    fn eastern_arabic_digits_are_folded() {
        let translator = QueryTranslator::new();
        let result = translator
            .translate("الإيرادات في ٢٠٢٦", Locale::Ar)
            .unwrap();
        assert!(result.translated_utterance.contains("2026"));
    }

    #[test]
    fn unknown_tokens_lower_confidence() {
        let translator = QueryTranslator::new();
        let result = translator
            .translate("الإيرادات مستشفياتنا الجديدة المتخصصة", Locale::Ar)
            .unwrap();
        assert!(result.confidence < 0.9);
    }

    #[test]
    fn translating_normalized_output_again_is_stable() {
        let translator = QueryTranslator::new();
        let first = translator
            .translate("أظهر اتجاه زيارات المرضى", Locale::Ar)
            .unwrap();
        let second = translator
            .translate(&first.translated_utterance, Locale::En)
            .unwrap();
        assert_eq!(first.translated_utterance, second.translated_utterance);
    }
}
