//! Language Detector agent
//!
//! Deterministic locale classification: Unicode-script letter ratio plus a
//! small keyword signal. Ties go to the caller-declared locale, then English.

use once_cell::sync::Lazy;
use std::collections::HashSet;

use super::{Agent, PipelineError};
use crate::models::{LanguageDetection, Locale};

static ARABIC_KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "أظهر", "اعرض", "كم", "إجمالي", "اجمالي", "عدد", "خلال", "مقارنة", "توزيع", "اتجاه",
    ])
});

static ENGLISH_KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "show", "list", "total", "count", "how", "many", "trend", "compare", "breakdown", "average",
    ])
});

pub struct LanguageDetector;

impl LanguageDetector {
    pub fn new() -> Self {
        Self
    }

    /// Classify the utterance locale. `declared` is the caller's own claim
    /// (body or token locale) and only breaks ties.
    pub fn detect(
        &self,
        utterance: &str,
        declared: Option<Locale>,
    ) -> Result<LanguageDetection, PipelineError> {
        let trimmed = utterance.trim();
        if trimmed.is_empty() {
            return Err(PipelineError::EmptyInput);
        }

        let mut arabic_letters = 0usize;
        let mut latin_letters = 0usize;
        for c in trimmed.chars() {
            if is_arabic_letter(c) {
                arabic_letters += 1;
            } else if c.is_ascii_alphabetic() {
                latin_letters += 1;
            }
        }

        let total_letters = arabic_letters + latin_letters;
        if total_letters == 0 {
            // digits/punctuation only: fall back to the declared locale
            return Ok(LanguageDetection { locale: declared.unwrap_or_default(), confidence: 0.5 });
        }

        let arabic_ratio = arabic_letters as f64 / total_letters as f64;
        let keyword_bonus = keyword_signal(trimmed);

        let locale = if (0.45..=0.55).contains(&arabic_ratio) {
            declared.unwrap_or(Locale::En)
        } else if arabic_ratio > 0.55 {
            Locale::Ar
        } else {
            Locale::En
        };

        // Pure-script inputs score >= 0.9; mixed scripts lose confidence in
        // proportion to how mixed they are.
        let purity = (2.0 * arabic_ratio - 1.0).abs();
        let confidence = if purity >= 0.9 {
            (0.9 + 0.05 * keyword_bonus + 0.04 * purity).min(0.99)
        } else {
            (0.5 + 0.4 * purity + 0.05 * keyword_bonus).clamp(0.5, 0.89)
        };

        Ok(LanguageDetection { locale, confidence })
    }
}

impl Default for LanguageDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Agent for LanguageDetector {
    fn id(&self) -> &'static str {
        "language_detector"
    }

    fn name(&self) -> &'static str {
        "Language Detector"
    }
}

fn is_arabic_letter(c: char) -> bool {
    matches!(
        c,
        '\u{0600}'..='\u{06FF}'
            | '\u{0750}'..='\u{077F}'
            | '\u{08A0}'..='\u{08FF}'
            | '\u{FB50}'..='\u{FDFF}'
            | '\u{FE70}'..='\u{FEFF}'
    )
}

fn keyword_signal(utterance: &str) -> f64 {
    let lower = utterance.to_lowercase();
    let hits = lower
        .split_whitespace()
        .filter(|w| ARABIC_KEYWORDS.contains(w) || ENGLISH_KEYWORDS.contains(w))
        .count();
    (hits as f64).min(2.0) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pure_english_scores_high() {
        let detector = LanguageDetector::new();
        let result = detector
            .detect("Show me total revenue for January 2026", None)
            .unwrap();
        assert_eq!(result.locale, Locale::En);
        assert!(result.confidence >= 0.9, "confidence {}", result.confidence);
    }

    #[test]
    fn pure_arabic_scores_high() {
        let detector = LanguageDetector::new();
        let result = detector
            .detect("أظهر اتجاه زيارات المرضى خلال الأشهر الستة الماضية", None)
            .unwrap();
        assert_eq!(result.locale, Locale::Ar);
        assert!(result.confidence >= 0.9, "confidence {}", result.confidence);
    }

    #[test]
    fn mixed_script_reduces_confidence() {
        let detector = LanguageDetector::new();
        let result = detector
            .detect("Show me الإيرادات for January", None)
            .unwrap();
        assert!(result.confidence < 0.9);
    }

    #[test]
    fn ties_resolve_to_declared_then_english() {
        let detector = LanguageDetector::new();
        // two letters each way: exactly balanced
        let balanced = "ab فب";
        let declared_ar = detector.detect(balanced, Some(Locale::Ar)).unwrap();
        assert_eq!(declared_ar.locale, Locale::Ar);
        let undeclared = detector.detect(balanced, None).unwrap();
        assert_eq!(undeclared.locale, Locale::En);
    }

    #[test]
    fn blank_input_is_an_error() {
        let detector = LanguageDetector::new();
        assert!(matches!(detector.detect("   ", None), Err(PipelineError::EmptyInput)));
        assert!(matches!(detector.detect("", None), Err(PipelineError::EmptyInput)));
    }

    #[test]
    fn digits_only_falls_back_to_declared_locale() {
        let detector = LanguageDetector::new();
        let result = detector.detect("2026", Some(Locale::Ar)).unwrap();
        assert_eq!(result.locale, Locale::Ar);
        assert!((result.confidence - 0.5).abs() < f64::EPSILON);
    }
}
