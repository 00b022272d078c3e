//! Domain glossary entries mapping business synonyms to warehouse objects

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::context::Locale;

/// Category a glossary term belongs to. Collisions between overlapping
/// synonyms resolve healthcare > accounting > general.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TermCategory {
    Healthcare,
    Accounting,
    General,
}

impl TermCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthcare => "healthcare",
            Self::Accounting => "accounting",
            Self::General => "general",
        }
    }

    /// Lower value wins on collision.
    pub fn priority(&self) -> u8 {
        match self {
            Self::Healthcare => 0,
            Self::Accounting => 1,
            Self::General => 2,
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "healthcare" => Self::Healthcare,
            "accounting" => Self::Accounting,
            _ => Self::General,
        }
    }
}

/// One glossary row. `canonical_term` is a warehouse object reference
/// (`table` or `table.column`); `locale_variants` carries the synonym
/// surface forms per locale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlossaryEntry {
    pub synonym: String,
    pub canonical_term: String,
    pub category: TermCategory,
    pub sql_fragment: String,
    #[serde(default)]
    pub locale_variants: HashMap<Locale, Vec<String>>,
}

impl GlossaryEntry {
    /// All surface forms for a locale: the primary synonym (English) plus
    /// any configured variants.
    pub fn synonyms_for(&self, locale: Locale) -> Vec<&str> {
        let mut forms: Vec<&str> = Vec::new();
        if locale == Locale::En {
            forms.push(self.synonym.as_str());
        }
        if let Some(variants) = self.locale_variants.get(&locale) {
            forms.extend(variants.iter().map(String::as_str));
        }
        forms
    }

    /// Table part of the canonical reference.
    pub fn canonical_table(&self) -> &str {
        match self.canonical_term.rsplit_once('.') {
            Some((qualifier, _)) => match qualifier.rsplit_once('.') {
                Some((_, table)) => table,
                None => qualifier,
            },
            None => &self.canonical_term,
        }
    }

    /// Column part of the canonical reference, if it names one.
    pub fn canonical_column(&self) -> Option<&str> {
        self.canonical_term.rsplit_once('.').map(|(_, col)| col)
    }
}
