//! Locale-aware formatting hints
//!
//! The core never formats numbers itself; it ships hints so every client
//! renders a result the same way.

use crate::models::{CalendarSystem, FormatHints, Locale, NumeralSystem};

// Arabic decimal (U+066B) and thousands (U+066C) separators.
const ARABIC_DECIMAL_SEPARATOR: &str = "\u{066B}";
const ARABIC_THOUSANDS_SEPARATOR: &str = "\u{066C}";

pub fn format_hints(locale: Locale, calendar: CalendarSystem, currency_symbol: &str) -> FormatHints {
    match locale {
        Locale::En => FormatHints {
            locale,
            numeral_system: NumeralSystem::Western,
            thousands_separator: ",".to_string(),
            decimal_separator: ".".to_string(),
            currency_symbol: currency_symbol.to_string(),
            calendar,
        },
        Locale::Ar => FormatHints {
            locale,
            numeral_system: NumeralSystem::EasternArabic,
            thousands_separator: ARABIC_THOUSANDS_SEPARATOR.to_string(),
            decimal_separator: ARABIC_DECIMAL_SEPARATOR.to_string(),
            currency_symbol: currency_symbol.to_string(),
            calendar,
        },
    }
}

/// Fold Eastern-Arabic (٠..٩) and Extended (۰..۹) digits to ASCII so date and
/// number parsing sees one numeral system.
pub fn fold_arabic_digits(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '\u{0660}'..='\u{0669}' => {
                char::from_u32('0' as u32 + (c as u32 - 0x0660)).unwrap_or(c)
            },
            '\u{06F0}'..='\u{06F9}' => {
                char::from_u32('0' as u32 + (c as u32 - 0x06F0)).unwrap_or(c)
            },
            _ => c,
        })
        .collect()
}
