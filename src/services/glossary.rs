//! Glossary snapshot service
//!
//! Glossary rows live in the metadata store and are compiled into an
//! immutable snapshot at startup. Refresh swaps the snapshot atomically;
//! readers clone the current `Arc` and never block each other.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sqlx::{FromRow, SqlitePool};

use crate::models::{GlossaryEntry, Locale, TermCategory};
use crate::utils::{ApiError, ApiResult};

#[derive(Debug, FromRow)]
struct GlossaryRow {
    synonym: String,
    canonical_term: String,
    category: String,
    sql_fragment: String,
    locale_variants: String,
}

/// One surface form prepared for matching. Matchers are pre-sorted by
/// (length desc, category priority, insertion order) so a left-to-right
/// longest-match pass is a plain linear scan.
#[derive(Debug, Clone)]
pub struct SynonymMatcher {
    pub surface_lower: String,
    pub entry_index: usize,
}

#[derive(Debug, Default)]
pub struct GlossarySnapshot {
    pub entries: Vec<GlossaryEntry>,
    matchers: HashMap<Locale, Vec<SynonymMatcher>>,
}

impl GlossarySnapshot {
    pub fn from_entries(entries: Vec<GlossaryEntry>) -> Self {
        let mut matchers: HashMap<Locale, Vec<SynonymMatcher>> = HashMap::new();

        for locale in [Locale::En, Locale::Ar] {
            let mut forms: Vec<SynonymMatcher> = Vec::new();
            for (entry_index, entry) in entries.iter().enumerate() {
                for surface in entry.synonyms_for(locale) {
                    let surface_lower = surface.trim().to_lowercase();
                    if !surface_lower.is_empty() {
                        forms.push(SynonymMatcher { surface_lower, entry_index });
                    }
                }
            }
            // Stable sort keeps insertion order as the final tiebreaker.
            forms.sort_by(|a, b| {
                b.surface_lower
                    .chars()
                    .count()
                    .cmp(&a.surface_lower.chars().count())
                    .then_with(|| {
                        entries[a.entry_index]
                            .category
                            .priority()
                            .cmp(&entries[b.entry_index].category.priority())
                    })
            });
            matchers.insert(locale, forms);
        }

        Self { entries, matchers }
    }

    pub fn matchers_for(&self, locale: Locale) -> &[SynonymMatcher] {
        self.matchers.get(&locale).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn entry(&self, index: usize) -> &GlossaryEntry {
        &self.entries[index]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct GlossaryService {
    pool: SqlitePool,
    snapshot: RwLock<Arc<GlossarySnapshot>>,
}

impl GlossaryService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, snapshot: RwLock::new(Arc::new(GlossarySnapshot::default())) }
    }

    /// Current snapshot; cheap to call on every request.
    pub fn snapshot(&self) -> Arc<GlossarySnapshot> {
        self.snapshot
            .read()
            .expect("glossary snapshot lock poisoned")
            .clone()
    }

    /// Reload all glossary rows and swap the snapshot. Returns the number of
    /// loaded entries.
    pub async fn refresh(&self) -> ApiResult<usize> {
        let rows: Vec<GlossaryRow> = sqlx::query_as(
            r#"
            SELECT synonym, canonical_term, category, sql_fragment, locale_variants
            FROM glossary
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let locale_variants: HashMap<Locale, Vec<String>> =
                serde_json::from_str(&row.locale_variants).unwrap_or_else(|e| {
                    tracing::warn!(
                        "Malformed locale_variants for glossary term '{}': {}",
                        row.synonym,
                        e
                    );
                    HashMap::new()
                });

            entries.push(GlossaryEntry {
                synonym: row.synonym,
                canonical_term: row.canonical_term,
                category: TermCategory::parse(&row.category),
                sql_fragment: row.sql_fragment,
                locale_variants,
            });
        }

        let count = entries.len();
        let next = Arc::new(GlossarySnapshot::from_entries(entries));
        *self
            .snapshot
            .write()
            .expect("glossary snapshot lock poisoned") = next;

        tracing::info!("Glossary snapshot refreshed: {} entries", count);
        Ok(count)
    }

    /// Initial load; a missing or empty glossary is a startup error since
    /// normalization cannot run without it.
    pub async fn load(&self) -> ApiResult<()> {
        let count = self.refresh().await?;
        if count == 0 {
            return Err(ApiError::internal_error("Glossary table is empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn loads_and_orders_matchers_longest_first() {
        let pool = db::create_pool("sqlite::memory:").await.unwrap();
        db::init_schema(&pool).await.unwrap();
        db::seed_defaults(&pool).await.unwrap();

        let service = GlossaryService::new(pool);
        service.load().await.unwrap();

        let snapshot = service.snapshot();
        assert_eq!(snapshot.len(), 10);

        let en = snapshot.matchers_for(Locale::En);
        let total_pos = en
            .iter()
            .position(|m| m.surface_lower == "total revenue")
            .unwrap();
        let revenue_pos = en
            .iter()
            .position(|m| m.surface_lower == "revenue")
            .unwrap();
        assert!(total_pos < revenue_pos, "longer surface forms must match first");

        let ar = snapshot.matchers_for(Locale::Ar);
        assert!(ar.iter().any(|m| m.surface_lower == "المرضى"));
    }

    #[test]
    fn category_priority_breaks_length_ties() {
        let entries = vec![
            GlossaryEntry {
                synonym: "claims".into(),
                canonical_term: "claims".into(),
                category: TermCategory::Accounting,
                sql_fragment: String::new(),
                locale_variants: HashMap::new(),
            },
            GlossaryEntry {
                synonym: "visits".into(),
                canonical_term: "patient_visits".into(),
                category: TermCategory::Healthcare,
                sql_fragment: String::new(),
                locale_variants: HashMap::new(),
            },
        ];
        let snapshot = GlossarySnapshot::from_entries(entries);
        let en = snapshot.matchers_for(Locale::En);
        // equal length: healthcare outranks accounting
        assert_eq!(snapshot.entry(en[0].entry_index).category, TermCategory::Healthcare);
    }
}
