//! Schema catalog snapshot service
//!
//! The offline indexer writes one row per warehouse table (columns and
//! embedding as JSON). The core loads them into an immutable snapshot with a
//! constant embedding dimensionality; refresh swaps the snapshot atomically.

use std::sync::{Arc, RwLock};

use sqlx::{FromRow, SqlitePool};

use crate::models::{ColumnDescriptor, SchemaDescriptor};
use crate::utils::{ApiError, ApiResult};

/// Embedding dimensionality used when a catalog row ships no vector. The
/// offline indexer may use a real model at any dimension; all rows of one
/// deployment must agree.
pub const DEFAULT_EMBEDDING_DIM: usize = 64;

#[derive(Debug, FromRow)]
struct CatalogRow {
    schema_name: String,
    table_name: String,
    columns: String,
    embedding: String,
    access_tags: String,
}

#[derive(Debug, Default)]
pub struct SchemaSnapshot {
    pub descriptors: Vec<Arc<SchemaDescriptor>>,
    pub dimension: usize,
}

impl SchemaSnapshot {
    pub fn table(&self, name: &str) -> Option<&Arc<SchemaDescriptor>> {
        self.descriptors
            .iter()
            .find(|d| d.table.eq_ignore_ascii_case(name) || d.qualified_name().eq_ignore_ascii_case(name))
    }
}

pub struct SchemaCatalogService {
    pool: SqlitePool,
    snapshot: RwLock<Option<Arc<SchemaSnapshot>>>,
}

impl SchemaCatalogService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, snapshot: RwLock::new(None) }
    }

    /// Current snapshot, or `None` when the catalog has never loaded
    /// (retrieval reports the backend as unavailable in that case).
    pub fn snapshot(&self) -> Option<Arc<SchemaSnapshot>> {
        self.snapshot
            .read()
            .expect("schema snapshot lock poisoned")
            .clone()
    }

    pub async fn load(&self) -> ApiResult<()> {
        self.refresh().await.map(|_| ())
    }

    /// Reload all catalog rows and swap the snapshot. Rows without an
    /// embedding get a deterministic text embedding so retrieval still ranks
    /// them; mixed dimensions are a deployment error.
    pub async fn refresh(&self) -> ApiResult<usize> {
        let rows: Vec<CatalogRow> = sqlx::query_as(
            r#"
            SELECT schema_name, table_name, columns, embedding, access_tags
            FROM schema_catalog
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut dimension = 0usize;
        let mut descriptors = Vec::with_capacity(rows.len());

        for row in rows {
            let columns: Vec<ColumnDescriptor> =
                serde_json::from_str(&row.columns).map_err(|e| {
                    tracing::error!("Malformed columns JSON for table {}: {}", row.table_name, e);
                    ApiError::internal_error("Corrupt schema catalog row")
                })?;
            let embedding: Vec<f32> = serde_json::from_str(&row.embedding).unwrap_or_default();
            let access_tags: Vec<String> =
                serde_json::from_str(&row.access_tags).unwrap_or_default();

            let mut descriptor = SchemaDescriptor {
                schema: row.schema_name,
                table: row.table_name,
                columns,
                embedding,
                access_tags,
            };

            if descriptor.embedding.is_empty() {
                descriptor.embedding =
                    embed_text(&descriptor_text(&descriptor), DEFAULT_EMBEDDING_DIM);
            }

            if dimension == 0 {
                dimension = descriptor.embedding.len();
            } else if descriptor.embedding.len() != dimension {
                tracing::error!(
                    "Embedding dimension mismatch for table {} ({} != {})",
                    descriptor.table,
                    descriptor.embedding.len(),
                    dimension
                );
                return Err(ApiError::internal_error("Inconsistent embedding dimensions"));
            }

            descriptors.push(Arc::new(descriptor));
        }

        let count = descriptors.len();
        let next = Arc::new(SchemaSnapshot { descriptors, dimension });
        *self
            .snapshot
            .write()
            .expect("schema snapshot lock poisoned") = Some(next);

        tracing::info!("Schema catalog snapshot refreshed: {} tables", count);
        Ok(count)
    }
}

/// Text a descriptor is embedded from when the indexer shipped no vector.
fn descriptor_text(descriptor: &SchemaDescriptor) -> String {
    let mut text = String::new();
    text.push_str(&descriptor.table);
    for column in &descriptor.columns {
        text.push(' ');
        text.push_str(&column.name);
        if !column.description.is_empty() {
            text.push(' ');
            text.push_str(&column.description);
        }
    }
    text
}

// ============================================================================
// Deterministic text embedding
// ============================================================================

/// Feature-hashed bag-of-words embedding. Deterministic and cheap; queries
/// and fallback catalog vectors share this function so cosine similarity is
/// meaningful without a model in the loop.
pub fn embed_text(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0f32; dimension.max(1)];
    for token in tokenize(text) {
        let bucket = (fnv1a(token.as_bytes()) as usize) % vector.len();
        vector[bucket] += 1.0;
    }

    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
    vector
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
        .collect()
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
