//! Schema Retriever agent
//!
//! Ranks catalog descriptors against the normalized utterance: cosine
//! similarity over the prebuilt embeddings blended with lexical overlap,
//! plus a bonus for tables the normalizer already nominated. Results are
//! filtered by tenant access tags before ranking.

use std::sync::Arc;

use super::{Agent, AgentHealth, PipelineError};
use crate::models::{ProcessedQuery, RankedDescriptor, SchemaDescriptor};
use crate::services::schema_catalog::{
    SchemaCatalogService, cosine_similarity, embed_text, tokenize,
};

const CANDIDATE_TABLE_BONUS: f32 = 0.25;
const EMBEDDING_WEIGHT: f32 = 0.5;
const LEXICAL_WEIGHT: f32 = 0.5;

pub struct SchemaRetriever {
    catalog: Arc<SchemaCatalogService>,
    top_k: usize,
}

impl SchemaRetriever {
    pub fn new(catalog: Arc<SchemaCatalogService>, top_k: usize) -> Self {
        Self { catalog, top_k }
    }

    /// Top-k descriptors for this query and tenant. An empty result is not
    /// an error; a catalog that never loaded is.
    pub fn retrieve(
        &self,
        query: &ProcessedQuery,
        tenant_id: &str,
    ) -> Result<Vec<RankedDescriptor>, PipelineError> {
        let snapshot = self.catalog.snapshot().ok_or_else(|| {
            PipelineError::SchemaUnavailable("schema catalog has not been loaded".to_string())
        })?;

        if self.top_k == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = embed_text(&query.normalized_english, snapshot.dimension.max(1));
        let query_tokens = tokenize(&query.normalized_english);

        let mut ranked: Vec<RankedDescriptor> = snapshot
            .descriptors
            .iter()
            .filter(|d| d.visible_to(tenant_id))
            .map(|descriptor| {
                let embedding_score =
                    cosine_similarity(&query_embedding, &descriptor.embedding).max(0.0);
                let lexical_score = lexical_overlap(&query_tokens, descriptor);
                let candidate_bonus = if query
                    .domain_context
                    .candidate_tables
                    .iter()
                    .any(|t| t.eq_ignore_ascii_case(&descriptor.table))
                {
                    CANDIDATE_TABLE_BONUS
                } else {
                    0.0
                };

                RankedDescriptor {
                    descriptor: descriptor.clone(),
                    score: EMBEDDING_WEIGHT * embedding_score
                        + LEXICAL_WEIGHT * lexical_score
                        + candidate_bonus,
                }
            })
            .filter(|r| r.score > 0.0)
            .collect();

        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked.truncate(self.top_k);

        tracing::debug!(
            "Schema retrieval ranked {} tables for tenant {} (top: {:?})",
            ranked.len(),
            tenant_id,
            ranked.first().map(|r| r.descriptor.table.as_str())
        );

        Ok(ranked)
    }
}

#[async_trait::async_trait]
impl Agent for SchemaRetriever {
    fn id(&self) -> &'static str {
        "schema_retriever"
    }

    fn name(&self) -> &'static str {
        "Schema Retriever"
    }

    async fn health(&self) -> AgentHealth {
        match self.catalog.snapshot() {
            Some(snapshot) if !snapshot.descriptors.is_empty() => AgentHealth::healthy(),
            Some(_) => AgentHealth::degraded("schema catalog is empty"),
            None => AgentHealth::unhealthy("schema catalog has not been loaded"),
        }
    }
}

/// Share of query tokens that appear in the descriptor's name, columns or
/// descriptions.
fn lexical_overlap(query_tokens: &[String], descriptor: &SchemaDescriptor) -> f32 {
    if query_tokens.is_empty() {
        return 0.0;
    }

    let mut haystack: Vec<String> = tokenize(&descriptor.table);
    for column in &descriptor.columns {
        haystack.extend(tokenize(&column.name));
        haystack.extend(tokenize(&column.description));
    }

    let hits = query_tokens
        .iter()
        .filter(|t| haystack.iter().any(|h| h == *t))
        .count();
    hits as f32 / query_tokens.len() as f32
}
