//! Warehouse schema descriptors produced by the offline indexer

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Coarse semantic type of a warehouse column, assigned by the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Identifier,
    Text,
    Numeric,
    Currency,
    Date,
    Timestamp,
    Boolean,
    Category,
}

impl SemanticType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Numeric | Self::Currency)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, Self::Date | Self::Timestamp)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub semantic_type: SemanticType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub sample_values: Vec<String>,
}

/// One table's descriptor: ordered columns, a fixed-dimension embedding and
/// the access tags that scope visibility per tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub schema: String,
    pub table: String,
    pub columns: Vec<ColumnDescriptor>,
    #[serde(default)]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub access_tags: Vec<String>,
}

impl SchemaDescriptor {
    pub fn qualified_name(&self) -> String {
        if self.schema.is_empty() {
            self.table.clone()
        } else {
            format!("{}.{}", self.schema, self.table)
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn first_temporal(&self) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.semantic_type.is_temporal())
    }

    pub fn first_numeric(&self) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.semantic_type.is_numeric())
    }

    pub fn first_category(&self) -> Option<&ColumnDescriptor> {
        self.columns
            .iter()
            .find(|c| c.semantic_type == SemanticType::Category)
    }

    /// Visible when untagged, or when tagged for this tenant.
    pub fn visible_to(&self, tenant_id: &str) -> bool {
        if self.access_tags.is_empty() {
            return true;
        }
        let tenant_tag = format!("tenant:{}", tenant_id);
        self.access_tags.iter().any(|t| t == &tenant_tag)
    }
}

/// A retrieval hit: descriptor plus its blended relevance score.
#[derive(Debug, Clone)]
pub struct RankedDescriptor {
    pub descriptor: Arc<SchemaDescriptor>,
    pub score: f32,
}
