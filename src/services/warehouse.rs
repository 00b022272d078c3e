//! Warehouse connection management
//!
//! Pools are created lazily per tenant and cached; every DSN authenticates
//! as a SELECT-only principal. Row values are converted to JSON once, at the
//! boundary, so the rest of the pipeline never touches driver types.

use dashmap::DashMap;
use mysql_async::{Pool, Row, Value};

use crate::config::WarehouseConfig;
use crate::services::agents::{ExecutionErrorClass, PipelineError};

pub struct WarehousePoolManager {
    pools: DashMap<String, Pool>,
    cfg: WarehouseConfig,
}

impl WarehousePoolManager {
    pub fn new(cfg: WarehouseConfig) -> Self {
        Self { pools: DashMap::new(), cfg }
    }

    /// Pool for a tenant: its dedicated DSN when configured, the shared
    /// read-only DSN otherwise. Pools are cached for the process lifetime.
    pub fn pool_for_tenant(&self, tenant_id: &str) -> Result<Pool, PipelineError> {
        let dsn = self
            .cfg
            .tenant_urls
            .get(tenant_id)
            .unwrap_or(&self.cfg.url)
            .clone();

        if let Some(pool) = self.pools.get(&dsn) {
            return Ok(pool.value().clone());
        }

        let opts = mysql_async::Opts::from_url(&dsn).map_err(|e| {
            tracing::error!("Invalid warehouse DSN for tenant {}: {}", tenant_id, e);
            PipelineError::ExecutionFailure {
                class: ExecutionErrorClass::Connection,
                message: format!("invalid warehouse DSN: {}", e),
            }
        })?;

        let pool = Pool::new(opts);
        self.pools.insert(dsn, pool.clone());
        tracing::debug!("Created warehouse pool for tenant {}", tenant_id);
        Ok(pool)
    }

    pub fn max_concurrent_queries(&self) -> usize {
        self.cfg.max_concurrent_queries
    }
}

/// Column names plus JSON rows from a driver result set.
pub fn rows_to_json(rows: Vec<Row>) -> (Vec<String>, Vec<Vec<serde_json::Value>>) {
    if rows.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let columns: Vec<String> = rows[0]
        .columns_ref()
        .iter()
        .map(|c| c.name_str().to_string())
        .collect();

    let mut json_rows = Vec::with_capacity(rows.len());
    for row in rows.iter() {
        let mut json_row = Vec::with_capacity(columns.len());
        for idx in 0..columns.len() {
            json_row.push(value_to_json(&row[idx]));
        }
        json_rows.push(json_row);
    }

    (columns, json_rows)
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::NULL => serde_json::Value::Null,
        Value::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => {
                // numeric-looking DECIMAL columns arrive as bytes
                if let Ok(i) = s.parse::<i64>() {
                    serde_json::Value::from(i)
                } else if let Ok(f) = s.parse::<f64>() {
                    serde_json::json!(f)
                } else {
                    serde_json::Value::String(s.to_string())
                }
            },
            Err(_) => serde_json::Value::String(String::from_utf8_lossy(bytes).to_string()),
        },
        Value::Int(i) => serde_json::Value::from(*i),
        Value::UInt(u) => serde_json::Value::from(*u),
        Value::Float(f) => serde_json::json!(*f),
        Value::Double(d) => serde_json::json!(*d),
        Value::Date(year, month, day, hour, minute, second, _micro) => {
            if *hour == 0 && *minute == 0 && *second == 0 {
                serde_json::Value::String(format!("{:04}-{:02}-{:02}", year, month, day))
            } else {
                serde_json::Value::String(format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    year, month, day, hour, minute, second
                ))
            }
        },
        Value::Time(_neg, days, hours, minutes, seconds, _micro) => {
            let total_hours = days * 24 + (*hours as u32);
            serde_json::Value::String(format!("{}:{:02}:{:02}", total_hours, minutes, seconds))
        },
    }
}

/// Map a driver error message onto the pipeline's execution error classes.
/// The patterns cover the MySQL-protocol wording the warehouse speaks plus
/// the PostgreSQL-style wording some federated engines relay.
pub fn classify_driver_error(message: &str) -> ExecutionErrorClass {
    let lower = message.to_lowercase();

    if lower.contains("access denied") || lower.contains("permission denied") {
        ExecutionErrorClass::PermissionDenied
    } else if lower.contains("unknown column")
        || (lower.contains("does not exist") && lower.contains("column"))
    {
        ExecutionErrorClass::ColumnNotFound
    } else if lower.contains("doesn't exist")
        || (lower.contains("does not exist") && (lower.contains("table") || lower.contains("relation")))
    {
        ExecutionErrorClass::RelationNotFound
    } else if lower.contains("ambiguous") {
        ExecutionErrorClass::AmbiguousReference
    } else if lower.contains("group by") {
        ExecutionErrorClass::GroupByMissing
    } else if lower.contains("incorrect") && lower.contains("value") {
        ExecutionErrorClass::InvalidLiteral
    } else if lower.contains("type mismatch")
        || lower.contains("cannot be cast")
        || lower.contains("invalid type")
        || lower.contains("operand should contain")
    {
        ExecutionErrorClass::TypeMismatch
    } else if lower.contains("syntax") {
        ExecutionErrorClass::SyntaxError
    } else if lower.contains("timeout") || lower.contains("timed out") {
        ExecutionErrorClass::Timeout
    } else if lower.contains("connection") || lower.contains("connect") || lower.contains("broken pipe")
    {
        ExecutionErrorClass::Connection
    } else {
        ExecutionErrorClass::Unknown
    }
}
