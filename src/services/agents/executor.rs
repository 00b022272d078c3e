//! Query Executor agent
//!
//! Runs validated SQL on the warehouse under the tenant's read-only
//! principal, with a statement timeout, a row cap and cancellation that
//! reaches the driver. Concurrency across requests is bounded by a shared
//! semaphore.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::{Agent, AgentHealth, ExecuteQuery, ExecutionErrorClass, PipelineError};
use crate::models::{QueryResult, UserContext};
use crate::services::warehouse::{WarehousePoolManager, classify_driver_error, rows_to_json};

pub struct WarehouseExecutor {
    pools: Arc<WarehousePoolManager>,
    query_permits: Arc<Semaphore>,
    max_rows: usize,
    statement_timeout: Duration,
}

impl WarehouseExecutor {
    pub fn new(pools: Arc<WarehousePoolManager>, max_rows: usize, statement_timeout_ms: u64) -> Self {
        let permits = pools.max_concurrent_queries().max(1);
        Self {
            pools,
            query_permits: Arc::new(Semaphore::new(permits)),
            max_rows,
            statement_timeout: Duration::from_millis(statement_timeout_ms),
        }
    }
}

#[async_trait]
impl Agent for WarehouseExecutor {
    fn id(&self) -> &'static str {
        "query_executor"
    }

    fn name(&self) -> &'static str {
        "Query Executor"
    }

    async fn health(&self) -> AgentHealth {
        let pool = match self.pools.pool_for_tenant("") {
            Ok(pool) => pool,
            Err(e) => return AgentHealth::unhealthy(e.to_string()),
        };
        match tokio::time::timeout(Duration::from_secs(2), pool.get_conn()).await {
            Ok(Ok(_conn)) => AgentHealth::healthy(),
            Ok(Err(e)) => AgentHealth::unhealthy(format!("warehouse unreachable: {}", e)),
            Err(_) => AgentHealth::degraded("warehouse connection slow"),
        }
    }
}

#[async_trait]
impl ExecuteQuery for WarehouseExecutor {
    async fn execute(
        &self,
        sql: &str,
        params: &[String],
        ctx: &UserContext,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, PipelineError> {
        let permit = tokio::select! {
            permit = self.query_permits.clone().acquire_owned() => permit
                .map_err(|_| PipelineError::Internal("query semaphore closed".to_string()))?,
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
        };

        let pool = self.pools.pool_for_tenant(&ctx.tenant_id)?;
        let mut conn = tokio::select! {
            conn = pool.get_conn() => conn.map_err(|e| PipelineError::ExecutionFailure {
                class: ExecutionErrorClass::Connection,
                message: format!("failed to obtain warehouse connection: {}", e),
            })?,
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
        };

        let capped_sql = apply_row_cap(sql, self.max_rows);
        tracing::debug!(
            "Executing warehouse query for tenant {} (request {}): {}",
            ctx.tenant_id,
            ctx.request_id,
            capped_sql
        );

        let start = Instant::now();
        let query_future = async {
            if params.is_empty() {
                conn.query::<mysql_async::Row, _>(capped_sql.as_str()).await
            } else {
                let values: Vec<mysql_async::Value> = params
                    .iter()
                    .map(|p| mysql_async::Value::Bytes(p.as_bytes().to_vec()))
                    .collect();
                conn.exec::<mysql_async::Row, _, _>(capped_sql.as_str(), values).await
            }
        };

        let rows = tokio::select! {
            result = tokio::time::timeout(self.statement_timeout, query_future) => {
                match result {
                    Ok(Ok(rows)) => rows,
                    Ok(Err(e)) => {
                        let message = e.to_string();
                        let class = classify_driver_error(&message);
                        tracing::warn!("Warehouse query failed ({:?}): {}", class, message);
                        return Err(match class {
                            ExecutionErrorClass::Timeout => PipelineError::ExecutionTimeout(
                                self.statement_timeout.as_millis() as u64,
                            ),
                            class => PipelineError::ExecutionFailure { class, message },
                        });
                    },
                    Err(_elapsed) => {
                        return Err(PipelineError::ExecutionTimeout(
                            self.statement_timeout.as_millis() as u64,
                        ));
                    },
                }
            },
            // dropping the connection aborts the in-flight cursor on the wire
            _ = cancel.cancelled() => {
                tracing::debug!("Query cancelled for request {}", ctx.request_id);
                return Err(PipelineError::Cancelled);
            },
        };
        let execution_time_ms = start.elapsed().as_millis() as u64;
        drop(permit);

        let (columns, mut json_rows) = rows_to_json(rows);
        let truncated = json_rows.len() > self.max_rows;
        if truncated {
            json_rows.truncate(self.max_rows);
        }
        let row_count = json_rows.len();

        tracing::debug!(
            "Query returned {} rows in {} ms (truncated: {})",
            row_count,
            execution_time_ms,
            truncated
        );

        Ok(QueryResult { columns, rows: json_rows, row_count, truncated, execution_time_ms })
    }
}

/// Cap the result size at the driver: fetch one row past the cap so
/// truncation is observable, unless the statement already limits itself.
fn apply_row_cap(sql: &str, max_rows: usize) -> String {
    let trimmed = sql.trim().trim_end_matches(';');
    if trimmed.to_uppercase().contains("LIMIT") {
        return trimmed.to_string();
    }
    format!("{} LIMIT {}", trimmed, max_rows + 1)
}
