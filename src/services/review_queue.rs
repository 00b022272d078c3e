//! Human-in-the-loop review queue
//!
//! `warning`-routed answers are persisted for analyst review. The core only
//! writes; review tooling reads the table directly.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{ConfidenceScore, UserContext};

pub struct ReviewQueue {
    pool: SqlitePool,
}

impl ReviewQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Enqueue a low-confidence answer. Failures are logged, never surfaced:
    /// review capture must not break the response path.
    pub async fn enqueue(
        &self,
        ctx: &UserContext,
        session_id: Uuid,
        query: &str,
        sql: &str,
        confidence: &ConfidenceScore,
    ) {
        let insert = sqlx::query(
            r#"
            INSERT INTO review_queue
                (request_id, session_id, user_id, tenant_id, query, sql, confidence, routing)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(ctx.request_id.to_string())
        .bind(session_id.to_string())
        .bind(&ctx.user_id)
        .bind(&ctx.tenant_id)
        .bind(query)
        .bind(sql)
        .bind(confidence.score)
        .bind(confidence.routing_decision.as_str())
        .execute(&self.pool)
        .await;

        match insert {
            Ok(_) => {
                tracing::info!(
                    "Queued answer for review (request {}, score {:.1})",
                    ctx.request_id,
                    confidence.score
                );
            },
            Err(e) => {
                tracing::error!("Failed to enqueue review item for {}: {}", ctx.request_id, e);
            },
        }
    }

    pub async fn pending_count(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM review_queue")
            .fetch_one(&self.pool)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::{ConfidenceFactors, RoutingDecision};

    #[tokio::test]
    async fn enqueues_warning_answers() {
        let pool = db::create_pool("sqlite::memory:").await.unwrap();
        db::init_schema(&pool).await.unwrap();
        let queue = ReviewQueue::new(pool);

        let ctx = UserContext {
            user_id: "u-1".into(),
            tenant_id: "t-1".into(),
            session_id: None,
            locale: crate::models::Locale::En,
            timezone: "UTC".into(),
            calendar: crate::models::CalendarSystem::Gregorian,
            roles: Default::default(),
            cost_centres: Default::default(),
            request_id: Uuid::new_v4(),
            trace_id: Uuid::new_v4(),
        };
        let score = ConfidenceScore {
            score: 62.0,
            factors: ConfidenceFactors::default(),
            routing_decision: RoutingDecision::Warning,
            needs_queue: true,
        };

        queue
            .enqueue(&ctx, Uuid::new_v4(), "q", "SELECT 1", &score)
            .await;
        assert_eq!(queue.pending_count().await.unwrap(), 1);
    }
}
