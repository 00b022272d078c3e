//! Pipeline Supervisor / Streamer
//!
//! Drives the staged agent pipeline for one request, emits the progressive
//! event stream, enforces the policy gate, applies the bounded correction
//! loop, and records completed turns on the session. Cancellation is
//! observed at every stage boundary and inside every blocking call.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::models::{
    ConversationTurn, GeneratedSql, Locale, ProcessedQuery, QueryResult, RankedDescriptor,
    ResultData, RoutingDecision, SessionContext, StreamEvent, UserContext,
};
use crate::services::agents::{
    ConfidenceScorer, ExecuteQuery, ExecutionErrorClass, GenerateSql, LanguageDetector,
    PipelineError, QueryTranslator, SchemaRetriever, SqlCorrector, SqlValidator,
    TerminologyNormalizer, VisualizationRouter,
    confidence::ScoreInput, sql_generator::classify_intent,
};
use crate::services::policy::{PolicyDecision, PolicyEngine, PolicyRequest, WAREHOUSE_QUERY_RESOURCE};
use crate::services::review_queue::ReviewQueue;
use crate::services::session_store::SessionStore;
use crate::utils::ErrorCode;

/// Pipeline stages, in transition order. `Correcting` is the only stage that
/// loops back (to `Validating`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Received,
    Detecting,
    Translating,
    Normalizing,
    RetrievingSchema,
    GeneratingSql,
    Validating,
    Executing,
    Correcting,
    RoutingViz,
    Scoring,
    EmittingResult,
}

impl Stage {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "RECEIVED",
            Self::Detecting => "DETECTING",
            Self::Translating => "TRANSLATING",
            Self::Normalizing => "NORMALIZING",
            Self::RetrievingSchema => "RETRIEVING_SCHEMA",
            Self::GeneratingSql => "GENERATING_SQL",
            Self::Validating => "VALIDATING",
            Self::Executing => "EXECUTING",
            Self::Correcting => "CORRECTING",
            Self::RoutingViz => "ROUTING_VIZ",
            Self::Scoring => "SCORING",
            Self::EmittingResult => "EMITTING_RESULT",
        }
    }
}

/// Everything the supervisor orchestrates. Generator and executor are trait
/// objects so LLM variants and test doubles slot in without touching the
/// pipeline.
pub struct SupervisorDeps {
    pub language: Arc<LanguageDetector>,
    pub translator: Arc<QueryTranslator>,
    pub normalizer: Arc<TerminologyNormalizer>,
    pub retriever: Arc<SchemaRetriever>,
    pub generator: Arc<dyn GenerateSql>,
    pub validator: Arc<SqlValidator>,
    pub corrector: Arc<SqlCorrector>,
    pub executor: Arc<dyn ExecuteQuery>,
    pub viz_router: Arc<VisualizationRouter>,
    pub scorer: Arc<ConfidenceScorer>,
    pub policy: Arc<dyn PolicyEngine>,
    pub sessions: Arc<SessionStore>,
    pub review_queue: Arc<ReviewQueue>,
}

pub struct Supervisor {
    deps: SupervisorDeps,
    cfg: PipelineConfig,
}

impl Supervisor {
    pub fn new(deps: SupervisorDeps, cfg: PipelineConfig) -> Self {
        Self { deps, cfg }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.deps.sessions
    }

    /// Run the pipeline for one utterance, emitting events on `tx`. The
    /// stream ends when this returns and the sender is dropped. Cancellation
    /// suppresses all further events including the terminal one.
    pub async fn run(
        &self,
        ctx: UserContext,
        utterance: String,
        tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) {
        match self.drive(&ctx, &utterance, &tx, &cancel).await {
            Ok(()) => {},
            Err(PipelineError::Cancelled) => {
                tracing::info!(
                    "Request {} cancelled (trace {})",
                    ctx.request_id,
                    ctx.trace_id
                );
            },
            Err(err) => {
                tracing::warn!(
                    "Request {} failed (trace {}): {}",
                    ctx.request_id,
                    ctx.trace_id,
                    err
                );
                if let Some(event) = error_event(&err) {
                    let _ = tx.send(event).await;
                }
            },
        }
    }

    async fn drive(
        &self,
        ctx: &UserContext,
        utterance: &str,
        tx: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let session_id = ctx
            .session_id
            .ok_or_else(|| PipelineError::Internal("request context has no session".to_string()))?;
        let session = self.deps.sessions.get(session_id).ok_or_else(|| {
            PipelineError::Internal("session disappeared before the pipeline started".to_string())
        })?;

        self.transition(ctx, Stage::Received, cancel)?;

        // L: locale detection
        self.transition(ctx, Stage::Detecting, cancel)?;
        let detection = self.deps.language.detect(utterance, Some(ctx.locale))?;

        // T: translation (Arabic only; English is normalized in place)
        if detection.locale == Locale::Ar {
            self.transition(ctx, Stage::Translating, cancel)?;
        }
        let translated = self.deps.translator.translate(utterance, detection.locale)?;

        // N: terminology normalization
        self.transition(ctx, Stage::Normalizing, cancel)?;
        self.emit(tx, cancel, StreamEvent::Thinking {
            message: "Normalizing domain terminology".to_string(),
        })
        .await?;
        let processed =
            self.deps
                .normalizer
                .normalize(utterance, &translated, &detection, Locale::En);

        // S: schema retrieval
        self.transition(ctx, Stage::RetrievingSchema, cancel)?;
        self.emit(tx, cancel, StreamEvent::Thinking {
            message: "Retrieving relevant schema".to_string(),
        })
        .await?;
        let retrieved = self.deps.retriever.retrieve(&processed, &ctx.tenant_id)?;

        if retrieved.is_empty() {
            tracing::debug!("Schema retrieval returned nothing for request {}", ctx.request_id);
            if self.cfg.on_empty_schema == "clarify" {
                return self.emit_clarification(ctx, &processed, &retrieved, tx, cancel).await;
            }
            // "unresolved": fall through so the generator raises
            // UnresolvedIntent, which converts to a clarification below
        }

        // G: SQL generation, with the session's rolling context for follow-ups
        self.transition(ctx, Stage::GeneratingSql, cancel)?;
        let session_context: SessionContext = session.lock().await.current_context.clone();
        let generated = match self
            .deps
            .generator
            .generate(&processed, &retrieved, Some(&session_context))
            .await
        {
            Ok(generated) => generated,
            Err(PipelineError::UnresolvedIntent(reason)) => {
                tracing::debug!("Unresolved intent for request {}: {}", ctx.request_id, reason);
                return self.emit_clarification(ctx, &processed, &retrieved, tx, cancel).await;
            },
            Err(err) => return Err(err),
        };

        // V -> policy -> X with bounded correction loop
        let (final_sql, final_generated, result, validator_warnings) = self
            .validate_and_execute(ctx, generated, &retrieved, tx, cancel)
            .await?;

        // R: visualization routing
        self.transition(ctx, Stage::RoutingViz, cancel)?;
        let intent = classify_intent(&processed);
        let visualization = self
            .deps
            .viz_router
            .route(&result, &processed, intent, ctx);

        // F: confidence scoring
        self.transition(ctx, Stage::Scoring, cancel)?;
        let matched_tables = final_generated
            .tables_used
            .iter()
            .filter(|t| {
                retrieved
                    .iter()
                    .any(|r| r.descriptor.table.eq_ignore_ascii_case(t))
            })
            .count();
        let score = self.deps.scorer.score(&ScoreInput {
            query: &processed,
            generated: Some(&final_generated),
            result: Some(&result),
            intent,
            attempt_count: final_generated.attempt,
            validator_warnings: &validator_warnings,
            validation_passed: true,
            retrieved_count: retrieved.len(),
            matched_tables,
        });
        tracing::info!(
            "Request {} scored {:.1} ({:?}) after {} attempt(s)",
            ctx.request_id,
            score.score,
            score.routing_decision,
            final_generated.attempt + 1
        );

        if score.routing_decision == RoutingDecision::Clarify {
            // HITL: the answer is suppressed, the user is asked to narrow down
            return self.emit_clarification(ctx, &processed, &retrieved, tx, cancel).await;
        }

        let mut warnings = validator_warnings.clone();
        if score.routing_decision == RoutingDecision::Warning {
            warnings.push(
                "Low confidence answer; it has been queued for human review".to_string(),
            );
            self.deps
                .review_queue
                .enqueue(ctx, session_id, utterance, &final_sql, &score)
                .await;
        }

        // terminal: result event
        self.transition(ctx, Stage::EmittingResult, cancel)?;
        self.emit(tx, cancel, StreamEvent::Result {
            chart_kind: visualization.chart_kind.as_str().to_string(),
            data: ResultData {
                columns: result.columns.clone(),
                rows: result.rows.clone(),
                row_count: result.row_count,
                truncated: result.truncated,
            },
            visualization: visualization.clone(),
            confidence: score.score,
            warnings,
            evidence: None,
        })
        .await?;

        // completed turn onto the session ring (never on cancellation)
        let turn = ConversationTurn {
            id: Uuid::new_v4(),
            query: utterance.to_string(),
            sql: final_sql,
            visualization: visualization.chart_kind,
            confidence: score.score,
            timestamp: chrono::Utc::now(),
        };
        let tables: Vec<String> = final_generated.tables_used.iter().cloned().collect();
        let mut session_guard = session.lock().await;
        session_guard.push_turn(turn, self.cfg.turn_ring_capacity, tables);

        Ok(())
    }

    /// Validation, policy gate and execution with the bounded correction
    /// loop: `retry_attempts` corrections after the initial attempt, each
    /// re-validated and re-gated, with exponential backoff between attempts.
    async fn validate_and_execute(
        &self,
        ctx: &UserContext,
        generated: GeneratedSql,
        retrieved: &[RankedDescriptor],
        tx: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
    ) -> Result<(String, GeneratedSql, QueryResult, Vec<String>), PipelineError> {
        let max_attempts = 1 + self.cfg.retry_attempts;
        let mut current = generated;

        loop {
            self.transition(ctx, Stage::Validating, cancel)?;
            let validation = self.deps.validator.validate(&current, retrieved);
            if !validation.valid {
                let reason = validation
                    .blocked_reason
                    .unwrap_or_else(|| "query rejected by validator".to_string());
                return Err(PipelineError::ValidationBlocked(reason));
            }
            let exec_sql = validation
                .sanitized_sql
                .clone()
                .unwrap_or_else(|| current.sql.clone());

            self.emit(tx, cancel, StreamEvent::SqlPreview { sql: exec_sql.clone() })
                .await?;

            // policy gate guards every entry into EXECUTING
            let decision = self
                .deps
                .policy
                .evaluate(&PolicyRequest {
                    user_id: &ctx.user_id,
                    roles: &ctx.roles,
                    tenant_id: &ctx.tenant_id,
                    resource: WAREHOUSE_QUERY_RESOURCE,
                    sql: &exec_sql,
                })
                .await?;
            if decision == PolicyDecision::Deny {
                tracing::warn!(
                    "Policy denied warehouse query for user {} (request {})",
                    ctx.user_id,
                    ctx.request_id
                );
                return Err(PipelineError::PolicyDenied);
            }

            self.transition(ctx, Stage::Executing, cancel)?;
            match self
                .deps
                .executor
                .execute(&exec_sql, &current.params, ctx, cancel)
                .await
            {
                Ok(result) => {
                    return Ok((exec_sql, current, result, validation.warnings));
                },
                Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(err) => {
                    let (class, message) = match &err {
                        PipelineError::ExecutionTimeout(ms) => (
                            ExecutionErrorClass::Timeout,
                            format!("statement timeout after {} ms", ms),
                        ),
                        PipelineError::ExecutionFailure { class, message } => {
                            (*class, message.clone())
                        },
                        _ => return Err(err),
                    };

                    if current.attempt + 1 >= max_attempts {
                        tracing::warn!(
                            "Correction budget exhausted for request {} after {} attempts",
                            ctx.request_id,
                            current.attempt + 1
                        );
                        // exhausted transients keep their retryable surface
                        return Err(if class.is_transient() {
                            PipelineError::ExecutionFailure { class, message }
                        } else {
                            PipelineError::CorrectionExhausted(current.attempt + 1)
                        });
                    }

                    self.transition(ctx, Stage::Correcting, cancel)?;
                    current = self
                        .deps
                        .corrector
                        .correct(&current, class, &message, retrieved)?;

                    let backoff = backoff_delay(
                        current.attempt,
                        self.cfg.retry_base_backoff_ms,
                        self.cfg.retry_max_backoff_ms,
                    );
                    tracing::debug!(
                        "Retrying request {} (attempt {}) after {:?}",
                        ctx.request_id,
                        current.attempt,
                        backoff
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {},
                        _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                    }
                },
            }
        }
    }

    async fn emit_clarification(
        &self,
        ctx: &UserContext,
        processed: &ProcessedQuery,
        retrieved: &[RankedDescriptor],
        tx: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let options = clarification_options(retrieved);
        tracing::info!(
            "Request {} needs clarification ({} mappings, {} tables retrieved)",
            ctx.request_id,
            processed.applied_mappings.len(),
            retrieved.len()
        );
        self.emit(tx, cancel, StreamEvent::Clarification {
            message: "I need a bit more detail to answer that precisely. What would you like to \
                      see?"
                .to_string(),
            options,
        })
        .await
    }

    fn transition(
        &self,
        ctx: &UserContext,
        stage: Stage,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        tracing::debug!("Request {} -> {}", ctx.request_id, stage.as_str());
        Ok(())
    }

    async fn emit(
        &self,
        tx: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
        event: StreamEvent,
    ) -> Result<(), PipelineError> {
        tokio::select! {
            sent = tx.send(event) => sent.map_err(|_| PipelineError::Cancelled),
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        }
    }
}

fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    Duration::from_millis((base_ms.saturating_mul(1u64 << exponent)).min(max_ms))
}

/// Suggestions offered with a clarification prompt; seeded from the
/// retrieved tables, with generic prompts as a floor so the list is never
/// empty.
fn clarification_options(retrieved: &[RankedDescriptor]) -> Vec<String> {
    let mut options: Vec<String> = retrieved
        .iter()
        .take(3)
        .map(|r| format!("Ask about {}", r.descriptor.table.replace('_', " ")))
        .collect();
    options.push("Total revenue for a specific month".to_string());
    options.push("Patient visits trend over recent months".to_string());
    options
}

/// Map a terminal pipeline error onto the single `error` event for the
/// stream. Cancellation maps to nothing: after cancellation detection no
/// event is emitted at all.
fn error_event(err: &PipelineError) -> Option<StreamEvent> {
    let (code, message, retry_after) = match err {
        PipelineError::Cancelled => return None,
        PipelineError::EmptyInput => (
            ErrorCode::InvalidRequest,
            "The query text is empty".to_string(),
            None,
        ),
        PipelineError::UnresolvedIntent(reason) => {
            (ErrorCode::InvalidRequest, reason.clone(), None)
        },
        PipelineError::ValidationBlocked(reason) => (ErrorCode::Forbidden, reason.clone(), None),
        // policy rationale is never disclosed to the client
        PipelineError::PolicyDenied => (ErrorCode::Forbidden, "Access denied".to_string(), None),
        PipelineError::SchemaUnavailable(_) | PipelineError::ExecutionTimeout(_) => (
            ErrorCode::InternalError,
            "The query could not be completed; please retry".to_string(),
            Some(5),
        ),
        PipelineError::ExecutionFailure { class, .. } if class.is_transient() => (
            ErrorCode::InternalError,
            "The query could not be completed; please retry".to_string(),
            Some(5),
        ),
        // opaque by design: correction details stay in the logs
        PipelineError::CorrectionExhausted(_) => (
            ErrorCode::InternalError,
            "The query could not be completed".to_string(),
            None,
        ),
        PipelineError::LlmUnavailable(_) => (
            ErrorCode::LlmUnavailable,
            "The language model backend is unavailable".to_string(),
            None,
        ),
        PipelineError::ExecutionFailure { .. } | PipelineError::Internal(_) => (
            ErrorCode::InternalError,
            "The query could not be completed".to_string(),
            None,
        ),
    };

    Some(StreamEvent::Error {
        code: code.as_str().to_string(),
        message,
        retry_after,
    })
}
