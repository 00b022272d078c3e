//! Shared fixtures: an in-memory metadata store with the seed glossary and
//! catalog, programmable executor and generator doubles, and a pipeline
//! harness that collects the emitted event stream.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{PipelineConfig, SessionConfig};
use crate::db;
use crate::models::{
    CalendarSystem, GeneratedSql, Locale, ProcessedQuery, QueryResult, RankedDescriptor,
    SessionContext, StreamEvent, UserContext,
};
use crate::services::agents::{
    Agent, ConfidenceScorer, ExecuteQuery, GenerateSql, LanguageDetector, PipelineError,
    QueryTranslator, SchemaRetriever, SqlCorrector, SqlValidator, TemplateSqlGenerator,
    TerminologyNormalizer, VisualizationRouter,
};
use crate::services::glossary::GlossaryService;
use crate::services::policy::StaticPolicyEngine;
use crate::services::review_queue::ReviewQueue;
use crate::services::schema_catalog::SchemaCatalogService;
use crate::services::session_store::SessionStore;
use crate::services::supervisor::{Supervisor, SupervisorDeps};

// ============================================================================
// Executor doubles
// ============================================================================

/// Replays a queue of canned responses and records every executed statement.
pub struct FakeExecutor {
    responses: Mutex<VecDeque<Result<QueryResult, PipelineError>>>,
    executed: Mutex<Vec<String>>,
}

impl FakeExecutor {
    pub fn with_responses(responses: Vec<Result<QueryResult, PipelineError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().collect()),
            executed: Mutex::new(Vec::new()),
        })
    }

    pub fn single_kpi_row() -> Arc<Self> {
        Self::with_responses(vec![Ok(kpi_result(125_000.5))])
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Agent for FakeExecutor {
    fn id(&self) -> &'static str {
        "query_executor"
    }
    fn name(&self) -> &'static str {
        "Fake Query Executor"
    }
}

#[async_trait]
impl ExecuteQuery for FakeExecutor {
    async fn execute(
        &self,
        sql: &str,
        _params: &[String],
        _ctx: &UserContext,
        _cancel: &CancellationToken,
    ) -> Result<QueryResult, PipelineError> {
        self.executed.lock().unwrap().push(sql.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(kpi_result(1.0)))
    }
}

/// Parks until the request is cancelled; used for the cancellation scenario.
pub struct BlockingExecutor {
    pub started: Arc<Notify>,
    pub observed_cancel: Arc<AtomicBool>,
}

impl BlockingExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started: Arc::new(Notify::new()),
            observed_cancel: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[async_trait]
impl Agent for BlockingExecutor {
    fn id(&self) -> &'static str {
        "query_executor"
    }
    fn name(&self) -> &'static str {
        "Blocking Query Executor"
    }
}

#[async_trait]
impl ExecuteQuery for BlockingExecutor {
    async fn execute(
        &self,
        _sql: &str,
        _params: &[String],
        _ctx: &UserContext,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, PipelineError> {
        self.started.notify_one();
        cancel.cancelled().await;
        self.observed_cancel.store(true, Ordering::SeqCst);
        Err(PipelineError::Cancelled)
    }
}

// ============================================================================
// Generator double
// ============================================================================

/// Emits a fixed statement regardless of the question.
pub struct FixedSqlGenerator {
    sql: String,
    tables: BTreeSet<String>,
}

impl FixedSqlGenerator {
    pub fn new(sql: &str, tables: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            sql: sql.to_string(),
            tables: tables.iter().map(|t| t.to_string()).collect(),
        })
    }
}

#[async_trait]
impl Agent for FixedSqlGenerator {
    fn id(&self) -> &'static str {
        "sql_generator"
    }
    fn name(&self) -> &'static str {
        "Fixed SQL Generator"
    }
}

#[async_trait]
impl GenerateSql for FixedSqlGenerator {
    async fn generate(
        &self,
        _query: &ProcessedQuery,
        _schema_context: &[RankedDescriptor],
        _session_context: Option<&SessionContext>,
    ) -> Result<GeneratedSql, PipelineError> {
        Ok(GeneratedSql {
            sql: self.sql.clone(),
            tables_used: self.tables.clone(),
            parameterized: false,
            params: Vec::new(),
            model_confidence: 0.95,
            explanation: "fixed test statement".to_string(),
            attempt: 0,
        })
    }
}

// ============================================================================
// Results
// ============================================================================

pub fn kpi_result(value: f64) -> QueryResult {
    QueryResult {
        columns: vec!["total_amount".to_string()],
        rows: vec![vec![json!(value)]],
        row_count: 1,
        truncated: false,
        execution_time_ms: 25,
    }
}

pub fn trend_result() -> QueryResult {
    let rows: Vec<Vec<serde_json::Value>> = (1..=6)
        .map(|m| vec![json!(format!("2026-{:02}", m)), json!(100 + m * 10)])
        .collect();
    QueryResult {
        columns: vec!["period".to_string(), "metric_value".to_string()],
        row_count: rows.len(),
        rows,
        truncated: false,
        execution_time_ms: 40,
    }
}

pub fn execution_error(class: crate::services::agents::ExecutionErrorClass, message: &str) -> Result<QueryResult, PipelineError> {
    Err(PipelineError::ExecutionFailure { class, message: message.to_string() })
}

// ============================================================================
// Harness
// ============================================================================

pub struct TestHarness {
    pub supervisor: Arc<Supervisor>,
    pub sessions: Arc<SessionStore>,
    pub review_queue: Arc<ReviewQueue>,
}

pub async fn harness(
    executor: Arc<dyn ExecuteQuery>,
    generator: Option<Arc<dyn GenerateSql>>,
    policy_allow: bool,
    cfg: Option<PipelineConfig>,
) -> TestHarness {
    let pool = db::create_pool("sqlite::memory:").await.unwrap();
    db::init_schema(&pool).await.unwrap();
    db::seed_defaults(&pool).await.unwrap();

    let glossary = Arc::new(GlossaryService::new(pool.clone()));
    glossary.load().await.unwrap();
    let catalog = Arc::new(SchemaCatalogService::new(pool.clone()));
    catalog.load().await.unwrap();

    let cfg = cfg.unwrap_or_default();
    let sessions = Arc::new(SessionStore::new(SessionConfig::default()));
    let review_queue = Arc::new(ReviewQueue::new(pool.clone()));

    let deps = SupervisorDeps {
        language: Arc::new(LanguageDetector::new()),
        translator: Arc::new(QueryTranslator::new()),
        normalizer: Arc::new(TerminologyNormalizer::new(Arc::clone(&glossary))),
        retriever: Arc::new(SchemaRetriever::new(Arc::clone(&catalog), cfg.schema_top_k)),
        generator: generator.unwrap_or_else(|| Arc::new(TemplateSqlGenerator::new())),
        validator: Arc::new(SqlValidator::new()),
        corrector: Arc::new(SqlCorrector::new()),
        executor,
        viz_router: Arc::new(VisualizationRouter::new(cfg.currency_symbol.clone())),
        scorer: Arc::new(ConfidenceScorer::new(
            cfg.confidence_normal_threshold,
            cfg.confidence_clarify_threshold,
        )),
        policy: Arc::new(StaticPolicyEngine::new(policy_allow)),
        sessions: Arc::clone(&sessions),
        review_queue: Arc::clone(&review_queue),
    };

    TestHarness {
        supervisor: Arc::new(Supervisor::new(deps, cfg)),
        sessions,
        review_queue,
    }
}

pub fn test_ctx(locale: Locale) -> UserContext {
    UserContext {
        user_id: "analyst-1".to_string(),
        tenant_id: "clinic-a".to_string(),
        session_id: None,
        locale,
        timezone: "Asia/Riyadh".to_string(),
        calendar: if locale == Locale::Ar {
            CalendarSystem::Hijri
        } else {
            CalendarSystem::Gregorian
        },
        roles: BTreeSet::from(["analyst".to_string()]),
        cost_centres: BTreeSet::new(),
        request_id: Uuid::new_v4(),
        trace_id: Uuid::new_v4(),
    }
}

/// Run one utterance through the pipeline, collecting every emitted event.
pub async fn run_pipeline(
    harness: &TestHarness,
    utterance: &str,
    locale: Locale,
) -> (Vec<StreamEvent>, Uuid) {
    run_pipeline_in_session(harness, utterance, locale, None).await
}

pub async fn run_pipeline_in_session(
    harness: &TestHarness,
    utterance: &str,
    locale: Locale,
    session_id: Option<Uuid>,
) -> (Vec<StreamEvent>, Uuid) {
    let base_ctx = test_ctx(locale);
    let (session_id, _session) = harness
        .sessions
        .resolve_or_create(session_id, &base_ctx.user_id, locale)
        .await;
    let ctx = base_ctx.for_request(session_id, None);

    let (tx, mut rx) = mpsc::channel(32);
    let cancel = CancellationToken::new();
    harness
        .supervisor
        .run(ctx, utterance.to_string(), tx, cancel)
        .await;

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    (events, session_id)
}

/// Every stream must be an ordered prefix of
/// `thinking* sql_preview* (result | clarification | error)` with exactly
/// one terminal event at the end.
pub fn assert_valid_event_order(events: &[StreamEvent]) {
    let mut previews_started = false;
    let mut terminal_seen = false;

    for event in events {
        assert!(!terminal_seen, "event after terminal: {:?}", event);
        match event {
            StreamEvent::Thinking { .. } => {
                assert!(!previews_started, "thinking after sql_preview");
            },
            StreamEvent::SqlPreview { .. } => {
                previews_started = true;
            },
            _ => {
                terminal_seen = true;
            },
        }
    }
    assert!(terminal_seen, "stream ended without a terminal event: {:?}", events);
}

pub fn terminal_event(events: &[StreamEvent]) -> &StreamEvent {
    events.last().expect("empty event stream")
}

pub fn sql_previews(events: &[StreamEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::SqlPreview { sql } => Some(sql.as_str()),
            _ => None,
        })
        .collect()
}
