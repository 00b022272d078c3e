use axum::{
    Router,
    middleware as axum_middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use medisync::config::Config;
use medisync::db;
use medisync::services::agents::{
    Agent, ConfidenceScorer, LanguageDetector, QueryTranslator, SchemaRetriever, SqlCorrector,
    SqlValidator, TemplateSqlGenerator, TerminologyNormalizer, VisualizationRouter,
    WarehouseExecutor,
};
use medisync::services::{
    AgentRegistry, GlossaryService, ReviewQueue, SchemaCatalogService, SessionStore, StreamHub,
    Supervisor, SupervisorDeps, WarehousePoolManager, policy, start_session_sweep_task,
};
use medisync::utils::JwtUtil;
use medisync::{AppState, handlers, middleware};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::chat::chat,
        handlers::chat::stream_session,
        handlers::health::agents_health,
        handlers::admin::refresh_glossary,
        handlers::admin::refresh_schema,
    ),
    components(
        schemas(
            handlers::chat::ChatRequest,
            handlers::chat::TurnContextHint,
            handlers::health::AgentsHealthResponse,
            handlers::health::AgentHealthEntry,
            handlers::admin::RefreshResponse,
        )
    ),
    tags(
        (name = "Chat", description = "Conversational analytics endpoints"),
        (name = "Health", description = "Agent health"),
        (name = "Admin", description = "Snapshot administration"),
    ),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.as_mut().unwrap();
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(utoipa::openapi::security::Http::new(
                utoipa::openapi::security::HttpAuthScheme::Bearer,
            )),
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    let _log_guard = if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("medisync.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
        Some(guard)
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
        None
    };

    tracing::info!("MediSync orchestration core starting up");

    let pool = db::create_pool(&config.database.url).await?;
    db::init_schema(&pool).await?;
    db::seed_defaults(&pool).await?;
    tracing::info!("Metadata store ready");

    let jwt_util = Arc::new(JwtUtil::new(&config.auth.jwt_secret));

    let glossary = Arc::new(GlossaryService::new(pool.clone()));
    glossary.load().await.map_err(|e| format!("Failed to load glossary: {}", e))?;

    let schema_catalog = Arc::new(SchemaCatalogService::new(pool.clone()));
    schema_catalog
        .load()
        .await
        .map_err(|e| format!("Failed to load schema catalog: {}", e))?;

    let session_store = Arc::new(SessionStore::new(config.session.clone()));
    let stream_hub = Arc::new(StreamHub::new());
    let review_queue = Arc::new(ReviewQueue::new(pool.clone()));
    let warehouse_pools = Arc::new(WarehousePoolManager::new(config.warehouse.clone()));
    let policy_engine = policy::from_config(&config.policy);
    tracing::info!("Policy gate mode: {}", policy_engine.mode());

    // pipeline agents
    let language = Arc::new(LanguageDetector::new());
    let translator = Arc::new(QueryTranslator::new());
    let normalizer = Arc::new(TerminologyNormalizer::new(Arc::clone(&glossary)));
    let retriever = Arc::new(SchemaRetriever::new(
        Arc::clone(&schema_catalog),
        config.pipeline.schema_top_k,
    ));
    let generator = Arc::new(TemplateSqlGenerator::new());
    let validator = Arc::new(SqlValidator::new());
    let corrector = Arc::new(SqlCorrector::new());
    let executor = Arc::new(WarehouseExecutor::new(
        Arc::clone(&warehouse_pools),
        config.pipeline.max_rows,
        config.pipeline.statement_timeout_ms,
    ));
    let viz_router = Arc::new(VisualizationRouter::new(config.pipeline.currency_symbol.clone()));
    let scorer = Arc::new(ConfidenceScorer::new(
        config.pipeline.confidence_normal_threshold,
        config.pipeline.confidence_clarify_threshold,
    ));

    let mut registry = AgentRegistry::default();
    registry.register(language.clone() as Arc<dyn Agent>);
    registry.register(translator.clone() as Arc<dyn Agent>);
    registry.register(normalizer.clone() as Arc<dyn Agent>);
    registry.register(retriever.clone() as Arc<dyn Agent>);
    registry.register(generator.clone() as Arc<dyn Agent>);
    registry.register(validator.clone() as Arc<dyn Agent>);
    registry.register(corrector.clone() as Arc<dyn Agent>);
    registry.register(executor.clone() as Arc<dyn Agent>);
    registry.register(viz_router.clone() as Arc<dyn Agent>);
    registry.register(scorer.clone() as Arc<dyn Agent>);
    if config.llm.enabled {
        let llm_client = Arc::new(medisync::services::LlmClient::new(config.llm.clone()));
        registry.register(Arc::new(medisync::services::LlmBackendAgent::new(llm_client)));
    }
    let registry = Arc::new(registry);
    tracing::info!("{} pipeline agents registered", registry.len());

    let supervisor = Arc::new(Supervisor::new(
        SupervisorDeps {
            language,
            translator,
            normalizer,
            retriever,
            generator,
            validator,
            corrector,
            executor,
            viz_router,
            scorer,
            policy: policy_engine,
            sessions: Arc::clone(&session_store),
            review_queue,
        },
        config.pipeline.clone(),
    ));

    // periodic TTL eviction of idle sessions
    let _session_sweep_shutdown = start_session_sweep_task(
        Arc::clone(&session_store),
        config.session.sweep_interval_secs,
    );

    let app_state = Arc::new(AppState {
        db: pool,
        config: config.clone(),
        jwt_util: Arc::clone(&jwt_util),
        glossary,
        schema_catalog,
        session_store,
        stream_hub,
        registry,
        supervisor,
    });

    let auth_state = middleware::AuthState { jwt_util };

    let protected_routes = Router::new()
        .route("/v1/chat", post(handlers::chat::chat))
        .route("/v1/stream/:session_id", get(handlers::chat::stream_session))
        .route("/v1/agents/health", get(handlers::health::agents_health))
        .route("/v1/admin/glossary/refresh", post(handlers::admin::refresh_glossary))
        .route("/v1/admin/schema/refresh", post(handlers::admin::refresh_schema))
        .with_state(Arc::clone(&app_state))
        .layer(axum_middleware::from_fn_with_state(auth_state, middleware::auth_middleware));

    let health_routes = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check));

    let app = Router::new()
        .merge(SwaggerUi::new("/api-docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(protected_routes)
        .merge(health_routes)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("API documentation available at http://{}/api-docs", addr);
    tracing::info!("MediSync core is ready to serve requests");

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn ready_check() -> &'static str {
    "READY"
}
