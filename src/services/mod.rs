pub mod agents;
pub mod glossary;
pub mod llm;
pub mod policy;
pub mod review_queue;
pub mod schema_catalog;
pub mod session_store;
pub mod stream_hub;
pub mod supervisor;
pub mod warehouse;

pub use agents::{
    AgentRegistry, AgentReport, AgentStatus, ConfidenceScorer, LanguageDetector, PipelineError,
    QueryTranslator, SchemaRetriever, SqlCorrector, SqlValidator, TemplateSqlGenerator,
    TerminologyNormalizer, VisualizationRouter, WarehouseExecutor,
};
pub use glossary::GlossaryService;
pub use llm::{LlmBackendAgent, LlmClient, LlmError};
pub use policy::{PolicyEngine, StaticPolicyEngine};
pub use review_queue::ReviewQueue;
pub use schema_catalog::SchemaCatalogService;
pub use session_store::{SessionStore, start_session_sweep_task};
pub use stream_hub::StreamHub;
pub use supervisor::{Supervisor, SupervisorDeps};
pub use warehouse::WarehousePoolManager;
