//! MediSync AI Orchestration Core
//!
//! A staged multi-agent pipeline that turns English and Arabic business
//! questions into verified read-only warehouse queries, visualized and
//! confidence-scored, streamed progressively to the client.

use sqlx::SqlitePool;
use std::sync::Arc;

pub mod config;
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use services::supervisor::{Supervisor, SupervisorDeps};
pub use services::{
    AgentRegistry, GlossaryService, PipelineError, SchemaCatalogService, SessionStore, StreamHub,
};
pub use utils::JwtUtil;

/// Application shared state
///
/// Design Philosophy: Keep it simple - Rust's type system IS our DI container.
/// All services are wrapped in Arc for cheap cloning and thread safety.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Config,

    pub jwt_util: Arc<JwtUtil>,
    pub glossary: Arc<GlossaryService>,
    pub schema_catalog: Arc<SchemaCatalogService>,
    pub session_store: Arc<SessionStore>,
    pub stream_hub: Arc<StreamHub>,
    pub registry: Arc<AgentRegistry>,
    pub supervisor: Arc<Supervisor>,
}

#[cfg(test)]
mod tests;
