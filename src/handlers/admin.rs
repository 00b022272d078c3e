use std::sync::Arc;

use axum::{Json, extract::State};
use serde::Serialize;
use utoipa::ToSchema;

use crate::AppState;
use crate::models::UserContext;
use crate::utils::{ApiError, ApiResult};

#[derive(Debug, Serialize, ToSchema)]
pub struct RefreshResponse {
    pub reloaded: usize,
}

const ADMIN_ROLE: &str = "admin";

fn require_admin(ctx: &UserContext) -> ApiResult<()> {
    if ctx.roles.contains(ADMIN_ROLE) {
        Ok(())
    } else {
        Err(ApiError::forbidden("Administrator role required"))
    }
}

// Reload the glossary snapshot from the metadata store
#[utoipa::path(
    post,
    path = "/v1/admin/glossary/refresh",
    responses(
        (status = 200, description = "Glossary reloaded", body = RefreshResponse),
        (status = 403, description = "Administrator role required")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Admin"
)]
pub async fn refresh_glossary(
    State(state): State<Arc<AppState>>,
    axum::extract::Extension(ctx): axum::extract::Extension<UserContext>,
) -> ApiResult<Json<RefreshResponse>> {
    require_admin(&ctx)?;
    let reloaded = state.glossary.refresh().await?;
    tracing::info!("Glossary refreshed by {} ({} entries)", ctx.user_id, reloaded);
    Ok(Json(RefreshResponse { reloaded }))
}

// Reload the schema catalog snapshot written by the offline indexer
#[utoipa::path(
    post,
    path = "/v1/admin/schema/refresh",
    responses(
        (status = 200, description = "Schema catalog reloaded", body = RefreshResponse),
        (status = 403, description = "Administrator role required")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Admin"
)]
pub async fn refresh_schema(
    State(state): State<Arc<AppState>>,
    axum::extract::Extension(ctx): axum::extract::Extension<UserContext>,
) -> ApiResult<Json<RefreshResponse>> {
    require_admin(&ctx)?;
    let reloaded = state.schema_catalog.refresh().await?;
    tracing::info!("Schema catalog refreshed by {} ({} tables)", ctx.user_id, reloaded);
    Ok(Json(RefreshResponse { reloaded }))
}
