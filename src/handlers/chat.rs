use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use crate::models::{Locale, StreamEvent, UserContext};
use crate::services::StreamHub;
use crate::utils::{ApiError, ApiResult};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ChatRequest {
    /// The natural-language question, English or Arabic
    #[validate(length(min = 1, max = 2000))]
    pub query: String,
    /// Caller-declared locale ("en" or "ar"); overrides the token claim
    pub locale: Option<String>,
    /// Session to continue; a new session is created when absent
    pub session_id: Option<Uuid>,
    /// Optional client-side conversation context for a fresh session
    #[serde(default)]
    pub context: Option<Vec<TurnContextHint>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TurnContextHint {
    pub query: String,
    #[serde(default)]
    pub result_summary: Option<String>,
}

/// Cancels the pipeline and releases the fan-out slot when the client goes
/// away (the SSE stream is dropped).
struct StreamGuard {
    cancel: CancellationToken,
    hub: Arc<StreamHub>,
    session_id: Uuid,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.hub.unregister(self.session_id);
    }
}

// Ask a question; the answer streams back as server-sent events
#[utoipa::path(
    post,
    path = "/v1/chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Server-sent event stream: thinking* sql_preview* (result | clarification | error)"),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "Missing or invalid token")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Chat"
)]
pub async fn chat(
    State(state): State<Arc<AppState>>,
    axum::extract::Extension(base_ctx): axum::extract::Extension<UserContext>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    request
        .validate()
        .map_err(|e| ApiError::invalid_request(format!("Invalid chat request: {}", e)))?;

    let declared_locale = match request.locale.as_deref() {
        None => None,
        Some("en") => Some(Locale::En),
        Some("ar") => Some(Locale::Ar),
        Some(other) => {
            return Err(ApiError::invalid_request(format!("Unsupported locale: {}", other)));
        },
    };

    let (session_id, session) = state
        .session_store
        .resolve_or_create(
            request.session_id,
            &base_ctx.user_id,
            declared_locale.unwrap_or(base_ctx.locale),
        )
        .await;

    // client-supplied context primes a fresh session for follow-ups
    if let Some(hints) = &request.context
        && let Some(last) = hints.last()
    {
        let mut guard = session.lock().await;
        if guard.current_context.last_query.is_none() {
            guard.current_context.last_query = Some(last.query.clone());
        }
    }

    let ctx = base_ctx.for_request(session_id, declared_locale);
    tracing::info!(
        "Chat request {} (user {}, session {}, {} chars)",
        ctx.request_id,
        ctx.user_id,
        session_id,
        request.query.len()
    );

    let (tx, rx) = mpsc::channel::<StreamEvent>(state.config.pipeline.event_buffer);
    let cancel = CancellationToken::new();
    let hub_tx = state.stream_hub.register(session_id);

    let supervisor = state.supervisor.clone();
    let pipeline_cancel = cancel.clone();
    let query = request.query.clone();
    tokio::spawn(async move {
        supervisor.run(ctx, query, tx, pipeline_cancel).await;
    });

    let guard = StreamGuard { cancel, hub: state.stream_hub.clone(), session_id };
    let stream = async_stream::stream! {
        let _guard = guard;
        let mut rx = rx;
        while let Some(event) = rx.recv().await {
            let _ = hub_tx.send(event.clone());
            let terminal = event.is_terminal();
            let data = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(Event::default().data(data));
            if terminal {
                break;
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// Attach to the live event stream of a session
#[utoipa::path(
    get,
    path = "/v1/stream/{session_id}",
    params(
        ("session_id" = Uuid, Path, description = "Session ID")
    ),
    responses(
        (status = 200, description = "Server-sent event stream of the in-flight pipeline"),
        (status = 404, description = "No active stream for this session")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Chat"
)]
pub async fn stream_session(
    State(state): State<Arc<AppState>>,
    axum::extract::Extension(ctx): axum::extract::Extension<UserContext>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    // sessions are private to their owner; a foreign id reads as absent
    let session = state
        .session_store
        .get(session_id)
        .ok_or_else(|| ApiError::not_found("No such session"))?;
    if session.lock().await.user_id != ctx.user_id {
        return Err(ApiError::not_found("No such session"));
    }

    let rx = state
        .stream_hub
        .subscribe(session_id)
        .ok_or_else(|| ApiError::not_found("No active stream for this session"))?;

    let stream = async_stream::stream! {
        let mut rx = rx;
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let terminal = event.is_terminal();
                    let data = serde_json::to_string(&event).unwrap_or_default();
                    yield Ok(Event::default().data(data));
                    if terminal {
                        break;
                    }
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("Stream attach lagged by {} events", skipped);
                    continue;
                },
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
