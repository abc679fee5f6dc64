use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{FromRequestParts, Path, State, rejection::JsonRejection},
    http::{StatusCode, header, request::Parts},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, patch, post},
};
use futures::Stream;
use serde::Deserialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use flowboard_common::models::{ChatRequest, NewTask, TaskPatch, TaskStatus};

use super::auth::{Authenticator, Identity, bearer_token};
use super::gateway::ChatGateway;
use super::relay::{build_upstream_request, relay_stream};
use super::store::{SqliteTaskStore, TaskStore};
use crate::errors::{AuthError, RelayError, StoreError};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub store: SqliteTaskStore,
    pub auth: Arc<dyn Authenticator>,
    /// `None` when no gateway key is configured; chat then answers 500.
    pub gateway: Option<Arc<dyn ChatGateway>>,
    pub model: String,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct MoveTaskRequest {
    pub status: TaskStatus,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    NotFound(String),
    BadRequest(String),
    Internal(String),
    Relay(RelayError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::Relay(err) => (
                StatusCode::from_u16(err.status_code())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                err.to_string(),
            ),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TaskNotFound { .. } => ApiError::NotFound(err.to_string()),
            StoreError::Invalid(msg) => ApiError::BadRequest(msg),
            other => {
                tracing::error!("Task store failure: {:#}", anyhow::Error::from(other));
                ApiError::Internal("Task store failure".to_string())
            }
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        ApiError::Relay(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

// ── Authentication ────────────────────────────────────────────────────

/// The caller behind the request's bearer token. Rejects with 401 before
/// any body is read.
pub struct AuthUser(pub Identity);

impl FromRequestParts<SharedState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(ApiError::Unauthorized)?;
        resolve_identity(state, token).await.map(AuthUser)
    }
}

pub(crate) async fn resolve_identity(state: &AppState, token: &str) -> Result<Identity, ApiError> {
    match state.auth.resolve_bearer(token).await {
        Ok(identity) => Ok(identity),
        Err(AuthError::Unauthorized) => Err(ApiError::Unauthorized),
        Err(e) => {
            tracing::warn!("Bearer resolution failed: {}", e);
            Err(ApiError::Unauthorized)
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/functions/v1/kanban-chat", post(chat))
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route("/api/tasks/changes", get(task_changes))
        .route("/api/tasks/{id}", patch(update_task).delete(delete_task))
        .route("/api/tasks/{id}/move", patch(move_task))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn chat(
    State(state): State<SharedState>,
    AuthUser(identity): AuthUser,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    let gateway = state.gateway.clone().ok_or(RelayError::NotConfigured)?;

    tracing::debug!(
        user_id = %identity.user_id,
        messages = req.messages.len(),
        tasks = req.tasks.len(),
        "chat request"
    );

    let upstream_req = build_upstream_request(&state.model, req.messages, &req.tasks);
    let upstream = gateway.open_stream(&upstream_req).await?;

    let tasks: Arc<dyn TaskStore> = Arc::new(state.store.for_user(identity.user_id));
    let body = Body::from_stream(relay_stream(upstream, tasks));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

async fn list_tasks(
    State(state): State<SharedState>,
    AuthUser(identity): AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let tasks = state.store.for_user(identity.user_id).list().await?;
    Ok(Json(tasks))
}

async fn create_task(
    State(state): State<SharedState>,
    AuthUser(identity): AuthUser,
    payload: Result<Json<NewTask>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(task) = payload?;
    let task = state.store.for_user(identity.user_id).insert(task).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn update_task(
    State(state): State<SharedState>,
    AuthUser(identity): AuthUser,
    Path(id): Path<Uuid>,
    payload: Result<Json<TaskPatch>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(patch) = payload?;
    let task = state
        .store
        .for_user(identity.user_id)
        .update(id, patch)
        .await?;
    Ok(Json(task))
}

async fn move_task(
    State(state): State<SharedState>,
    AuthUser(identity): AuthUser,
    Path(id): Path<Uuid>,
    payload: Result<Json<MoveTaskRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let task = state
        .store
        .for_user(identity.user_id)
        .update(id, TaskPatch::status(req.status))
        .await?;
    Ok(Json(task))
}

async fn delete_task(
    State(state): State<SharedState>,
    AuthUser(identity): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.for_user(identity.user_id).delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// The caller's change notifications as an event stream.
async fn task_changes(
    State(state): State<SharedState>,
    AuthUser(identity): AuthUser,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.store.subscribe();
    let user_id = identity.user_id;

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(change) if change.user_id == user_id => match Event::default().json_data(&change) {
                    Ok(event) => yield Ok(event),
                    Err(e) => tracing::warn!("Failed to encode task change: {}", e),
                },
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Change feed subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ── Tests ─────────────────────────────────────────────────────────────
