//! API routes: inputs in, events out, session reads, cron management.

pub mod webhooks;

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use futures_core::Stream;
use serde::Deserialize;

use keel_domain::input::Input;

use crate::state::AppState;

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/v1/inputs", post(post_input))
        .route("/v1/events", get(event_feed))
        .route("/v1/sessions", get(list_sessions))
        .route("/v1/sessions/:id/messages", get(list_messages))
        .route("/v1/sessions/:id/cancel", post(cancel_session))
        .route("/v1/cron", get(list_cron).post(add_cron))
        .route("/v1/cron/:id", axum::routing::delete(remove_cron))
        .route("/hooks/:id", post(webhooks::receive_webhook))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ── Inputs ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct PostInput {
    #[serde(default)]
    session_id: String,
    content: String,
}

async fn post_input(State(state): State<AppState>, Json(req): Json<PostInput>) -> Response {
    if req.content.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "content must not be empty");
    }
    state
        .agent
        .enqueue(Input::new(req.session_id, req.content, "api"));
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "queued" })),
    )
        .into_response()
}

// ── Event feed ──────────────────────────────────────────────────────

/// SSE feed of agent events. Each subscriber gets its own bounded
/// buffer on the broker; falling behind drops events for this
/// subscriber only.
async fn event_feed(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (mut rx, subscription) = state.agent.events();
    let stream = async_stream::stream! {
        let _subscription = subscription;
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => yield Ok(Event::default().data(json)),
                Err(e) => tracing::warn!(error = %e, "failed to encode agent event"),
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ── Sessions ────────────────────────────────────────────────────────

async fn list_sessions(State(state): State<AppState>) -> Response {
    match state.store.list_sessions() {
        Ok(sessions) => Json(serde_json::json!({ "sessions": sessions })).into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn list_messages(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.get_session(&id) {
        Ok(Some(_)) => {}
        Ok(None) => return api_error(StatusCode::NOT_FOUND, "session not found"),
        Err(e) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
    match state.store.list_messages(&id) {
        Ok(messages) => Json(serde_json::json!({ "messages": messages })).into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn cancel_session(State(state): State<AppState>, Path(_id): Path<String>) -> Response {
    // One agent, one active turn: cancelling by session cancels the
    // current turn if any.
    state.agent.cancel();
    Json(serde_json::json!({ "status": "cancel requested" })).into_response()
}

// ── Cron ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct AddCron {
    expr: String,
    prompt: String,
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    timezone: Option<String>,
}

async fn add_cron(State(state): State<AppState>, Json(req): Json<AddCron>) -> Response {
    let tz = req.timezone.as_deref().unwrap_or("UTC");
    match state
        .scheduler
        .add(&req.expr, &req.prompt, &req.session_id, tz)
    {
        Ok(job) => (StatusCode::CREATED, Json(serde_json::json!({ "job": job }))).into_response(),
        Err(e) => api_error(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

async fn list_cron(State(state): State<AppState>) -> Response {
    Json(serde_json::json!({ "jobs": state.scheduler.list() })).into_response()
}

async fn remove_cron(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.scheduler.remove(&id) {
        Ok(true) => Json(serde_json::json!({ "status": "removed" })).into_response(),
        Ok(false) => api_error(StatusCode::NOT_FOUND, "job not found"),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
