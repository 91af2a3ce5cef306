use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use super::ApiResult;
use crate::{
    extractors::AppJson,
    models::session::{CreateAdaptiveSessionRequest, CreateSessionRequest},
    services::{session_engine::SessionEvent, AppState},
};

pub async fn create_session(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<CreateSessionRequest>,
) -> ApiResult<impl IntoResponse> {
    tracing::info!(
        "Creating session for learner_id={}, game_id={}",
        req.identity.id(),
        req.game_id
    );

    let session = state.sessions.create_session(req).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn create_adaptive_session(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<CreateAdaptiveSessionRequest>,
) -> ApiResult<impl IntoResponse> {
    tracing::info!(
        "Creating adaptive session for learner_id={}, score={}",
        req.identity.id(),
        req.score
    );

    let session = state.sessions.create_adaptive_session(req).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let session = state.sessions.get_session(&session_id).await?;
    Ok(Json(session))
}

/// `{"type": "submit_answer", "answer": 4}`, `{"type": "select_level", "level_id": 2}`, ...
pub async fn apply_event(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    AppJson(event): AppJson<SessionEvent>,
) -> ApiResult<impl IntoResponse> {
    tracing::info!("Session {} event: {}", session_id, event.name());

    let response = state.sessions.apply_event(&session_id, event).await?;
    Ok(Json(response))
}

pub async fn end_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.sessions.end_session(&session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
