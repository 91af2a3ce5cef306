use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use super::ApiResult;
use crate::{
    error::EngineError,
    extractors::AppQuery,
    models::{game::Game, progress::LearnerProgress, session::GameOverview},
    services::AppState,
};

#[derive(Debug, Deserialize)]
pub struct GameOverviewQuery {
    pub learner_id: Option<String>,
}

pub async fn list_games(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let games: Vec<Game> = state.catalog.list().await?;
    let overviews: Vec<GameOverview> = games
        .iter()
        .map(|game| GameOverview::new(game, &LearnerProgress::new("", &game.id)))
        .collect();
    Ok(Json(overviews))
}

/// Level selection screen; without `learner_id` only level 1 shows unlocked.
pub async fn get_game(
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<String>,
    AppQuery(query): AppQuery<GameOverviewQuery>,
) -> ApiResult<impl IntoResponse> {
    let game = state
        .catalog
        .get(&game_id)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("Game {} not found", game_id)))?;

    let progress = match query.learner_id.as_deref().filter(|id| !id.trim().is_empty()) {
        Some(learner_id) => state.progress.load_or_default(learner_id, &game.id).await?,
        None => LearnerProgress::new("", &game.id),
    };

    Ok(Json(GameOverview::new(&game, &progress)))
}

pub async fn get_progress(
    State(state): State<Arc<AppState>>,
    Path((learner_id, game_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let progress = state.progress.load_or_default(&learner_id, &game_id).await?;
    Ok(Json(progress))
}
