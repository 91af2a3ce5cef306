use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use super::ApiResult;
use crate::{
    extractors::{AppJson, AppQuery},
    models::prediction::{
        PredictPathRequest, PredictPathResponse, PredictWithQuestionsResponse,
        QuestionsByPathQuery, QuestionsResponse,
    },
    services::{question_sampler::parse_path, AppState},
};

/// Affect + score → difficulty path and one question per tier.
pub async fn predict_with_questions(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<PredictPathRequest>,
) -> ApiResult<impl IntoResponse> {
    let path = state
        .predictor
        .predict(req.score, &req.emotion_probabilities)
        .await?;
    let sampled = state
        .sampler
        .sample_many(&path, req.scope_id.as_deref())
        .await?;

    Ok(Json(PredictWithQuestionsResponse {
        predictions: path.ordinals(),
        questions: sampled.questions,
        warnings: sampled.warnings,
    }))
}

pub async fn predict_path(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<PredictPathRequest>,
) -> ApiResult<impl IntoResponse> {
    let path = state
        .predictor
        .predict(req.score, &req.emotion_probabilities)
        .await?;

    Ok(Json(PredictPathResponse {
        path: path.ordinals(),
        status: "success",
    }))
}

/// `?path=0,1,2` → one question per element, in order.
pub async fn questions_by_path(
    State(state): State<Arc<AppState>>,
    AppQuery(query): AppQuery<QuestionsByPathQuery>,
) -> ApiResult<impl IntoResponse> {
    let path = parse_path(&query.path)?;
    let sampled = state
        .sampler
        .sample_many(&path, query.scope_id.as_deref())
        .await?;

    Ok(Json(QuestionsResponse {
        questions: sampled.questions,
        status: "success",
        warnings: sampled.warnings,
    }))
}

/// Fixed-size batch for a quiz id and level name.
pub async fn quiz_batch(
    State(state): State<Arc<AppState>>,
    Path((quiz_id, level)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    tracing::info!(
        "Fetching {} questions for quiz={}, level={}",
        state.config.quiz.batch_size,
        quiz_id,
        level
    );

    let questions = state.sampler.sample_batch(&quiz_id, &level).await?;
    Ok(Json(questions))
}
