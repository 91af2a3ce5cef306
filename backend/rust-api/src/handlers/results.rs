use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use super::ApiResult;
use crate::{
    extractors::{AppQuery, ValidatedJson},
    models::result::{ListResultsQuery, SubmitResultRequest, SubmitResultResponse},
    services::AppState,
};

pub async fn submit_result(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<SubmitResultRequest>,
) -> ApiResult<impl IntoResponse> {
    let result = state.recorder.submit(req).await?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitResultResponse {
            message: "Result saved successfully".to_string(),
            result_id: result.id,
        }),
    ))
}

pub async fn list_results(
    State(state): State<Arc<AppState>>,
    AppQuery(query): AppQuery<ListResultsQuery>,
) -> ApiResult<impl IntoResponse> {
    let results = state.recorder.list(&query.learner_id, query.limit).await?;
    Ok(Json(results))
}
