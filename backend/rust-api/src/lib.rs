use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::{EngineError, EngineResult};
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler).layer(middleware::from_fn_with_state(
                app_state.clone(),
                handlers::metrics_auth_middleware,
            )),
        )
        .nest("/api/v1", api_routes())
        .with_state(app_state)
        .layer(cors)
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/sessions", sessions_routes())
        .route("/predict", post(handlers::quiz::predict_with_questions))
        .route(
            "/quiz/transformer/predict-path",
            post(handlers::quiz::predict_path),
        )
        .route(
            "/quiz/questions/by-path",
            get(handlers::quiz::questions_by_path),
        )
        .route("/quizzes/{quiz_id}/{level}", get(handlers::quiz::quiz_batch))
        .route("/results", get(handlers::results::list_results))
        .route("/results/submit", post(handlers::results::submit_result))
        .route("/games", get(handlers::learners::list_games))
        .route("/games/{id}", get(handlers::learners::get_game))
        .route(
            "/learners/{id}/progress/{game_id}",
            get(handlers::learners::get_progress),
        )
}

fn sessions_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(handlers::sessions::create_session))
        .route("/adaptive", post(handlers::sessions::create_adaptive_session))
        .route(
            "/{id}",
            get(handlers::sessions::get_session).delete(handlers::sessions::end_session),
        )
        .route("/{id}/events", post(handlers::sessions::apply_event))
}
