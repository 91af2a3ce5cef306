#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

use quizpath_api::{
    config::Config,
    create_router,
    error::{EngineError, EngineResult},
    models::{
        game::AnswerValue,
        progress::LearnerProgress,
        question::{Question, StoredDifficulty},
        result::QuizResult,
    },
    services::{
        game_catalog::load_games_file,
        memory::{
            InMemoryGameCatalog, InMemoryProgressRepository, InMemoryQuestionStore,
            InMemoryResultStore, InMemorySessionStore,
        },
        path_predictor::Predictor,
        progress_store::ProgressRepository,
        result_recorder::ResultStore,
        AppState, Capabilities,
    },
};

/// Predictor double: answers with a fixed path, or fails when none is set.
pub struct StubPredictor {
    path: Mutex<Option<Vec<i64>>>,
    pub calls: Mutex<Vec<[f64; 6]>>,
}

impl StubPredictor {
    pub fn returning(path: Vec<i64>) -> Self {
        Self {
            path: Mutex::new(Some(path)),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            path: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Predictor for StubPredictor {
    async fn predict(&self, features: [f64; 6]) -> EngineResult<Vec<i64>> {
        self.calls.lock().unwrap().push(features);
        self.path
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| EngineError::upstream("prediction service is down"))
    }
}

/// Takes one unit of `budget`; true while failures remain.
fn take_failure(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

/// Result store whose first inserts fail with a storage error.
pub struct FlakyResults {
    inner: Arc<InMemoryResultStore>,
    pub failures_left: AtomicUsize,
}

#[async_trait]
impl ResultStore for FlakyResults {
    async fn insert(&self, result: &QuizResult) -> EngineResult<()> {
        if take_failure(&self.failures_left) {
            return Err(EngineError::storage("results collection unavailable"));
        }
        self.inner.insert(result).await
    }

    async fn list_for_learner(
        &self,
        learner_id: &str,
        limit: u32,
    ) -> EngineResult<Vec<QuizResult>> {
        self.inner.list_for_learner(learner_id, limit).await
    }
}

/// Progress repository whose first saves lose the version race.
pub struct ContendedProgress {
    inner: InMemoryProgressRepository,
    pub conflicts_left: AtomicUsize,
}

#[async_trait]
impl ProgressRepository for ContendedProgress {
    async fn load(&self, learner_id: &str, game_id: &str) -> EngineResult<Option<LearnerProgress>> {
        self.inner.load(learner_id, game_id).await
    }

    async fn save(&self, progress: &LearnerProgress) -> EngineResult<LearnerProgress> {
        if take_failure(&self.conflicts_left) {
            return Err(EngineError::Conflict(format!(
                "progress {} changed underneath",
                progress.id
            )));
        }
        self.inner.save(progress).await
    }
}

/// How many times each store misbehaves before recovering.
#[derive(Debug, Default, Clone, Copy)]
pub struct Faults {
    pub result_insert_failures: usize,
    pub progress_conflicts: usize,
}

pub struct TestApp {
    pub router: Router,
    pub results: Arc<InMemoryResultStore>,
    pub predictor: Arc<StubPredictor>,
}

pub async fn create_test_app() -> TestApp {
    create_test_app_with(StubPredictor::returning(vec![0, 1, 2])).await
}

pub async fn create_test_app_with(predictor: StubPredictor) -> TestApp {
    build_test_app(predictor, 10).await
}

/// Answers stay on display long enough for a test to act on them.
pub async fn create_slow_display_app() -> TestApp {
    build_test_app(StubPredictor::returning(vec![0, 1, 2]), 60_000).await
}

pub async fn build_test_app(predictor: StubPredictor, display_interval_ms: u64) -> TestApp {
    build_faulty_app(predictor, display_interval_ms, Faults::default()).await
}

pub async fn build_faulty_app(
    predictor: StubPredictor,
    display_interval_ms: u64,
    faults: Faults,
) -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let config = Config {
        display_interval_ms,
        metrics_auth: "metrics:secret".to_string(),
        ..Config::default()
    };

    let games_path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/games.json");
    let games = load_games_file(games_path).expect("games fixture loads");

    let results = Arc::new(InMemoryResultStore::default());
    let predictor = Arc::new(predictor);
    let capabilities = Capabilities {
        sessions: Arc::new(InMemorySessionStore::default()),
        catalog: Arc::new(InMemoryGameCatalog::new(games)),
        progress: Arc::new(ContendedProgress {
            inner: InMemoryProgressRepository::default(),
            conflicts_left: AtomicUsize::new(faults.progress_conflicts),
        }),
        questions: Arc::new(InMemoryQuestionStore::new(seed_questions())),
        results: Arc::new(FlakyResults {
            inner: results.clone(),
            failures_left: AtomicUsize::new(faults.result_insert_failures),
        }),
        predictor: predictor.clone(),
    };

    let state = Arc::new(AppState::from_parts(config, capabilities, None, None));

    TestApp {
        router: create_router(state),
        results,
        predictor,
    }
}

fn question(id: &str, difficulty: StoredDifficulty, quiz_id: &str, answer: &str) -> Question {
    Question {
        id: id.to_string(),
        question: format!("Question {}", id),
        options: vec![answer.to_string(), "wrong".to_string()],
        correct_answer: AnswerValue::Text(answer.to_string()),
        difficulty,
        category: Some("general".to_string()),
        quiz_id: Some(quiz_id.to_string()),
    }
}

/// Tiers 0 and 1 for the adaptive path (no tier 2), plus labelled quiz1
/// questions for batches.
fn seed_questions() -> Vec<Question> {
    vec![
        question("tier0-a", StoredDifficulty::Tier(0), "quiz1", "a"),
        question("tier1-a", StoredDifficulty::Tier(1), "quiz1", "b"),
        question("easy-1", StoredDifficulty::Label("Easy".into()), "quiz1", "x"),
        question("easy-2", StoredDifficulty::Label("Easy".into()), "quiz1", "y"),
        question("medium-1", StoredDifficulty::Label("Medium".into()), "quiz2", "z"),
    ]
}

pub async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&body).into_owned())
        })
    };
    (status, json)
}

pub async fn get(app: &TestApp, uri: &str) -> (StatusCode, Value) {
    send(
        app,
        Request::builder().uri(uri).body(Body::empty()).unwrap(),
    )
    .await
}

pub async fn post_json(app: &TestApp, uri: &str, body: Value) -> (StatusCode, Value) {
    send(
        app,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

pub async fn delete(app: &TestApp, uri: &str) -> (StatusCode, Value) {
    send(
        app,
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
}

pub async fn event(app: &TestApp, session_id: &str, body: Value) -> (StatusCode, Value) {
    post_json(app, &format!("/api/v1/sessions/{}/events", session_id), body).await
}

/// Polls the session until the answer on display has been cleared.
pub async fn wait_until_settled(app: &TestApp, session_id: &str) -> Value {
    for _ in 0..500 {
        let (status, session) = get(app, &format!("/api/v1/sessions/{}", session_id)).await;
        assert_eq!(status, StatusCode::OK);
        if session["pending"].is_null() {
            return session;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session {} never left the answer display", session_id);
}

/// Submits an answer and waits for the deferred advance.
pub async fn answer(app: &TestApp, session_id: &str, answer: Value) -> (Value, Value) {
    let (status, response) = event(
        app,
        session_id,
        serde_json::json!({ "type": "submit_answer", "answer": answer }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "submit failed: {}", response);
    let session = wait_until_settled(app, session_id).await;
    (response["feedback"].clone(), session)
}
