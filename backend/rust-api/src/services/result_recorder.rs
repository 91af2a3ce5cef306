use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::{bson::doc, options::FindOptions, Collection, Database};
use uuid::Uuid;
use validator::Validate;

use crate::error::{is_duplicate_key, EngineError, EngineResult};
use crate::metrics::{track_store_operation, RESULTS_RECORDED_TOTAL};
use crate::models::result::{
    GameMeta, LearnerIdentity, QuestionTrace, QuizResult, SubmitResultRequest,
};
use crate::services::session_engine::Attempt;
use crate::utils::retry::{retry_transient, RetryConfig};

pub const RESULTS_COLLECTION: &str = "quizResults";
const DEFAULT_LIST_LIMIT: u32 = 50;

/// Append-only result log. Inserting an id that already exists is treated as
/// success.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn insert(&self, result: &QuizResult) -> EngineResult<()>;
    async fn list_for_learner(&self, learner_id: &str, limit: u32)
        -> EngineResult<Vec<QuizResult>>;
}

pub struct MongoResultStore {
    collection: Collection<QuizResult>,
}

impl MongoResultStore {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(RESULTS_COLLECTION),
        }
    }
}

#[async_trait]
impl ResultStore for MongoResultStore {
    async fn insert(&self, result: &QuizResult) -> EngineResult<()> {
        track_store_operation("insert", RESULTS_COLLECTION, async {
            match self.collection.insert_one(result).await {
                Ok(_) => Ok(()),
                Err(e) if is_duplicate_key(&e) => {
                    tracing::debug!("Result {} already recorded", result.id);
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn list_for_learner(
        &self,
        learner_id: &str,
        limit: u32,
    ) -> EngineResult<Vec<QuizResult>> {
        let options = FindOptions::builder()
            .sort(doc! { "attemptedOn": -1 })
            .limit(i64::from(limit))
            .build();

        track_store_operation("find", RESULTS_COLLECTION, async {
            let cursor = self
                .collection
                .find(doc! { "studentId": learner_id })
                .with_options(options)
                .await?;
            Ok(cursor.try_collect().await?)
        })
        .await
    }
}

#[derive(Clone)]
pub struct ResultRecorder {
    store: Arc<dyn ResultStore>,
    retry: RetryConfig,
}

impl ResultRecorder {
    pub fn new(store: Arc<dyn ResultStore>, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    /// Persists a finished attempt. `total` is the level's maximum score.
    pub async fn record(
        &self,
        attempt: &Attempt,
        total: u32,
        identity: &LearnerIdentity,
        meta: &GameMeta,
    ) -> EngineResult<QuizResult> {
        identity.validate()?;

        let questions = attempt
            .outcomes
            .iter()
            .enumerate()
            .map(|(index, outcome)| QuestionTrace {
                question_number: index as u32 + 1,
                question: outcome.question.clone(),
                options: outcome.options.clone(),
                selected_option: outcome.submitted.to_string(),
                answer: outcome.correct_answer.to_string(),
                difficulty: outcome.difficulty.map(|d| d.as_str().to_string()),
                is_correct: outcome.is_correct,
            })
            .collect();

        let result = QuizResult {
            id: attempt.id.clone(),
            student_id: identity.id().to_string(),
            student_name: identity.name().to_string(),
            game: meta.game.clone(),
            subject: meta.subject.clone(),
            quiz_id: meta.quiz_id.clone(),
            score: attempt.score,
            total,
            correct_answers: attempt.correct_count(),
            attempted_on: Utc::now(),
            questions,
        };

        self.insert(&result, "session").await?;
        Ok(result)
    }

    /// Stores a result submitted by a client that ran the quiz itself.
    pub async fn submit(&self, request: SubmitResultRequest) -> EngineResult<QuizResult> {
        request.validate()?;

        let result = QuizResult {
            id: Uuid::new_v4().to_string(),
            student_id: request.student_id.unwrap_or_default(),
            student_name: request.student_name.unwrap_or_default(),
            game: request.game,
            subject: request.subject,
            quiz_id: request.quiz_id,
            score: request.score,
            total: request.total,
            correct_answers: request.correct_answers,
            attempted_on: request.attempted_on.unwrap_or_else(Utc::now),
            questions: request.questions,
        };

        self.insert(&result, "submitted").await?;
        Ok(result)
    }

    pub async fn list(&self, learner_id: &str, limit: Option<u32>) -> EngineResult<Vec<QuizResult>> {
        if learner_id.trim().is_empty() {
            return Err(EngineError::validation("learner_id is required"));
        }
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, 500);
        self.store.list_for_learner(learner_id, limit).await
    }

    async fn insert(&self, result: &QuizResult, source: &str) -> EngineResult<()> {
        retry_transient("record result", &self.retry, || self.store.insert(result)).await?;

        RESULTS_RECORDED_TOTAL.with_label_values(&[source]).inc();
        tracing::info!(
            result_id = %result.id,
            learner = %result.student_id,
            score = result.score,
            total = result.total,
            "Quiz result recorded"
        );
        Ok(())
    }
}
