use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{future::join_all, TryStreamExt};
use mongodb::{
    bson::{doc, Document},
    Collection, Database,
};

use crate::config::QuizSettings;
use crate::error::{EngineError, EngineResult};
use crate::metrics::{track_store_operation, QUESTIONS_SAMPLED_TOTAL};
use crate::models::game::Difficulty;
use crate::models::prediction::DifficultyPath;
use crate::models::question::{Question, QuestionFilter};
use crate::utils::retry::with_timeout;

pub const QUESTIONS_COLLECTION: &str = "quizzes";

/// Read-only question source. Implementations draw uniformly at random and
/// may return the same question on separate calls.
#[async_trait]
pub trait QuestionStore: Send + Sync {
    async fn sample(&self, filter: &QuestionFilter, size: usize) -> EngineResult<Vec<Question>>;
}

pub struct MongoQuestionStore {
    collection: Collection<Document>,
}

impl MongoQuestionStore {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(QUESTIONS_COLLECTION),
        }
    }
}

#[async_trait]
impl QuestionStore for MongoQuestionStore {
    async fn sample(&self, filter: &QuestionFilter, size: usize) -> EngineResult<Vec<Question>> {
        let pipeline = vec![
            doc! { "$match": filter.to_document() },
            doc! { "$sample": { "size": size as i64 } },
        ];

        track_store_operation("sample", QUESTIONS_COLLECTION, async {
            let documents: Vec<Document> =
                self.collection.aggregate(pipeline).await?.try_collect().await?;
            documents
                .into_iter()
                .map(|document| {
                    mongodb::bson::from_document::<Question>(document).map_err(|e| {
                        EngineError::storage(format!("Malformed question document: {}", e))
                    })
                })
                .collect()
        })
        .await
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SampledQuestions {
    /// In path order; shorter than the path when tiers went unmatched.
    pub questions: Vec<Question>,
    pub warnings: Vec<String>,
}

#[derive(Clone)]
pub struct QuestionSampler {
    store: Arc<dyn QuestionStore>,
    timeout: Duration,
    settings: QuizSettings,
}

impl QuestionSampler {
    pub fn new(store: Arc<dyn QuestionStore>, timeout: Duration, settings: QuizSettings) -> Self {
        Self {
            store,
            timeout,
            settings,
        }
    }

    /// One random question of the given tier, `None` when nothing matches.
    pub async fn sample(
        &self,
        tier: Difficulty,
        scope_id: Option<&str>,
    ) -> EngineResult<Option<Question>> {
        let filter = QuestionFilter::ordinal(tier, scope_id.map(str::to_string));
        let mut drawn = with_timeout("question store", self.timeout, self.store.sample(&filter, 1))
            .await
            .map_err(|e| match e {
                EngineError::Storage(message) => EngineError::upstream(message),
                other => other,
            })?;

        let outcome = if drawn.is_empty() { "unmatched" } else { "matched" };
        QUESTIONS_SAMPLED_TOTAL
            .with_label_values(&[tier.as_str(), outcome])
            .inc();

        Ok(drawn.pop())
    }

    /// One independent draw per path element, run concurrently. Order follows
    /// the path; unmatched tiers are dropped with a warning.
    pub async fn sample_many(
        &self,
        path: &DifficultyPath,
        scope_id: Option<&str>,
    ) -> EngineResult<SampledQuestions> {
        let draws = join_all(path.0.iter().map(|tier| self.sample(*tier, scope_id))).await;

        let mut sampled = SampledQuestions::default();
        for (position, (tier, drawn)) in path.0.iter().zip(draws).enumerate() {
            match drawn? {
                Some(question) => sampled.questions.push(question),
                None => {
                    let warning = format!(
                        "No question found for difficulty {} (path position {})",
                        tier.ordinal(),
                        position
                    );
                    tracing::warn!("{}", warning);
                    sampled.warnings.push(warning);
                }
            }
        }

        tracing::info!(
            requested = path.len(),
            sampled = sampled.questions.len(),
            "Sampled questions for difficulty path"
        );

        Ok(sampled)
    }

    /// Fixed-size draw for a quiz id and level name ("easy", "Medium", ...).
    /// Unknown quiz ids and level names are rejected before the store is
    /// queried.
    pub async fn sample_batch(&self, quiz_id: &str, level: &str) -> EngineResult<Vec<Question>> {
        if !self.settings.allowed_quiz_ids.iter().any(|id| id == quiz_id) {
            return Err(EngineError::not_found(format!("Unknown quiz id '{}'", quiz_id)));
        }

        let tier = match level.trim().to_lowercase().as_str() {
            "easy" => Difficulty::Easy,
            "medium" => Difficulty::Medium,
            "hard" => Difficulty::Hard,
            _ => {
                return Err(EngineError::not_found(format!(
                    "Unknown difficulty level '{}'",
                    level
                )))
            }
        };

        let filter = QuestionFilter::label(tier, Some(quiz_id.to_string()));
        let questions = with_timeout(
            "question store",
            self.timeout,
            self.store.sample(&filter, self.settings.batch_size),
        )
        .await?;

        if questions.is_empty() {
            return Err(EngineError::not_found(format!(
                "No questions found for {} at level {}",
                quiz_id,
                tier.label()
            )));
        }

        QUESTIONS_SAMPLED_TOTAL
            .with_label_values(&[tier.as_str(), "batch"])
            .inc_by(questions.len() as u64);

        Ok(questions)
    }
}

/// Parses `"0,1,2"` into a path. Blank entries are skipped.
pub fn parse_path(raw: &str) -> EngineResult<DifficultyPath> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>()
                .ok()
                .and_then(Difficulty::from_ordinal)
                .ok_or_else(|| EngineError::validation(format!("Invalid path element '{}'", part)))
        })
        .collect::<EngineResult<Vec<_>>>()
        .map(DifficultyPath)
}
