use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use mongodb::{bson::doc, Collection, Database};

use crate::error::{is_duplicate_key, EngineError, EngineResult};
use crate::metrics::{track_store_operation, PROGRESS_CONFLICTS_TOTAL};
use crate::models::progress::LearnerProgress;
use crate::utils::retry::{retry_transient, RetryConfig};

pub const PROGRESS_COLLECTION: &str = "learner_progress";
const MAX_MERGE_ROUNDS: usize = 5;

/// Versioned learner progress. `save` succeeds only when the stored version
/// still equals `progress.version` and returns the stored copy with the
/// bumped version; otherwise it fails with `Conflict`.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    async fn load(&self, learner_id: &str, game_id: &str) -> EngineResult<Option<LearnerProgress>>;
    async fn save(&self, progress: &LearnerProgress) -> EngineResult<LearnerProgress>;
}

pub struct MongoProgressRepository {
    collection: Collection<LearnerProgress>,
}

impl MongoProgressRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(PROGRESS_COLLECTION),
        }
    }
}

#[async_trait]
impl ProgressRepository for MongoProgressRepository {
    async fn load(&self, learner_id: &str, game_id: &str) -> EngineResult<Option<LearnerProgress>> {
        let id = LearnerProgress::document_id(learner_id, game_id);
        track_store_operation("find_one", PROGRESS_COLLECTION, async {
            Ok(self.collection.find_one(doc! { "_id": &id }).await?)
        })
        .await
    }

    async fn save(&self, progress: &LearnerProgress) -> EngineResult<LearnerProgress> {
        let mut next = progress.clone();
        next.version = progress.version + 1;
        next.updated_at = Some(Utc::now());

        track_store_operation("save", PROGRESS_COLLECTION, async {
            if progress.version == 0 {
                return match self.collection.insert_one(&next).await {
                    Ok(_) => Ok(next.clone()),
                    Err(e) if is_duplicate_key(&e) => Err(EngineError::Conflict(format!(
                        "progress {} was created concurrently",
                        progress.id
                    ))),
                    Err(e) => Err(e.into()),
                };
            }

            let filter = doc! { "_id": &progress.id, "version": progress.version as i64 };
            let outcome = self.collection.replace_one(filter, &next).await?;
            if outcome.matched_count == 0 {
                return Err(EngineError::Conflict(format!(
                    "progress {} is no longer at version {}",
                    progress.id, progress.version
                )));
            }
            Ok(next.clone())
        })
        .await
    }
}

/// Progress access used by sessions: defaults for new learners and a
/// conflict-resolving commit.
#[derive(Clone)]
pub struct ProgressStore {
    repository: Arc<dyn ProgressRepository>,
    retry: RetryConfig,
}

impl ProgressStore {
    pub fn new(repository: Arc<dyn ProgressRepository>, retry: RetryConfig) -> Self {
        Self { repository, retry }
    }

    /// Stored progress, or a fresh record with only level 1 unlocked.
    pub async fn load_or_default(
        &self,
        learner_id: &str,
        game_id: &str,
    ) -> EngineResult<LearnerProgress> {
        let stored = retry_transient("load progress", &self.retry, || {
            self.repository.load(learner_id, game_id)
        })
        .await?;
        Ok(stored.unwrap_or_else(|| LearnerProgress::new(learner_id, game_id)))
    }

    /// Saves `progress`. On a version conflict the latest stored copy is
    /// reloaded, merged with ours and saved again, so neither concurrent
    /// update is lost.
    pub async fn commit(&self, progress: &LearnerProgress) -> EngineResult<LearnerProgress> {
        let mut candidate = progress.clone();

        for round in 0..MAX_MERGE_ROUNDS {
            let saved = retry_transient("save progress", &self.retry, || {
                self.repository.save(&candidate)
            })
            .await;

            match saved {
                Ok(stored) => {
                    if round > 0 {
                        PROGRESS_CONFLICTS_TOTAL.with_label_values(&["merged"]).inc();
                    }
                    tracing::info!(
                        progress_id = %stored.id,
                        current_level = stored.current_level,
                        version = stored.version,
                        "Learner progress saved"
                    );
                    return Ok(stored);
                }
                Err(EngineError::Conflict(reason)) => {
                    tracing::warn!(round, "Progress conflict, merging: {}", reason);
                    let mut latest = self
                        .load_or_default(&candidate.learner_id, &candidate.game_id)
                        .await?;
                    latest.merge(&candidate);
                    candidate = latest;
                }
                Err(e) => return Err(e),
            }
        }

        PROGRESS_CONFLICTS_TOTAL.with_label_values(&["gave_up"]).inc();
        Err(EngineError::Conflict(format!(
            "progress {} kept changing after {} merges",
            progress.id, MAX_MERGE_ROUNDS
        )))
    }
}
