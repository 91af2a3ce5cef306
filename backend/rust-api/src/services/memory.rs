//! In-process stores for the `memory` backend and for tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use rand::seq::IndexedRandom;
use tokio::sync::RwLock;

use crate::error::{EngineError, EngineResult};
use crate::models::game::Game;
use crate::models::progress::LearnerProgress;
use crate::models::question::{Question, QuestionFilter};
use crate::models::result::QuizResult;
use crate::models::session::SessionRecord;
use crate::services::game_catalog::GameCatalog;
use crate::services::progress_store::ProgressRepository;
use crate::services::question_sampler::QuestionStore;
use crate::services::result_recorder::ResultStore;
use crate::services::session_store::SessionStore;

#[derive(Default)]
pub struct InMemoryQuestionStore {
    questions: RwLock<Vec<Question>>,
}

impl InMemoryQuestionStore {
    pub fn new(questions: Vec<Question>) -> Self {
        Self {
            questions: RwLock::new(questions),
        }
    }

    pub async fn insert(&self, question: Question) {
        self.questions.write().await.push(question);
    }
}

#[async_trait]
impl QuestionStore for InMemoryQuestionStore {
    async fn sample(&self, filter: &QuestionFilter, size: usize) -> EngineResult<Vec<Question>> {
        let questions = self.questions.read().await;
        let matching: Vec<&Question> = questions.iter().filter(|q| filter.matches(q)).collect();
        let mut rng = rand::rng();
        Ok(matching
            .choose_multiple(&mut rng, size)
            .map(|question| (*question).clone())
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryResultStore {
    results: RwLock<Vec<QuizResult>>,
}

impl InMemoryResultStore {
    pub async fn len(&self) -> usize {
        self.results.read().await.len()
    }

    pub async fn all(&self) -> Vec<QuizResult> {
        self.results.read().await.clone()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn insert(&self, result: &QuizResult) -> EngineResult<()> {
        let mut results = self.results.write().await;
        if !results.iter().any(|existing| existing.id == result.id) {
            results.push(result.clone());
        }
        Ok(())
    }

    async fn list_for_learner(
        &self,
        learner_id: &str,
        limit: u32,
    ) -> EngineResult<Vec<QuizResult>> {
        let mut matching: Vec<QuizResult> = self
            .results
            .read()
            .await
            .iter()
            .filter(|result| result.student_id == learner_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.attempted_on.cmp(&a.attempted_on));
        matching.truncate(limit as usize);
        Ok(matching)
    }
}

#[derive(Default)]
pub struct InMemoryProgressRepository {
    progress: RwLock<HashMap<String, LearnerProgress>>,
}

#[async_trait]
impl ProgressRepository for InMemoryProgressRepository {
    async fn load(&self, learner_id: &str, game_id: &str) -> EngineResult<Option<LearnerProgress>> {
        let id = LearnerProgress::document_id(learner_id, game_id);
        Ok(self.progress.read().await.get(&id).cloned())
    }

    async fn save(&self, progress: &LearnerProgress) -> EngineResult<LearnerProgress> {
        let mut stored = self.progress.write().await;
        let current_version = stored.get(&progress.id).map(|p| p.version).unwrap_or(0);
        if current_version != progress.version {
            return Err(EngineError::Conflict(format!(
                "progress {} is at version {}, not {}",
                progress.id, current_version, progress.version
            )));
        }

        let mut next = progress.clone();
        next.version = progress.version + 1;
        next.updated_at = Some(Utc::now());
        stored.insert(next.id.clone(), next.clone());
        Ok(next)
    }
}

#[derive(Default)]
pub struct InMemoryGameCatalog {
    games: RwLock<Vec<Game>>,
}

impl InMemoryGameCatalog {
    pub fn new(games: Vec<Game>) -> Self {
        Self {
            games: RwLock::new(games),
        }
    }
}

#[async_trait]
impl GameCatalog for InMemoryGameCatalog {
    async fn get(&self, game_id: &str) -> EngineResult<Option<Game>> {
        Ok(self
            .games
            .read()
            .await
            .iter()
            .find(|game| game.id == game_id)
            .cloned())
    }

    async fn list(&self) -> EngineResult<Vec<Game>> {
        Ok(self.games.read().await.clone())
    }
}

/// No expiry; sessions live as long as the process.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str) -> EngineResult<Option<SessionRecord>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn save(&self, record: &SessionRecord) -> EngineResult<()> {
        self.sessions
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> EngineResult<()> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }
}
