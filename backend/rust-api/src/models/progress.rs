use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Per learner, per game progression.
///
/// `current_level` is the highest unlocked level and never decreases;
/// `completed_levels` only grows. `version` backs the optimistic check used
/// when two sessions of the same learner finish at the same time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerProgress {
    #[serde(rename = "_id")]
    pub id: String,
    pub learner_id: String,
    pub game_id: String,
    #[serde(default)]
    pub completed_levels: BTreeSet<u32>,
    pub current_level: u32,
    #[serde(default)]
    pub highest_score: u32,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl LearnerProgress {
    pub fn document_id(learner_id: &str, game_id: &str) -> String {
        format!("{}:{}", learner_id, game_id)
    }

    /// Fresh progress: only level 1 is unlocked.
    pub fn new(learner_id: &str, game_id: &str) -> Self {
        Self {
            id: Self::document_id(learner_id, game_id),
            learner_id: learner_id.to_string(),
            game_id: game_id.to_string(),
            completed_levels: BTreeSet::new(),
            current_level: 1,
            highest_score: 0,
            version: 0,
            updated_at: None,
        }
    }

    pub fn is_unlocked(&self, level_id: u32) -> bool {
        level_id <= self.current_level
    }

    pub fn is_completed(&self, level_id: u32) -> bool {
        self.completed_levels.contains(&level_id)
    }

    /// Records a passed level. Returns whether anything changed; replaying a
    /// pass is a no-op.
    pub fn record_pass(&mut self, level_id: u32, score: u32) -> bool {
        let before = (self.current_level, self.completed_levels.len(), self.highest_score);
        self.current_level = self.current_level.max(level_id + 1);
        self.completed_levels.insert(level_id);
        self.highest_score = self.highest_score.max(score);
        before != (self.current_level, self.completed_levels.len(), self.highest_score)
    }

    /// Monotone merge of two views of the same learner's progress. Used to
    /// resolve a lost optimistic-version race without dropping either update.
    pub fn merge(&mut self, other: &LearnerProgress) {
        self.current_level = self.current_level.max(other.current_level);
        self.completed_levels
            .extend(other.completed_levels.iter().copied());
        self.highest_score = self.highest_score.max(other.highest_score);
    }
}
