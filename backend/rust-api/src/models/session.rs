use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::game::{Difficulty, Game, Level};
use super::prediction::AffectDistribution;
use super::progress::LearnerProgress;
use super::result::{GameMeta, LearnerIdentity};
use crate::services::session_engine::{
    AnswerFeedback, PendingResult, SessionMachine, SessionPhase,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Authored levels; completions move learner progress.
    Fixed,
    /// One synthetic level built from a predicted difficulty path.
    Adaptive,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Fixed => "fixed",
            SessionMode::Adaptive => "adaptive",
        }
    }
}

/// Snapshot persisted between requests (Redis `quiz_session:{id}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub mode: SessionMode,
    pub identity: LearnerIdentity,
    pub meta: GameMeta,
    pub machine: SessionMachine,
    #[serde(default)]
    pub path: Option<Vec<u8>>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSessionRequest {
    #[validate(length(min = 1, message = "game_id is required"))]
    pub game_id: String,
    #[serde(flatten)]
    #[validate(nested)]
    pub identity: LearnerIdentity,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAdaptiveSessionRequest {
    #[serde(flatten)]
    #[validate(nested)]
    pub identity: LearnerIdentity,
    pub score: f64,
    #[serde(alias = "emotionProbabilities", alias = "emotions", default)]
    pub emotion_probabilities: AffectDistribution,
    #[serde(default)]
    pub scope_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LevelSummary {
    pub id: u32,
    pub title: String,
    pub difficulty: Difficulty,
    pub points_to_pass: u32,
    pub max_score: u32,
    pub challenge_count: usize,
    pub unlocked: bool,
    pub completed: bool,
}

impl LevelSummary {
    pub fn new(level: &Level, progress: &LearnerProgress) -> Self {
        Self {
            id: level.id,
            title: level.title.clone(),
            difficulty: level.difficulty,
            points_to_pass: level.points_to_pass,
            max_score: level.max_score(),
            challenge_count: level.challenges.len(),
            unlocked: progress.is_unlocked(level.id),
            completed: progress.is_completed(level.id),
        }
    }
}

/// Level selection screen for one learner.
#[derive(Debug, Serialize)]
pub struct GameOverview {
    pub id: String,
    pub title: String,
    pub description: String,
    pub skills: Vec<String>,
    pub age_range: Option<(u8, u8)>,
    pub current_level: u32,
    pub highest_score: u32,
    pub levels: Vec<LevelSummary>,
}

impl GameOverview {
    pub fn new(game: &Game, progress: &LearnerProgress) -> Self {
        Self {
            id: game.id.clone(),
            title: game.title.clone(),
            description: game.description.clone(),
            skills: game.skills.clone(),
            age_range: game.age_range,
            current_level: progress.current_level,
            highest_score: progress.highest_score,
            levels: game
                .levels
                .iter()
                .map(|level| LevelSummary::new(level, progress))
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LevelView {
    pub id: u32,
    pub title: String,
    pub difficulty: Difficulty,
    pub instructions: String,
    pub points_to_pass: u32,
    pub max_score: u32,
    pub time_limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct AttemptView {
    pub score: u32,
    pub challenge_index: usize,
    pub total_challenges: usize,
    pub correct_answers: u32,
}

/// Current challenge as shown to the learner; never carries the answer.
#[derive(Debug, Serialize)]
pub struct ChallengeView {
    pub id: String,
    pub question: String,
    pub options: Option<Vec<String>>,
    pub points: u32,
    pub has_hint: bool,
    pub hint: Option<String>,
    pub difficulty: Option<Difficulty>,
}

#[derive(Debug, Serialize)]
pub struct CompletionView {
    pub level_id: u32,
    pub score: u32,
    pub max_score: u32,
    pub percentage: f64,
    pub pass: bool,
    pub excellent: bool,
    pub next_level_unlocked: bool,
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub mode: SessionMode,
    pub game_id: String,
    pub game_title: String,
    pub learner_id: String,
    pub phase: SessionPhase,
    pub current_level: u32,
    pub completed_levels: Vec<u32>,
    pub highest_score: u32,
    pub levels: Vec<LevelSummary>,
    pub level: Option<LevelView>,
    pub attempt: Option<AttemptView>,
    pub challenge: Option<ChallengeView>,
    pub pending: Option<PendingResult>,
    pub completion: Option<CompletionView>,
    pub path: Option<Vec<u8>>,
    pub warnings: Vec<String>,
}

impl SessionView {
    pub fn new(record: &SessionRecord) -> Self {
        let machine = &record.machine;
        let game = machine.game();
        let progress = machine.progress();

        let level = machine.current_level().map(|level| LevelView {
            id: level.id,
            title: level.title.clone(),
            difficulty: level.difficulty,
            instructions: level.instructions.clone(),
            points_to_pass: level.points_to_pass,
            max_score: level.max_score(),
            time_limit: level.time_limit,
        });

        let attempt = machine.attempt().map(|attempt| AttemptView {
            score: attempt.score,
            challenge_index: attempt.challenge_index,
            total_challenges: machine
                .current_level()
                .map(|level| level.challenges.len())
                .unwrap_or(0),
            correct_answers: attempt.correct_count(),
        });

        let challenge = match machine.phase() {
            SessionPhase::Playing => machine.current_challenge().map(|challenge| ChallengeView {
                id: challenge.id.clone(),
                question: challenge.question.clone(),
                options: challenge.options.clone(),
                points: challenge.points,
                has_hint: challenge.hint.is_some(),
                hint: challenge.hint.clone().filter(|_| machine.hint_visible()),
                difficulty: challenge.difficulty,
            }),
            _ => None,
        };

        let completion = machine.completion().map(|completion| CompletionView {
            level_id: completion.level_id,
            score: completion.score,
            max_score: completion.outcome.max_score,
            percentage: completion.outcome.percentage,
            pass: completion.outcome.pass,
            excellent: completion.outcome.is_excellent(),
            next_level_unlocked: completion.next_level_unlocked,
        });

        Self {
            session_id: record.id.clone(),
            mode: record.mode,
            game_id: game.id.clone(),
            game_title: game.title.clone(),
            learner_id: record.identity.id().to_string(),
            phase: machine.phase(),
            current_level: progress.current_level,
            completed_levels: progress.completed_levels.iter().copied().collect(),
            highest_score: progress.highest_score,
            levels: game
                .levels
                .iter()
                .map(|level| LevelSummary::new(level, progress))
                .collect(),
            level,
            attempt,
            challenge,
            pending: machine.pending().cloned(),
            completion,
            path: record.path.clone(),
            warnings: record.warnings.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub session: SessionView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<AnswerFeedback>,
}
