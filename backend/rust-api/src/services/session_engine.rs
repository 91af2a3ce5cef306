//! Explicit state machine for one learner playing one game.
//!
//! `SessionMachine::apply` is the whole `(state, event) -> (state, effects)`
//! table. It performs no I/O: the display delay, progress persistence and
//! result recording are driven by `SessionService` from the returned effects.
//! A rejected event leaves the machine untouched.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::game::{AnswerValue, Challenge, Difficulty, Game, Level};
use crate::models::progress::LearnerProgress;
use crate::services::score_gate::{self, GateOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    LevelSelection,
    Instructions,
    Playing,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeOutcome {
    pub challenge_id: String,
    pub question: String,
    pub options: Vec<String>,
    pub submitted: AnswerValue,
    pub correct_answer: AnswerValue,
    pub is_correct: bool,
    pub points_awarded: u32,
    pub difficulty: Option<Difficulty>,
}

/// In-session record of one pass through a level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    /// Also the id of the recorded result, so recording is idempotent.
    pub id: String,
    pub level_id: u32,
    pub challenge_index: usize,
    pub score: u32,
    pub outcomes: Vec<ChallengeOutcome>,
    pub started_at: DateTime<Utc>,
}

impl Attempt {
    fn new(level_id: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            level_id,
            challenge_index: 0,
            score: 0,
            outcomes: Vec::new(),
            started_at: Utc::now(),
        }
    }

    pub fn correct_count(&self) -> u32 {
        self.outcomes.iter().filter(|o| o.is_correct).count() as u32
    }
}

/// Result of the last answer while it is on display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingResult {
    pub is_correct: bool,
    pub correct_answer: AnswerValue,
    pub points_awarded: u32,
    /// When the answer went on display; the advance is due one display
    /// interval later.
    #[serde(default = "Utc::now")]
    pub pending_since: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub level_id: u32,
    pub score: u32,
    pub outcome: GateOutcome,
    /// The next level exists and is unlocked after this attempt.
    pub next_level_unlocked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    SelectLevel { level_id: u32 },
    Start,
    SubmitAnswer { answer: AnswerValue },
    ToggleHint,
    /// The display interval after an answer has elapsed.
    DisplayElapsed,
    Retry,
    Advance,
    BackToLevels,
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::SelectLevel { .. } => "select_level",
            SessionEvent::Start => "start",
            SessionEvent::SubmitAnswer { .. } => "submit_answer",
            SessionEvent::ToggleHint => "toggle_hint",
            SessionEvent::DisplayElapsed => "display_elapsed",
            SessionEvent::Retry => "retry",
            SessionEvent::Advance => "advance",
            SessionEvent::BackToLevels => "back_to_levels",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerFeedback {
    pub is_correct: bool,
    pub correct_answer: AnswerValue,
    pub points_awarded: u32,
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinishedAttempt {
    pub attempt: Attempt,
    pub outcome: GateOutcome,
    /// Progress after the unlock rule was applied.
    pub progress: LearnerProgress,
    pub progress_changed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEffect {
    AnswerEvaluated(AnswerFeedback),
    /// Caller must feed `DisplayElapsed` back after the display interval.
    ScheduleAdvance,
    /// Emitted once, on the transition into `Completed`.
    LevelCompleted(FinishedAttempt),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMachine {
    game: Game,
    progress: LearnerProgress,
    phase: SessionPhase,
    attempt: Option<Attempt>,
    pending: Option<PendingResult>,
    hint_visible: bool,
    completion: Option<Completion>,
}

impl SessionMachine {
    pub fn new(game: Game, progress: LearnerProgress) -> Self {
        Self {
            game,
            progress,
            phase: SessionPhase::LevelSelection,
            attempt: None,
            pending: None,
            hint_visible: false,
            completion: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn progress(&self) -> &LearnerProgress {
        &self.progress
    }

    pub fn attempt(&self) -> Option<&Attempt> {
        self.attempt.as_ref()
    }

    pub fn pending(&self) -> Option<&PendingResult> {
        self.pending.as_ref()
    }

    pub fn hint_visible(&self) -> bool {
        self.hint_visible
    }

    pub fn completion(&self) -> Option<&Completion> {
        self.completion.as_ref()
    }

    pub fn current_level(&self) -> Option<&Level> {
        self.attempt
            .as_ref()
            .and_then(|attempt| self.game.level(attempt.level_id))
    }

    pub fn current_challenge(&self) -> Option<&Challenge> {
        let attempt = self.attempt.as_ref()?;
        self.game
            .level(attempt.level_id)?
            .challenges
            .get(attempt.challenge_index)
    }

    /// Whether the answer on display has been shown for at least `interval`
    /// at `now`, so `DisplayElapsed` must be applied before anything else.
    pub fn display_due(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        self.pending.as_ref().is_some_and(|pending| {
            (now - pending.pending_since)
                .to_std()
                .is_ok_and(|shown| shown >= interval)
        })
    }

    /// Swaps in progress reloaded from storage (e.g. after a merge). Only
    /// ever moves forward.
    pub fn refresh_progress(&mut self, stored: &LearnerProgress) {
        self.progress.merge(stored);
        self.progress.version = self.progress.version.max(stored.version);
    }

    pub fn apply(&mut self, event: SessionEvent) -> EngineResult<Vec<SessionEffect>> {
        if self.pending.is_some() && event != SessionEvent::DisplayElapsed {
            return Err(EngineError::state(
                "the previous answer is still being displayed",
            ));
        }

        match event {
            SessionEvent::SelectLevel { level_id } => {
                self.select_level(level_id)?;
                Ok(Vec::new())
            }
            SessionEvent::Start => self.start(),
            SessionEvent::SubmitAnswer { answer } => self.submit_answer(answer),
            SessionEvent::ToggleHint => {
                self.expect_phase(SessionPhase::Playing, "toggle a hint")?;
                self.hint_visible = !self.hint_visible;
                Ok(Vec::new())
            }
            SessionEvent::DisplayElapsed => self.display_elapsed(),
            SessionEvent::Retry => {
                self.expect_phase(SessionPhase::Completed, "retry")?;
                let level_id = self.completed_level_id()?;
                self.reset_attempt(level_id);
                Ok(Vec::new())
            }
            SessionEvent::Advance => {
                self.expect_phase(SessionPhase::Completed, "advance")?;
                let next = self
                    .completion
                    .as_ref()
                    .filter(|completion| completion.next_level_unlocked)
                    .and_then(|completion| self.game.next_level(completion.level_id))
                    .map(|level| level.id);
                match next {
                    Some(level_id) => self.reset_attempt(level_id),
                    None => self.to_level_selection(),
                }
                Ok(Vec::new())
            }
            SessionEvent::BackToLevels => {
                if self.phase == SessionPhase::LevelSelection {
                    return Err(EngineError::state("already at level selection"));
                }
                self.to_level_selection();
                Ok(Vec::new())
            }
        }
    }

    fn select_level(&mut self, level_id: u32) -> EngineResult<()> {
        if !matches!(
            self.phase,
            SessionPhase::LevelSelection | SessionPhase::Completed
        ) {
            return Err(EngineError::state(format!(
                "cannot select a level while {:?}",
                self.phase
            )));
        }
        if self.game.level(level_id).is_none() {
            return Err(EngineError::not_found(format!(
                "level {} does not exist in game {}",
                level_id, self.game.id
            )));
        }
        if !self.progress.is_unlocked(level_id) {
            return Err(EngineError::state(format!(
                "level {} is locked (highest unlocked is {})",
                level_id, self.progress.current_level
            )));
        }
        self.reset_attempt(level_id);
        Ok(())
    }

    fn start(&mut self) -> EngineResult<Vec<SessionEffect>> {
        self.expect_phase(SessionPhase::Instructions, "start")?;
        self.phase = SessionPhase::Playing;

        // A level without challenges has nothing to play.
        if self.current_challenge().is_none() {
            return Ok(vec![self.complete()?]);
        }
        Ok(Vec::new())
    }

    fn submit_answer(&mut self, answer: AnswerValue) -> EngineResult<Vec<SessionEffect>> {
        self.expect_phase(SessionPhase::Playing, "submit an answer")?;

        let attempt = self
            .attempt
            .as_mut()
            .ok_or_else(|| EngineError::state("no attempt in progress"))?;
        let challenge = self
            .game
            .level(attempt.level_id)
            .and_then(|level| level.challenges.get(attempt.challenge_index))
            .ok_or_else(|| EngineError::state("no challenge to answer"))?;

        let is_correct = challenge.correct_answer.matches(&answer);
        let points_awarded = if is_correct { challenge.points } else { 0 };
        attempt.score = attempt.score.saturating_add(points_awarded);
        attempt.outcomes.push(ChallengeOutcome {
            challenge_id: challenge.id.clone(),
            question: challenge.question.clone(),
            options: challenge.options.clone().unwrap_or_default(),
            submitted: answer,
            correct_answer: challenge.correct_answer.clone(),
            is_correct,
            points_awarded,
            difficulty: challenge.difficulty,
        });

        let feedback = AnswerFeedback {
            is_correct,
            correct_answer: challenge.correct_answer.clone(),
            points_awarded,
            score: attempt.score,
        };
        self.pending = Some(PendingResult {
            is_correct,
            correct_answer: challenge.correct_answer.clone(),
            points_awarded,
            pending_since: Utc::now(),
        });

        Ok(vec![
            SessionEffect::AnswerEvaluated(feedback),
            SessionEffect::ScheduleAdvance,
        ])
    }

    fn display_elapsed(&mut self) -> EngineResult<Vec<SessionEffect>> {
        if self.pending.is_none() {
            return Err(EngineError::state("no answer result is pending"));
        }
        let total = self
            .current_level()
            .map(|level| level.challenges.len())
            .unwrap_or(0);
        let attempt = self
            .attempt
            .as_mut()
            .ok_or_else(|| EngineError::state("no attempt in progress"))?;

        self.pending = None;
        if attempt.challenge_index + 1 < total {
            attempt.challenge_index += 1;
            self.hint_visible = false;
            Ok(Vec::new())
        } else {
            Ok(vec![self.complete()?])
        }
    }

    /// Enters `Completed` and applies the unlock rule. The only place
    /// progress is mutated.
    fn complete(&mut self) -> EngineResult<SessionEffect> {
        let attempt = self
            .attempt
            .clone()
            .ok_or_else(|| EngineError::state("no attempt to complete"))?;
        let level = self
            .game
            .level(attempt.level_id)
            .ok_or_else(|| EngineError::not_found("level of the attempt no longer exists"))?;

        let outcome = score_gate::evaluate(attempt.score, level.points_to_pass, &level.challenges);
        let progress_changed = if outcome.pass {
            self.progress.record_pass(level.id, attempt.score)
        } else {
            false
        };
        let next_level_unlocked = outcome.pass
            && self
                .game
                .next_level(level.id)
                .is_some_and(|next| self.progress.is_unlocked(next.id));

        self.completion = Some(Completion {
            level_id: level.id,
            score: attempt.score,
            outcome,
            next_level_unlocked,
        });
        self.phase = SessionPhase::Completed;
        self.hint_visible = false;

        Ok(SessionEffect::LevelCompleted(FinishedAttempt {
            attempt,
            outcome,
            progress: self.progress.clone(),
            progress_changed,
        }))
    }

    fn reset_attempt(&mut self, level_id: u32) {
        self.attempt = Some(Attempt::new(level_id));
        self.pending = None;
        self.hint_visible = false;
        self.completion = None;
        self.phase = SessionPhase::Instructions;
    }

    fn to_level_selection(&mut self) {
        self.attempt = None;
        self.pending = None;
        self.hint_visible = false;
        self.completion = None;
        self.phase = SessionPhase::LevelSelection;
    }

    fn completed_level_id(&self) -> EngineResult<u32> {
        self.completion
            .as_ref()
            .map(|completion| completion.level_id)
            .ok_or_else(|| EngineError::state("no completed attempt"))
    }

    fn expect_phase(&self, expected: SessionPhase, action: &str) -> EngineResult<()> {
        if self.phase != expected {
            return Err(EngineError::state(format!(
                "cannot {} while {:?}",
                action, self.phase
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn challenge(id: &str, answer: AnswerValue, points: u32) -> Challenge {
        Challenge {
            id: id.into(),
            question: format!("question {}", id),
            options: Some(vec!["a".into(), "b".into()]),
            correct_answer: answer,
            points,
            hint: Some("think".into()),
            difficulty: None,
        }
    }

    fn level(id: u32, points_to_pass: u32, challenges: Vec<Challenge>) -> Level {
        Level {
            id,
            title: format!("Level {}", id),
            difficulty: Difficulty::Easy,
            instructions: "Answer everything".into(),
            challenges,
            points_to_pass,
            time_limit: None,
        }
    }

    fn game() -> Game {
        Game {
            id: "math".into(),
            title: "Math Adventure".into(),
            description: String::new(),
            levels: vec![
                level(
                    1,
                    20,
                    vec![
                        challenge("1a", AnswerValue::Text("4".into()), 10),
                        challenge("1b", AnswerValue::Number(7.0), 10),
                        challenge("1c", AnswerValue::Boolean(true), 10),
                    ],
                ),
                level(
                    2,
                    15,
                    vec![
                        challenge("2a", AnswerValue::Text("x".into()), 15),
                        challenge("2b", AnswerValue::Text("y".into()), 0),
                    ],
                ),
                level(3, 5, vec![challenge("3a", AnswerValue::Text("z".into()), 5)]),
            ],
            skills: vec!["arithmetic".into()],
            age_range: Some((6, 9)),
        }
    }

    fn machine() -> SessionMachine {
        SessionMachine::new(game(), LearnerProgress::new("child-1", "math"))
    }

    fn text(value: &str) -> AnswerValue {
        AnswerValue::Text(value.into())
    }

    /// Submits and immediately lets the display interval elapse.
    fn answer(machine: &mut SessionMachine, value: AnswerValue) -> Vec<SessionEffect> {
        let mut effects = machine
            .apply(SessionEvent::SubmitAnswer { answer: value })
            .unwrap();
        effects.extend(machine.apply(SessionEvent::DisplayElapsed).unwrap());
        effects
    }

    fn play_level_one(machine: &mut SessionMachine, answers: [AnswerValue; 3]) -> Vec<SessionEffect> {
        machine.apply(SessionEvent::SelectLevel { level_id: 1 }).unwrap();
        machine.apply(SessionEvent::Start).unwrap();
        answers
            .into_iter()
            .flat_map(|value| answer(machine, value))
            .collect()
    }

    fn finished(effects: &[SessionEffect]) -> Vec<&FinishedAttempt> {
        effects
            .iter()
            .filter_map(|effect| match effect {
                SessionEffect::LevelCompleted(done) => Some(done),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn starts_at_level_selection() {
        let m = machine();
        assert_eq!(m.phase(), SessionPhase::LevelSelection);
        assert!(m.attempt().is_none());
    }

    #[test]
    fn selecting_a_locked_level_is_rejected_and_state_is_unchanged() {
        let mut m = machine();
        let err = m.apply(SessionEvent::SelectLevel { level_id: 2 }).unwrap_err();
        assert!(matches!(err, EngineError::State(_)));
        assert_eq!(m.phase(), SessionPhase::LevelSelection);
        assert!(m.attempt().is_none());
    }

    #[test]
    fn selecting_an_unknown_level_is_not_found() {
        let mut m = machine();
        let err = m.apply(SessionEvent::SelectLevel { level_id: 9 }).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn select_then_start_moves_through_instructions() {
        let mut m = machine();
        m.apply(SessionEvent::SelectLevel { level_id: 1 }).unwrap();
        assert_eq!(m.phase(), SessionPhase::Instructions);
        assert_eq!(m.attempt().unwrap().score, 0);
        m.apply(SessionEvent::Start).unwrap();
        assert_eq!(m.phase(), SessionPhase::Playing);
        assert_eq!(m.current_challenge().unwrap().id, "1a");
    }

    #[test]
    fn wrong_answer_reveals_correct_one_and_keeps_score() {
        let mut m = machine();
        m.apply(SessionEvent::SelectLevel { level_id: 1 }).unwrap();
        m.apply(SessionEvent::Start).unwrap();

        let effects = m
            .apply(SessionEvent::SubmitAnswer { answer: text("5") })
            .unwrap();
        match &effects[0] {
            SessionEffect::AnswerEvaluated(feedback) => {
                assert!(!feedback.is_correct);
                assert_eq!(feedback.correct_answer, text("4"));
                assert_eq!(feedback.score, 0);
            }
            other => panic!("unexpected effect {:?}", other),
        }
        assert_eq!(effects[1], SessionEffect::ScheduleAdvance);
        assert!(m.pending().is_some());

        m.apply(SessionEvent::DisplayElapsed).unwrap();
        assert!(m.pending().is_none());
        assert_eq!(m.attempt().unwrap().challenge_index, 1);
        assert_eq!(m.phase(), SessionPhase::Playing);
    }

    #[test]
    fn second_answer_while_pending_is_rejected() {
        let mut m = machine();
        m.apply(SessionEvent::SelectLevel { level_id: 1 }).unwrap();
        m.apply(SessionEvent::Start).unwrap();
        m.apply(SessionEvent::SubmitAnswer { answer: text("4") }).unwrap();

        let err = m
            .apply(SessionEvent::SubmitAnswer { answer: text("4") })
            .unwrap_err();
        assert!(matches!(err, EngineError::State(_)));
        assert_eq!(m.attempt().unwrap().score, 10);
        assert!(m.apply(SessionEvent::ToggleHint).is_err());
    }

    #[test]
    fn numeric_looking_text_does_not_match_a_number() {
        let mut m = machine();
        m.apply(SessionEvent::SelectLevel { level_id: 1 }).unwrap();
        m.apply(SessionEvent::Start).unwrap();
        answer(&mut m, text("4"));

        let effects = m
            .apply(SessionEvent::SubmitAnswer { answer: text("7") })
            .unwrap();
        assert!(matches!(
            &effects[0],
            SessionEffect::AnswerEvaluated(feedback) if !feedback.is_correct
        ));
    }

    #[test]
    fn score_is_sum_of_correct_points() {
        let mut m = machine();
        let effects = play_level_one(
            &mut m,
            [text("4"), AnswerValue::Number(8.0), AnswerValue::Boolean(true)],
        );
        let done = finished(&effects);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].attempt.score, 20);
        assert_eq!(done[0].attempt.correct_count(), 2);
        assert_eq!(done[0].outcome.max_score, 30);
        assert!(done[0].outcome.pass);
        assert_eq!(m.phase(), SessionPhase::Completed);
    }

    #[test]
    fn passing_unlocks_next_level_exactly_once() {
        let mut m = machine();
        let effects = play_level_one(
            &mut m,
            [text("4"), AnswerValue::Number(7.0), AnswerValue::Boolean(true)],
        );
        let done = finished(&effects);
        assert!(done[0].progress_changed);
        assert_eq!(m.progress().current_level, 2);
        assert!(m.progress().is_completed(1));
        assert!(m.completion().unwrap().next_level_unlocked);
        assert!(m.completion().unwrap().outcome.is_excellent());
    }

    #[test]
    fn failing_leaves_progress_untouched() {
        let mut m = machine();
        let before = m.progress().clone();
        let effects = play_level_one(
            &mut m,
            [text("no"), AnswerValue::Number(7.0), AnswerValue::Boolean(false)],
        );
        let done = finished(&effects);
        assert!(!done[0].outcome.pass);
        assert!(!done[0].progress_changed);
        assert_eq!(m.progress(), &before);
    }

    #[test]
    fn replaying_a_passed_level_is_idempotent() {
        let mut m = machine();
        let all_correct = || [text("4"), AnswerValue::Number(7.0), AnswerValue::Boolean(true)];
        play_level_one(&mut m, all_correct());
        let after_first = m.progress().clone();

        m.apply(SessionEvent::BackToLevels).unwrap();
        let effects = play_level_one(&mut m, all_correct());
        let done = finished(&effects);
        assert!(done[0].outcome.pass);
        assert!(!done[0].progress_changed);
        assert_eq!(m.progress(), &after_first);
    }

    #[test]
    fn pass_at_threshold_with_zero_point_last_challenge() {
        let mut progress = LearnerProgress::new("child-1", "math");
        progress.current_level = 2;
        let mut m = SessionMachine::new(game(), progress);
        m.apply(SessionEvent::SelectLevel { level_id: 2 }).unwrap();
        m.apply(SessionEvent::Start).unwrap();
        answer(&mut m, text("x"));
        let effects = answer(&mut m, text("y"));

        let done = finished(&effects);
        assert_eq!(done[0].attempt.score, 15);
        assert!(done[0].outcome.pass);
        assert_eq!(done[0].outcome.max_score, 15);
    }

    #[test]
    fn hint_toggle_resets_on_advance_and_does_not_score() {
        let mut m = machine();
        m.apply(SessionEvent::SelectLevel { level_id: 1 }).unwrap();
        m.apply(SessionEvent::Start).unwrap();
        m.apply(SessionEvent::ToggleHint).unwrap();
        assert!(m.hint_visible());

        answer(&mut m, text("4"));
        assert!(!m.hint_visible());
        assert_eq!(m.attempt().unwrap().score, 10);
    }

    #[test]
    fn retry_resets_attempt_on_same_level() {
        let mut m = machine();
        play_level_one(&mut m, [text("x"), text("x"), text("x")]);
        m.apply(SessionEvent::Retry).unwrap();
        assert_eq!(m.phase(), SessionPhase::Instructions);
        let attempt = m.attempt().unwrap();
        assert_eq!(attempt.level_id, 1);
        assert_eq!(attempt.score, 0);
        assert_eq!(attempt.challenge_index, 0);
    }

    #[test]
    fn advance_after_pass_opens_next_level() {
        let mut m = machine();
        play_level_one(
            &mut m,
            [text("4"), AnswerValue::Number(7.0), AnswerValue::Boolean(true)],
        );
        m.apply(SessionEvent::Advance).unwrap();
        assert_eq!(m.phase(), SessionPhase::Instructions);
        assert_eq!(m.attempt().unwrap().level_id, 2);
    }

    #[test]
    fn advance_after_failure_returns_to_selection() {
        let mut m = machine();
        play_level_one(&mut m, [text("x"), text("x"), text("x")]);
        m.apply(SessionEvent::Advance).unwrap();
        assert_eq!(m.phase(), SessionPhase::LevelSelection);
        assert!(m.attempt().is_none());
    }

    #[test]
    fn advance_from_last_level_returns_to_selection() {
        let mut progress = LearnerProgress::new("child-1", "math");
        progress.current_level = 3;
        let mut m = SessionMachine::new(game(), progress);
        m.apply(SessionEvent::SelectLevel { level_id: 3 }).unwrap();
        m.apply(SessionEvent::Start).unwrap();
        answer(&mut m, text("z"));
        assert_eq!(m.progress().current_level, 4);
        assert!(!m.completion().unwrap().next_level_unlocked);

        m.apply(SessionEvent::Advance).unwrap();
        assert_eq!(m.phase(), SessionPhase::LevelSelection);
    }

    #[test]
    fn retry_and_advance_outside_completed_are_state_errors() {
        let mut m = machine();
        assert!(matches!(
            m.apply(SessionEvent::Retry),
            Err(EngineError::State(_))
        ));
        assert!(matches!(
            m.apply(SessionEvent::Advance),
            Err(EngineError::State(_))
        ));
        assert!(matches!(
            m.apply(SessionEvent::DisplayElapsed),
            Err(EngineError::State(_))
        ));
    }

    #[test]
    fn completion_is_emitted_only_on_the_transition() {
        let mut m = machine();
        let effects = play_level_one(&mut m, [text("4"), text("x"), text("x")]);
        assert_eq!(finished(&effects).len(), 1);
        // Reading state afterwards produces nothing new.
        assert!(m.apply(SessionEvent::DisplayElapsed).is_err());
        assert!(m.completion().is_some());
    }

    #[test]
    fn level_without_challenges_completes_on_start() {
        let mut g = game();
        g.levels.push(level(4, 0, Vec::new()));
        let mut progress = LearnerProgress::new("child-1", "math");
        progress.current_level = 4;
        let mut m = SessionMachine::new(g, progress);
        m.apply(SessionEvent::SelectLevel { level_id: 4 }).unwrap();
        let effects = m.apply(SessionEvent::Start).unwrap();
        let done = finished(&effects);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].outcome.percentage, 0.0);
        assert_eq!(m.phase(), SessionPhase::Completed);
    }

    #[test]
    fn progress_is_monotonic_across_many_attempts() {
        let mut m = machine();
        let mut last_level = m.progress().current_level;
        let mut last_completed = m.progress().completed_levels.clone();
        let rounds: Vec<[AnswerValue; 3]> = vec![
            [text("4"), AnswerValue::Number(7.0), AnswerValue::Boolean(true)],
            [text("x"), text("x"), text("x")],
            [text("4"), AnswerValue::Number(7.0), text("x")],
        ];
        for round in rounds {
            if m.phase() != SessionPhase::LevelSelection {
                m.apply(SessionEvent::BackToLevels).unwrap();
            }
            play_level_one(&mut m, round);
            assert!(m.progress().current_level >= last_level);
            assert!(last_completed.is_subset(&m.progress().completed_levels));
            last_level = m.progress().current_level;
            last_completed = m.progress().completed_levels.clone();
        }
    }

    #[test]
    fn display_is_due_only_after_the_interval() {
        let mut m = machine();
        m.apply(SessionEvent::SelectLevel { level_id: 1 }).unwrap();
        m.apply(SessionEvent::Start).unwrap();
        assert!(!m.display_due(Utc::now(), Duration::ZERO));

        m.apply(SessionEvent::SubmitAnswer { answer: text("4") }).unwrap();
        let since = m.pending().unwrap().pending_since;
        let interval = Duration::from_millis(1500);
        assert!(!m.display_due(since, interval));
        assert!(!m.display_due(since + chrono::Duration::milliseconds(1499), interval));
        assert!(m.display_due(since + chrono::Duration::milliseconds(1500), interval));
        assert!(!m.display_due(since - chrono::Duration::seconds(5), interval));
    }

    #[test]
    fn score_saturates_on_oversized_points() {
        let mut big = game();
        big.levels[0].challenges[0].points = u32::MAX;
        big.levels[0].challenges[1].points = u32::MAX;
        let mut m = SessionMachine::new(big, LearnerProgress::new("child-1", "math"));

        let effects = play_level_one(
            &mut m,
            [text("4"), AnswerValue::Number(7.0), AnswerValue::Boolean(true)],
        );
        let done = finished(&effects);
        assert_eq!(done[0].attempt.score, u32::MAX);
        assert_eq!(done[0].outcome.max_score, u32::MAX);
        assert!(done[0].outcome.pass);
    }

    #[test]
    fn machine_survives_a_serde_round_trip_mid_attempt() {
        let mut m = machine();
        m.apply(SessionEvent::SelectLevel { level_id: 1 }).unwrap();
        m.apply(SessionEvent::Start).unwrap();
        m.apply(SessionEvent::SubmitAnswer { answer: text("4") }).unwrap();

        let json = serde_json::to_string(&m).unwrap();
        let mut restored: SessionMachine = serde_json::from_str(&json).unwrap();
        assert!(restored.pending().is_some());
        restored.apply(SessionEvent::DisplayElapsed).unwrap();
        assert_eq!(restored.attempt().unwrap().challenge_index, 1);
    }
}
