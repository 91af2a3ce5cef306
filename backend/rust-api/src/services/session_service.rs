use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;
use validator::Validate;

use crate::config::QuizSettings;
use crate::error::{EngineError, EngineResult};
use crate::metrics::{self, SESSIONS_ACTIVE, SESSIONS_CREATED_TOTAL};
use crate::models::game::{Difficulty, Game, Level};
use crate::models::progress::LearnerProgress;
use crate::models::question::Question;
use crate::models::result::{GameMeta, LearnerIdentity};
use crate::models::session::{
    CreateAdaptiveSessionRequest, CreateSessionRequest, EventResponse, SessionMode, SessionRecord,
    SessionView,
};
use crate::services::game_catalog::GameCatalog;
use crate::services::path_predictor::PathPredictor;
use crate::services::progress_store::ProgressStore;
use crate::services::question_sampler::QuestionSampler;
use crate::services::result_recorder::ResultRecorder;
use crate::services::session_engine::{
    AnswerFeedback, FinishedAttempt, SessionEffect, SessionEvent, SessionMachine,
};
use crate::services::session_store::SessionStore;

pub const ADAPTIVE_GAME_ID: &str = "adaptive";

/// Drives session machines: loads the snapshot, applies one event under the
/// session's lock, runs the effects and stores the snapshot again.
pub struct SessionService {
    sessions: Arc<dyn SessionStore>,
    catalog: Arc<dyn GameCatalog>,
    progress: ProgressStore,
    predictor: PathPredictor,
    sampler: QuestionSampler,
    recorder: ResultRecorder,
    settings: QuizSettings,
    display_interval: Duration,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        catalog: Arc<dyn GameCatalog>,
        progress: ProgressStore,
        predictor: PathPredictor,
        sampler: QuestionSampler,
        recorder: ResultRecorder,
        settings: QuizSettings,
        display_interval: Duration,
    ) -> Self {
        Self {
            sessions,
            catalog,
            progress,
            predictor,
            sampler,
            recorder,
            settings,
            display_interval,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn create_session(&self, req: CreateSessionRequest) -> EngineResult<SessionView> {
        req.validate()?;

        let game = self
            .catalog
            .get(&req.game_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("Game {} not found", req.game_id)))?;
        let progress = self
            .progress
            .load_or_default(req.identity.id(), &game.id)
            .await?;

        let meta = GameMeta {
            game: Some(game.id.clone()),
            subject: Some(game.subject()),
            quiz_id: None,
        };
        let record = self.new_record(
            SessionMode::Fixed,
            req.identity,
            meta,
            SessionMachine::new(game, progress),
            None,
            Vec::new(),
        );
        self.sessions.save(&record).await?;

        tracing::info!(
            session_id = %record.id,
            game_id = %record.machine.game().id,
            learner_id = %record.identity.id(),
            "Fixed session created"
        );
        SESSIONS_CREATED_TOTAL.with_label_values(&["fixed"]).inc();
        SESSIONS_ACTIVE.inc();

        Ok(SessionView::new(&record))
    }

    /// Predicts a path, samples one question per tier and opens them as a
    /// single level, ready at its instructions.
    pub async fn create_adaptive_session(
        &self,
        req: CreateAdaptiveSessionRequest,
    ) -> EngineResult<SessionView> {
        req.validate()?;

        let path = self
            .predictor
            .predict(req.score, &req.emotion_probabilities)
            .await?;
        let sampled = self
            .sampler
            .sample_many(&path, req.scope_id.as_deref())
            .await?;
        if sampled.questions.is_empty() {
            return Err(EngineError::not_found(
                "No questions matched the predicted difficulty path",
            ));
        }

        let game = adaptive_game(
            &sampled.questions,
            &path.0,
            self.settings.adaptive_points_per_question,
            self.settings.adaptive_pass_ratio,
        );
        let progress = LearnerProgress::new(req.identity.id(), ADAPTIVE_GAME_ID);
        let mut machine = SessionMachine::new(game, progress);
        machine.apply(SessionEvent::SelectLevel { level_id: 1 })?;

        let meta = GameMeta {
            game: Some(ADAPTIVE_GAME_ID.to_string()),
            subject: req.scope_id.clone(),
            quiz_id: req.scope_id,
        };
        let record = self.new_record(
            SessionMode::Adaptive,
            req.identity,
            meta,
            machine,
            Some(path.ordinals()),
            sampled.warnings,
        );
        self.sessions.save(&record).await?;

        tracing::info!(
            session_id = %record.id,
            learner_id = %record.identity.id(),
            questions = record.machine.game().levels[0].challenges.len(),
            "Adaptive session created"
        );
        SESSIONS_CREATED_TOTAL.with_label_values(&["adaptive"]).inc();
        SESSIONS_ACTIVE.inc();

        Ok(SessionView::new(&record))
    }

    /// Current view. An answer whose display interval has passed is settled
    /// first; if that fails the stored snapshot is shown and the next request
    /// tries again.
    pub async fn get_session(&self, session_id: &str) -> EngineResult<SessionView> {
        match self.apply_locked(session_id, None).await {
            Ok((response, _)) => Ok(response.session),
            Err(EngineError::NotFound(reason)) => Err(EngineError::NotFound(reason)),
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Could not settle displayed answer");
                let record = self.load(session_id).await?;
                Ok(SessionView::new(&record))
            }
        }
    }

    /// Applies one learner event. A submitted answer schedules the
    /// deterministic advance after the display interval.
    pub async fn apply_event(
        self: &Arc<Self>,
        session_id: &str,
        event: SessionEvent,
    ) -> EngineResult<EventResponse> {
        if event == SessionEvent::DisplayElapsed {
            return Err(EngineError::state(
                "display_elapsed is issued by the server, not by clients",
            ));
        }

        let (response, schedule_advance) = self.apply_locked(session_id, Some(event)).await?;

        if schedule_advance {
            let service = Arc::clone(self);
            let session_id = session_id.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(service.display_interval).await;
                service.advance_after_display(&session_id).await;
            });
        }

        Ok(response)
    }

    pub async fn end_session(&self, session_id: &str) -> EngineResult<()> {
        let lock = self.lock_for(session_id).await;
        let outcome = {
            let _guard = lock.lock().await;
            match self.load(session_id).await {
                Ok(_) => self.sessions.delete(session_id).await,
                Err(e) => Err(e),
            }
        };
        self.release_lock(session_id, lock).await;

        outcome?;
        SESSIONS_ACTIVE.dec();
        tracing::info!(session_id = %session_id, "Session ended");
        Ok(())
    }

    /// Timer side of the display interval. Any request that touches the
    /// session after the interval settles it too, so giving up here only
    /// delays the advance.
    async fn advance_after_display(&self, session_id: &str) {
        let mut delay = Duration::from_millis(100);
        let mut attempts_left = 3;
        loop {
            match self.apply_locked(session_id, None).await {
                Ok(_) => return,
                Err(e) if e.is_transient() && attempts_left > 1 => {
                    attempts_left -= 1;
                    tracing::warn!(session_id = %session_id, error = %e, "Retrying deferred advance");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(EngineError::NotFound(_)) => {
                    tracing::debug!(session_id = %session_id, "Session gone before deferred advance");
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %session_id,
                        error = %e,
                        "Deferred advance failed; left for the next request"
                    );
                    return;
                }
            }
        }
    }

    async fn apply_locked(
        &self,
        session_id: &str,
        event: Option<SessionEvent>,
    ) -> EngineResult<(EventResponse, bool)> {
        let lock = self.lock_for(session_id).await;
        let outcome = {
            let _guard = lock.lock().await;
            self.apply_unlocked(session_id, event).await
        };
        self.release_lock(session_id, lock).await;
        outcome
    }

    /// The read-apply-write cycle; callers hold the session's lock. An overdue
    /// display is settled before `event`. Nothing is stored when settling
    /// fails; a settled snapshot is stored even when `event` is then rejected.
    async fn apply_unlocked(
        &self,
        session_id: &str,
        event: Option<SessionEvent>,
    ) -> EngineResult<(EventResponse, bool)> {
        let mut record = self.load(session_id).await?;
        let mut changed = false;

        if record
            .machine
            .display_due(Utc::now(), self.display_interval)
        {
            self.run_event(&mut record, SessionEvent::DisplayElapsed)
                .await?;
            changed = true;
        }

        let mut feedback = None;
        let mut schedule_advance = false;
        if let Some(event) = event {
            match self.run_event(&mut record, event).await {
                Ok((answer, advance)) => {
                    feedback = answer;
                    schedule_advance = advance;
                    changed = true;
                }
                Err(e) => {
                    if changed {
                        record.updated_at = Utc::now();
                        self.sessions.save(&record).await?;
                    }
                    return Err(e);
                }
            }
        }

        if changed {
            record.updated_at = Utc::now();
            self.sessions.save(&record).await?;
        }

        Ok((
            EventResponse {
                session: SessionView::new(&record),
                feedback,
            },
            schedule_advance,
        ))
    }

    /// Applies one event to the machine and runs its effects. Returns the
    /// answer feedback, if any, and whether an advance must be scheduled.
    async fn run_event(
        &self,
        record: &mut SessionRecord,
        event: SessionEvent,
    ) -> EngineResult<(Option<AnswerFeedback>, bool)> {
        let event_name = event.name();

        if record.mode == SessionMode::Fixed && matches!(event, SessionEvent::SelectLevel { .. }) {
            let latest = self
                .progress
                .load_or_default(record.identity.id(), &record.machine.game().id)
                .await?;
            record.machine.refresh_progress(&latest);
        }

        let mut machine = record.machine.clone();
        let effects = machine.apply(event)?;

        let mut feedback = None;
        let mut schedule_advance = false;
        let mut completed = None;
        for effect in effects {
            match effect {
                SessionEffect::AnswerEvaluated(answer) => feedback = Some(answer),
                SessionEffect::ScheduleAdvance => schedule_advance = true,
                SessionEffect::LevelCompleted(finished) => completed = Some(finished),
            }
        }

        if let Some(finished) = completed {
            self.finish_attempt(record, &mut machine, finished).await?;
        }
        if let Some(answer) = &feedback {
            metrics::record_answer(answer.is_correct);
        }
        record.machine = machine;

        tracing::debug!(
            session_id = %record.id,
            event = event_name,
            phase = ?record.machine.phase(),
            "Session event applied"
        );
        Ok((feedback, schedule_advance))
    }

    /// Completion side effects: progress (fixed sessions only, when it
    /// changed) and the result record. `machine` replaces the snapshot's only
    /// when both succeed.
    async fn finish_attempt(
        &self,
        record: &SessionRecord,
        machine: &mut SessionMachine,
        finished: FinishedAttempt,
    ) -> EngineResult<()> {
        if record.mode == SessionMode::Fixed && finished.progress_changed {
            let stored = self.progress.commit(&finished.progress).await?;
            machine.refresh_progress(&stored);
        }

        self.recorder
            .record(
                &finished.attempt,
                finished.outcome.max_score,
                &record.identity,
                &record.meta,
            )
            .await?;

        metrics::record_level_completed(record.mode.as_str(), finished.outcome.pass);
        tracing::info!(
            session_id = %record.id,
            level_id = finished.attempt.level_id,
            score = finished.attempt.score,
            max_score = finished.outcome.max_score,
            pass = finished.outcome.pass,
            "Level attempt completed"
        );
        Ok(())
    }

    async fn load(&self, session_id: &str) -> EngineResult<SessionRecord> {
        self.sessions
            .load(session_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("Session {} not found", session_id)))
    }

    async fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(session_id.to_string()).or_default())
    }

    /// Drops the session's lock entry once no other request holds or waits
    /// on it. `lock`'s guard must already be released.
    async fn release_lock(&self, session_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        let unused = locks
            .get(session_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &lock) && Arc::strong_count(&lock) == 2);
        if unused {
            locks.remove(session_id);
        }
    }

    fn new_record(
        &self,
        mode: SessionMode,
        identity: LearnerIdentity,
        meta: GameMeta,
        machine: SessionMachine,
        path: Option<Vec<u8>>,
        warnings: Vec<String>,
    ) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            id: Uuid::new_v4().to_string(),
            mode,
            identity,
            meta,
            machine,
            path,
            warnings,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Single-level game over sampled questions. The pass mark is
/// `ceil(ratio * max_score)`.
pub fn adaptive_game(
    questions: &[Question],
    path: &[Difficulty],
    points_per_question: u32,
    pass_ratio: f64,
) -> Game {
    let challenges: Vec<_> = questions
        .iter()
        .map(|question| question.to_challenge(points_per_question))
        .collect();
    let max_score: u32 = challenges.iter().map(|challenge| challenge.points).sum();
    let points_to_pass = (f64::from(max_score) * pass_ratio).ceil() as u32;
    let difficulty = path.iter().copied().max().unwrap_or(Difficulty::Easy);

    Game {
        id: ADAPTIVE_GAME_ID.to_string(),
        title: "Adaptive Quiz".to_string(),
        description: "Questions chosen for your current mood and score.".to_string(),
        levels: vec![Level {
            id: 1,
            title: "Adaptive Challenge".to_string(),
            difficulty,
            instructions: "Answer each question. Difficulty follows how you are doing.".to_string(),
            challenges,
            points_to_pass,
            time_limit: None,
        }],
        skills: Vec::new(),
        age_range: None,
    }
}
