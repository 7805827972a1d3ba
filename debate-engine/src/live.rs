//! Live user-vs-AI debate with timed turns.
//!
//! A round is one user message answered by one AI message. The turn timer
//! runs only while the engine waits for the user; while a generation call is
//! outstanding it is frozen and resumes from where it stopped if the call
//! fails. The session lock is never held across a generation call: the
//! request is prepared under the lock, the call runs unlocked, and the reply
//! is applied under the lock again only if the session is still in the same
//! epoch and round.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::access::{Feature, SharedAccessPolicy};
use crate::context::EngineContext;
use crate::error::{EngineError, EngineResult};
use crate::events::SessionEvent;
use crate::generation::{AiTurn, GenerationRequest, SharedGenerator};
use crate::report::{aggregate_score, clamp_score, live_report, LiveReport, Report, SCORE_MIN};
use crate::session::{
    DebateMode, LiveMessage, LiveState, ModeState, RoundScore, Session, SessionKey,
    SessionStatus, Speaker,
};
use crate::timer::{TimerSlot, TimerTicket};
use crate::topic::{Position, Topic};

/// What the controller is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    /// No debate running.
    Idle,
    /// Opening message is being generated.
    Opening,
    /// Waiting for the user; the turn timer is armed.
    AwaitingUser,
    /// A generation call is outstanding; the turn timer is frozen.
    AwaitingAi,
}

/// Result of a submitted turn.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The AI answered and the next round has begun.
    NextRound { round: u32, reply: LiveMessage },
    /// The AI answered the final round; the debate is finalized.
    Finished {
        reply: LiveMessage,
        report: LiveReport,
    },
    /// The reply arrived after a reset and was dropped.
    Discarded,
}

struct LiveInner {
    topic: Topic,
    /// Active, completed, or parked (not started) record for the key.
    session: Option<Session>,
    phase: TurnPhase,
    /// Bumped on reset; replies from an older epoch are dropped.
    epoch: u64,
    timer: TimerSlot,
    /// Turn time left when the timer was frozen for a generation call.
    frozen_remaining: Option<Duration>,
}

impl LiveInner {
    fn active(&self) -> EngineResult<&Session> {
        match &self.session {
            Some(s) if s.status == SessionStatus::InProgress => Ok(s),
            Some(s) if s.is_completed() => Err(EngineError::ReadOnly {
                session_id: s.id.clone(),
            }),
            _ => Err(EngineError::invalid_state("no live debate in progress")),
        }
    }

    fn ensure_turn_free(&self) -> EngineResult<()> {
        match self.phase {
            TurnPhase::Opening => Err(EngineError::in_progress("opening message generation")),
            TurnPhase::AwaitingAi => Err(EngineError::in_progress("AI turn generation")),
            TurnPhase::Idle | TurnPhase::AwaitingUser => Ok(()),
        }
    }
}

fn live_state(session: &Session) -> EngineResult<&LiveState> {
    session.live().ok_or_else(|| {
        EngineError::invalid_state(format!("session {} holds no live state", session.id))
    })
}

fn live_state_mut(session: &mut Session) -> EngineResult<&mut LiveState> {
    let id = session.id.clone();
    session
        .live_mut()
        .ok_or_else(|| EngineError::invalid_state(format!("session {} holds no live state", id)))
}

fn request_for(topic: &Topic, state: &LiveState) -> GenerationRequest {
    GenerationRequest {
        topic_id: topic.id.clone(),
        topic_title: topic.title.clone(),
        user_stance: topic
            .position(&state.selected_position_id)
            .map(|p| p.stance.to_string())
            .unwrap_or_default(),
        opponent_persona: state.opponent_persona.clone(),
        transcript: state.messages.clone(),
        round: state.round,
        max_rounds: state.max_rounds,
    }
}

/// Close out `round` and move on; finalizes the session after the last one.
/// Returns the report when the debate finished.
fn close_round(session: &mut Session, outcome: RoundScore) -> EngineResult<Option<LiveReport>> {
    let state = live_state_mut(session)?;
    state.round_scores.push(outcome);
    state.round += 1;
    if state.round <= state.max_rounds {
        return Ok(None);
    }
    let score = aggregate_score(&state.round_scores);
    let report = live_report(state);
    session.score = Some(score);
    session.complete(Some(Report::Live(report.clone())));
    Ok(Some(report))
}

pub(crate) struct LiveShared {
    ctx: EngineContext,
    access: SharedAccessPolicy,
    generator: SharedGenerator,
    key: SessionKey,
    inner: Mutex<LiveInner>,
}

/// Handle to one user's live debate on one topic.
#[derive(Clone)]
pub struct LiveController {
    shared: Arc<LiveShared>,
}

impl LiveController {
    /// Load the topic and any stored debate for `(user, topic)`. An
    /// in-progress debate resumes with a fresh turn timer.
    pub async fn open(
        ctx: EngineContext,
        access: SharedAccessPolicy,
        generator: SharedGenerator,
        user_id: &str,
        topic_id: &str,
    ) -> EngineResult<Self> {
        let topic = ctx.catalog.get_topic(topic_id).await?;
        let key = SessionKey::new(user_id, topic_id, DebateMode::Live);
        let session = ctx.store.load(&key).await?;
        if let Some(existing) = &session {
            live_state(existing)?;
        }

        let resuming = session
            .as_ref()
            .is_some_and(|s| s.status == SessionStatus::InProgress);
        let shared = Arc::new(LiveShared {
            ctx,
            access,
            generator,
            key,
            inner: Mutex::new(LiveInner {
                topic,
                session,
                phase: TurnPhase::Idle,
                epoch: 0,
                timer: TimerSlot::new(),
                frozen_remaining: None,
            }),
        });

        {
            let mut inner = shared.inner.lock().await;
            if let Some(existing) = &inner.session {
                shared.ctx.publish(SessionEvent::Resumed {
                    session_id: existing.id.clone(),
                    mode: DebateMode::Live,
                    status: existing.status,
                    timestamp: Utc::now(),
                });
                info!(session_id = %existing.id, status = %existing.status, "Loaded live session");
            }
            if resuming {
                inner.phase = TurnPhase::AwaitingUser;
                let limit = shared.ctx.config.turn_time_limit();
                shared.arm_turn_timer(&mut inner, limit);
            }
        }

        Ok(Self { shared })
    }

    pub fn key(&self) -> &SessionKey {
        &self.shared.key
    }

    pub(crate) fn downgrade(&self) -> Weak<LiveShared> {
        Arc::downgrade(&self.shared)
    }

    pub(crate) fn upgrade(weak: &Weak<LiveShared>) -> Option<Self> {
        weak.upgrade().map(|shared| Self { shared })
    }

    /// Current record, if any debate was ever started for this key.
    pub async fn snapshot(&self) -> Option<Session> {
        self.shared.inner.lock().await.session.clone()
    }

    pub async fn phase(&self) -> TurnPhase {
        self.shared.inner.lock().await.phase
    }

    /// Time the user has left this turn. Frozen while the AI is answering.
    pub async fn turn_time_remaining(&self) -> Option<Duration> {
        let inner = self.shared.inner.lock().await;
        match inner.phase {
            TurnPhase::AwaitingAi => inner.frozen_remaining,
            _ => inner.timer.remaining(),
        }
    }

    /// Both positions of the topic, for an entitled user.
    pub async fn list_positions(&self) -> EngineResult<Vec<Position>> {
        self.shared.check_entitlement().await?;
        let inner = self.shared.inner.lock().await;
        Ok(inner.topic.positions.to_vec())
    }

    /// Start a debate arguing `position_id`; the AI takes the other side
    /// and opens. Starting while a debate is in progress resumes it.
    pub async fn start_with_position(&self, position_id: &str) -> EngineResult<Session> {
        let shared = &self.shared;
        shared.check_entitlement().await?;

        let (mut candidate, request, epoch) = {
            let mut inner = shared.lock().await?;
            match &inner.session {
                Some(s) if s.status == SessionStatus::InProgress => {
                    debug!(session_id = %s.id, "Debate already in progress, resuming");
                    return Ok(s.clone());
                }
                Some(s) if s.is_completed() => {
                    return Err(EngineError::ReadOnly {
                        session_id: s.id.clone(),
                    })
                }
                _ => {}
            }
            inner.ensure_turn_free()?;

            let position = inner
                .topic
                .position(position_id)
                .ok_or_else(|| EngineError::not_found("position", position_id))?;
            let opponent = inner.topic.opposing(position_id).ok_or_else(|| {
                EngineError::invalid_state(format!(
                    "topic {} has no position opposing {}",
                    inner.topic.id, position_id
                ))
            })?;
            let state = LiveState {
                selected_position_id: position.id.clone(),
                opponent_persona: opponent.ai_persona.clone(),
                round: 1,
                max_rounds: shared.ctx.config.max_rounds,
                messages: Vec::new(),
                feedback_log: Vec::new(),
                round_scores: Vec::new(),
            };
            let request = request_for(&inner.topic, &state);

            // Reuse a parked record so the key keeps a single id.
            let candidate = match inner.session.clone() {
                Some(mut parked) => {
                    parked.mode_state = ModeState::Live(state);
                    parked.score = None;
                    parked.report = None;
                    parked
                }
                None => Session::new(
                    &shared.key.user_id,
                    &shared.key.topic_id,
                    ModeState::Live(state),
                ),
            };
            inner.phase = TurnPhase::Opening;
            (candidate, request, inner.epoch)
        };

        let result = shared.generate(&request).await;

        let mut inner = shared.inner.lock().await;
        if inner.epoch != epoch {
            debug!(session_id = %candidate.id, "Opening reply arrived after reset, discarding");
            return Err(EngineError::invalid_state("debate was reset while starting"));
        }
        let turn = match result {
            Ok(turn) => turn,
            Err(e) => {
                inner.phase = TurnPhase::Idle;
                warn!(session_key = %shared.key, error = %e, "Opening message unavailable, debate not started");
                return Err(e);
            }
        };

        candidate.begin();
        let opening = LiveMessage::new(&candidate.id, Speaker::Ai, turn.message, 1);
        live_state_mut(&mut candidate)?.messages.push(opening);
        if let Err(e) = shared.ctx.persist(&mut candidate).await {
            inner.phase = TurnPhase::Idle;
            return Err(e);
        }

        info!(
            session_id = %candidate.id,
            position = position_id,
            max_rounds = shared.ctx.config.max_rounds,
            "Live debate started"
        );
        shared.ctx.publish(SessionEvent::Started {
            session_id: candidate.id.clone(),
            mode: DebateMode::Live,
            timestamp: Utc::now(),
        });
        shared.ctx.publish(SessionEvent::MessageAppended {
            session_id: candidate.id.clone(),
            speaker: Speaker::Ai,
            round: 1,
            timestamp: Utc::now(),
        });

        inner.session = Some(candidate.clone());
        inner.phase = TurnPhase::AwaitingUser;
        let limit = shared.ctx.config.turn_time_limit();
        shared.arm_turn_timer(&mut inner, limit);
        Ok(candidate)
    }

    /// Submit the user's argument for the current round and wait for the
    /// AI's answer.
    ///
    /// If an earlier message for this round is still waiting for a reply
    /// (its generation failed), that message is retried and `text` is
    /// ignored.
    pub async fn submit_user_message(&self, text: &str) -> EngineResult<TurnOutcome> {
        self.shared.run_turn(Some(text)).await
    }

    /// Retry generation for a retained user message.
    pub async fn retry_turn(&self) -> EngineResult<TurnOutcome> {
        self.shared.run_turn(None).await
    }

    /// Apply the turn timeout for the current round now. Returns `false`
    /// if no user turn was pending.
    pub async fn on_turn_timeout(&self) -> EngineResult<bool> {
        self.shared.handle_timeout(None).await
    }

    /// Abandon the current debate. Pending timers are cancelled and any
    /// in-flight reply will be discarded. A completed debate stays on record.
    pub async fn reset(&self) -> EngineResult<()> {
        let shared = &self.shared;
        let mut inner = shared.lock().await?;
        inner.timer.disarm();
        inner.epoch += 1;
        inner.frozen_remaining = None;
        inner.phase = TurnPhase::Idle;

        let Some(current) = inner.session.clone() else {
            return Ok(());
        };
        let session_id = current.id.clone();
        match current.status {
            SessionStatus::Completed => {
                inner.session = None;
            }
            SessionStatus::InProgress | SessionStatus::NotStarted => {
                let mut parked = current;
                let state = live_state_mut(&mut parked)?;
                state.round = 1;
                state.messages.clear();
                state.feedback_log.clear();
                state.round_scores.clear();
                parked.status = SessionStatus::NotStarted;
                parked.completed_at = None;
                parked.score = None;
                parked.report = None;
                shared.ctx.persist(&mut parked).await?;
                inner.session = Some(parked);
            }
        }

        info!(session_id = %session_id, epoch = inner.epoch, "Live debate reset");
        shared.ctx.publish(SessionEvent::Reset {
            session_id,
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

impl LiveShared {
    async fn lock(&self) -> EngineResult<MutexGuard<'_, LiveInner>> {
        self.ctx.lock(&self.inner, &self.key).await
    }

    async fn check_entitlement(&self) -> EngineResult<()> {
        if self
            .access
            .check_entitlement(&self.key.user_id, Feature::LiveDebate)
            .await
        {
            return Ok(());
        }
        info!(user_id = %self.key.user_id, "Live debate not available for user");
        Err(EngineError::AccessDenied {
            user_id: self.key.user_id.clone(),
            feature: Feature::LiveDebate.to_string(),
        })
    }

    async fn generate(&self, request: &GenerationRequest) -> EngineResult<AiTurn> {
        let limit = self.ctx.config.generation_timeout();
        match tokio::time::timeout(limit, self.generator.generate_ai_turn(request)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::generation(format!(
                "no reply within {}s",
                limit.as_secs()
            ))),
        }
    }

    fn arm_turn_timer(self: &Arc<Self>, inner: &mut LiveInner, delay: Duration) {
        let weak = Arc::downgrade(self);
        inner.timer.arm(delay, move |ticket| async move {
            if let Some(shared) = weak.upgrade() {
                if let Err(e) = shared.handle_timeout(Some(ticket)).await {
                    warn!(session_key = %shared.key, error = %e, "Turn timeout could not be applied");
                }
            }
        });
    }

    async fn run_turn(self: &Arc<Self>, text: Option<&str>) -> EngineResult<TurnOutcome> {
        let (request, epoch, session_id, round) = {
            let mut inner = self.lock().await?;
            let session = inner.active()?;
            inner.ensure_turn_free()?;
            let state = live_state(session)?;
            if state.round > state.max_rounds {
                return Err(EngineError::invalid_state(format!(
                    "round {} exceeds the {} allowed",
                    state.round, state.max_rounds
                )));
            }
            let session_id = session.id.clone();
            let round = state.round;

            match state.retained_message() {
                Some(retained) => {
                    if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
                        if text != retained.content {
                            warn!(
                                session_id = %session_id,
                                round,
                                "Earlier message still awaiting a reply, retrying it instead"
                            );
                        }
                    }
                    debug!(session_id = %session_id, round, "Retrying retained message");
                }
                None => {
                    let text = match text {
                        Some(t) if !t.trim().is_empty() => t,
                        Some(_) => return Err(EngineError::invalid_state("message is empty")),
                        None => {
                            return Err(EngineError::invalid_state(
                                "no message is waiting for a reply",
                            ))
                        }
                    };
                    let mut next = session.clone();
                    let message = LiveMessage::new(&session_id, Speaker::User, text, round);
                    live_state_mut(&mut next)?.messages.push(message);
                    self.ctx.persist(&mut next).await?;
                    inner.session = Some(next);
                    self.ctx.publish(SessionEvent::MessageAppended {
                        session_id: session_id.clone(),
                        speaker: Speaker::User,
                        round,
                        timestamp: Utc::now(),
                    });
                }
            }

            let limit = self.ctx.config.turn_time_limit();
            let remaining = inner.timer.disarm().unwrap_or(limit);
            inner.frozen_remaining = Some(remaining);
            inner.phase = TurnPhase::AwaitingAi;
            debug!(
                session_id = %session_id,
                round,
                remaining_ms = remaining.as_millis() as u64,
                "Turn timer frozen for generation"
            );

            let session = inner.active()?;
            let request = request_for(&inner.topic, live_state(session)?);
            (request, inner.epoch, session_id, round)
        };

        let result = self.generate(&request).await;

        let mut inner = self.inner.lock().await;
        let current = inner
            .session
            .as_ref()
            .filter(|s| s.status == SessionStatus::InProgress)
            .and_then(|s| s.live().map(|l| (s.id.clone(), l.round)));
        if inner.epoch != epoch
            || inner.phase != TurnPhase::AwaitingAi
            || current != Some((session_id.clone(), round))
        {
            debug!(session_id = %session_id, round, "AI reply arrived after reset, discarding");
            return Ok(TurnOutcome::Discarded);
        }

        match result {
            Ok(turn) => self.apply_reply(&mut inner, &session_id, round, turn).await,
            Err(e) => {
                warn!(session_id = %session_id, round, error = %e, "AI turn generation failed");
                self.resume_user_turn(&mut inner);
                self.ctx.publish(SessionEvent::GenerationFailed {
                    session_id,
                    round,
                    reason: e.to_string(),
                    timestamp: Utc::now(),
                });
                Err(e)
            }
        }
    }

    /// Unfreeze the turn timer after a failed or unapplied reply.
    fn resume_user_turn(self: &Arc<Self>, inner: &mut LiveInner) {
        let remaining = inner
            .frozen_remaining
            .take()
            .unwrap_or_else(|| self.ctx.config.turn_time_limit());
        inner.phase = TurnPhase::AwaitingUser;
        self.arm_turn_timer(inner, remaining);
    }

    async fn apply_reply(
        self: &Arc<Self>,
        inner: &mut LiveInner,
        session_id: &str,
        round: u32,
        turn: AiTurn,
    ) -> EngineResult<TurnOutcome> {
        let Some(current) = inner.session.as_ref() else {
            return Ok(TurnOutcome::Discarded);
        };
        let mut next = current.clone();
        let reply = LiveMessage::new(session_id, Speaker::Ai, turn.message, round)
            .with_feedback(turn.feedback.clone());
        let state = live_state_mut(&mut next)?;
        state.messages.push(reply.clone());
        if let Some(feedback) = turn.feedback {
            state.feedback_log.push(feedback);
        }
        let report = close_round(
            &mut next,
            RoundScore {
                round,
                score: turn.score.map(clamp_score),
                timed_out: false,
            },
        )?;

        if let Err(e) = self.ctx.persist(&mut next).await {
            self.resume_user_turn(inner);
            return Err(e);
        }
        inner.session = Some(next);
        inner.frozen_remaining = None;
        self.ctx.publish(SessionEvent::MessageAppended {
            session_id: session_id.to_string(),
            speaker: Speaker::Ai,
            round,
            timestamp: Utc::now(),
        });

        match report {
            Some(report) => {
                inner.timer.disarm();
                inner.phase = TurnPhase::Idle;
                info!(session_id, score = report.score, "Live debate finished");
                self.ctx.publish(SessionEvent::Completed {
                    session_id: session_id.to_string(),
                    report: Some(Report::Live(report.clone())),
                    timestamp: Utc::now(),
                });
                Ok(TurnOutcome::Finished { reply, report })
            }
            None => {
                inner.phase = TurnPhase::AwaitingUser;
                let limit = self.ctx.config.turn_time_limit();
                self.arm_turn_timer(inner, limit);
                self.ctx.publish(SessionEvent::RoundAdvanced {
                    session_id: session_id.to_string(),
                    round: round + 1,
                    timestamp: Utc::now(),
                });
                Ok(TurnOutcome::NextRound {
                    round: round + 1,
                    reply,
                })
            }
        }
    }

    /// Forfeit the current round. `ticket` is set when the turn timer fired;
    /// manual calls pass `None`.
    async fn handle_timeout(self: &Arc<Self>, ticket: Option<TimerTicket>) -> EngineResult<bool> {
        let mut inner = match ticket {
            Some(_) => self.inner.lock().await,
            None => self.lock().await?,
        };
        if let Some(ticket) = ticket {
            if !inner.timer.accept(ticket) {
                debug!(ticket, "Stale turn timer ignored");
                return Ok(false);
            }
        }
        if inner.phase != TurnPhase::AwaitingUser {
            return Ok(false);
        }
        let mut next = match inner.active() {
            Ok(session) => session.clone(),
            Err(_) => return Ok(false),
        };
        inner.timer.disarm();

        let session_id = next.id.clone();
        let round = live_state(&next)?.round;
        let notice = LiveMessage::new(
            &session_id,
            Speaker::System,
            format!("Round {round} timed out. No argument was submitted."),
            round,
        );
        live_state_mut(&mut next)?.messages.push(notice);
        let report = close_round(
            &mut next,
            RoundScore {
                round,
                score: Some(SCORE_MIN),
                timed_out: true,
            },
        )?;

        if let Err(e) = self.ctx.persist(&mut next).await {
            let limit = self.ctx.config.turn_time_limit();
            self.arm_turn_timer(&mut inner, limit);
            return Err(e);
        }
        inner.session = Some(next);

        info!(session_id = %session_id, round, "Turn timed out");
        self.ctx.publish(SessionEvent::TurnTimedOut {
            session_id: session_id.clone(),
            round,
            timestamp: Utc::now(),
        });
        self.ctx.publish(SessionEvent::MessageAppended {
            session_id: session_id.clone(),
            speaker: Speaker::System,
            round,
            timestamp: Utc::now(),
        });

        match report {
            Some(report) => {
                inner.phase = TurnPhase::Idle;
                info!(session_id = %session_id, score = report.score, "Live debate finished on timeout");
                self.ctx.publish(SessionEvent::Completed {
                    session_id,
                    report: Some(Report::Live(report)),
                    timestamp: Utc::now(),
                });
            }
            None => {
                let limit = self.ctx.config.turn_time_limit();
                self.arm_turn_timer(&mut inner, limit);
                self.ctx.publish(SessionEvent::RoundAdvanced {
                    session_id,
                    round: round + 1,
                    timestamp: Utc::now(),
                });
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::access::MockAccessPolicy;
    use crate::catalog::InMemoryCatalog;
    use crate::config::EngineConfig;
    use crate::events::EventBus;
    use crate::generation::{AiTurnGenerator, MockAiTurnGenerator};
    use crate::store::{MemorySessionStore, SessionStore};
    use crate::topic::fixtures;

    fn context(max_rounds: u32) -> (EngineContext, Arc<MemorySessionStore>) {
        let store = Arc::new(MemorySessionStore::new());
        let catalog = InMemoryCatalog::new()
            .with_topic(fixtures::topic("t1"))
            .shared();
        let config = EngineConfig {
            max_rounds,
            ..EngineConfig::default()
        };
        let ctx = EngineContext::new(config, store.clone(), catalog, EventBus::new().shared());
        (ctx, store)
    }

    fn access(allowed: bool) -> SharedAccessPolicy {
        let mut policy = MockAccessPolicy::new();
        policy
            .expect_check_entitlement()
            .returning(move |_, _| allowed);
        Arc::new(policy)
    }

    fn reply(request: &GenerationRequest, score: f64) -> AiTurn {
        if request.is_opening() {
            return AiTurn {
                message: "Opening argument".into(),
                feedback: None,
                score: None,
            };
        }
        AiTurn {
            message: format!("Counter for round {}", request.round),
            feedback: Some(format!("Feedback {}", request.round)),
            score: Some(score),
        }
    }

    fn steady_generator(score: f64) -> SharedGenerator {
        let mut generator = MockAiTurnGenerator::new();
        generator
            .expect_generate_ai_turn()
            .returning(move |request| Ok(reply(request, score)));
        Arc::new(generator)
    }

    /// Answers the opening, then plays back queued results.
    struct QueueGenerator {
        replies: std::sync::Mutex<VecDeque<EngineResult<AiTurn>>>,
    }

    impl QueueGenerator {
        fn new(replies: Vec<EngineResult<AiTurn>>) -> SharedGenerator {
            Arc::new(Self {
                replies: std::sync::Mutex::new(replies.into()),
            })
        }
    }

    #[async_trait]
    impl AiTurnGenerator for QueueGenerator {
        async fn generate_ai_turn(&self, request: &GenerationRequest) -> EngineResult<AiTurn> {
            if request.is_opening() {
                return Ok(reply(request, 0.0));
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(EngineError::generation("no more replies")))
        }
    }

    /// Blocks each non-opening call until released.
    struct GatedGenerator {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl AiTurnGenerator for GatedGenerator {
        async fn generate_ai_turn(&self, request: &GenerationRequest) -> EngineResult<AiTurn> {
            if !request.is_opening() {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Ok(reply(request, 70.0))
        }
    }

    /// Never answers a turn.
    struct HangingGenerator;

    #[async_trait]
    impl AiTurnGenerator for HangingGenerator {
        async fn generate_ai_turn(&self, request: &GenerationRequest) -> EngineResult<AiTurn> {
            if request.is_opening() {
                return Ok(reply(request, 0.0));
            }
            tokio::time::sleep(Duration::from_secs(3_600)).await;
            Ok(reply(request, 0.0))
        }
    }

    async fn open_with(
        ctx: EngineContext,
        generator: SharedGenerator,
    ) -> LiveController {
        LiveController::open(ctx, access(true), generator, "u1", "t1")
            .await
            .unwrap()
    }

    fn state(session: &Session) -> &LiveState {
        session.live().unwrap()
    }

    #[tokio::test]
    async fn test_access_denied_mutates_nothing() {
        let (ctx, store) = context(3);
        let live = LiveController::open(ctx, access(false), steady_generator(50.0), "u1", "t1")
            .await
            .unwrap();

        let err = live.list_positions().await.unwrap_err();
        assert!(matches!(err, EngineError::AccessDenied { .. }));
        let err = live.start_with_position("t1-for").await.unwrap_err();
        assert!(matches!(err, EngineError::AccessDenied { .. }));

        assert!(live.snapshot().await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_start_assigns_opposing_persona_and_opens() {
        let (ctx, store) = context(3);
        let live = open_with(ctx, steady_generator(50.0)).await;
        assert_eq!(live.list_positions().await.unwrap().len(), 2);

        let session = live.start_with_position("t1-for").await.unwrap();
        assert_eq!(session.status, SessionStatus::InProgress);
        let s = state(&session);
        assert_eq!(s.opponent_persona, "Student Kim");
        assert_eq!(s.round, 1);
        assert_eq!(s.messages.len(), 1);
        assert_eq!(s.messages[0].speaker, Speaker::Ai);
        assert_eq!(live.phase().await, TurnPhase::AwaitingUser);

        let stored = store.load(live.key()).await.unwrap().unwrap();
        assert_eq!(stored.id, session.id);

        // Starting again resumes the same debate
        let again = live.start_with_position("t1-against").await.unwrap();
        assert_eq!(again.id, session.id);
    }

    #[tokio::test]
    async fn test_opening_failure_saves_nothing() {
        let (ctx, store) = context(3);
        let mut generator = MockAiTurnGenerator::new();
        generator
            .expect_generate_ai_turn()
            .returning(|_| Err(EngineError::generation("offline")));
        let live = open_with(ctx, Arc::new(generator)).await;

        let err = live.start_with_position("t1-for").await.unwrap_err();
        assert!(matches!(err, EngineError::GenerationUnavailable { .. }));
        assert!(live.snapshot().await.is_none());
        assert_eq!(live.phase().await, TurnPhase::Idle);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_unknown_position() {
        let (ctx, _) = context(3);
        let live = open_with(ctx, steady_generator(50.0)).await;
        let err = live.start_with_position("nope").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_full_debate_finalizes_with_score() {
        let (ctx, _) = context(2);
        let live = open_with(ctx, steady_generator(80.0)).await;
        live.start_with_position("t1-against").await.unwrap();

        let outcome = live.submit_user_message("first point").await.unwrap();
        assert!(matches!(outcome, TurnOutcome::NextRound { round: 2, .. }));

        let outcome = live.submit_user_message("second point").await.unwrap();
        let TurnOutcome::Finished { report, .. } = outcome else {
            panic!("expected the debate to finish");
        };
        assert_eq!(report.score, 80.0);
        assert_eq!(report.arguments_made, 2);
        assert_eq!(report.feedback_log.len(), 2);

        let session = live.snapshot().await.unwrap();
        assert!(session.is_completed());
        assert_eq!(session.score, Some(80.0));
        assert_eq!(state(&session).messages.len(), 5);
        assert_eq!(live.phase().await, TurnPhase::Idle);

        let err = live.submit_user_message("too late").await.unwrap_err();
        assert!(matches!(err, EngineError::ReadOnly { .. }));
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let (ctx, _) = context(2);
        let live = open_with(ctx, steady_generator(50.0)).await;
        live.start_with_position("t1-for").await.unwrap();
        let err = live.submit_user_message("   ").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { .. }));
        let err = live.retry_turn().await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_generation_retains_message_and_freezes_timer() {
        let (ctx, _) = context(3);
        let generator = QueueGenerator::new(vec![
            Err(EngineError::generation("busy")),
            Ok(AiTurn {
                message: "Counter".into(),
                feedback: Some("Good".into()),
                score: Some(60.0),
            }),
        ]);
        let live = open_with(ctx, generator).await;
        live.start_with_position("t1-for").await.unwrap();

        tokio::time::sleep(Duration::from_secs(100)).await;
        let err = live.submit_user_message("my point").await.unwrap_err();
        assert!(matches!(err, EngineError::GenerationUnavailable { .. }));

        let session = live.snapshot().await.unwrap();
        assert_eq!(state(&session).retained_message().unwrap().content, "my point");
        assert_eq!(state(&session).round, 1);
        assert_eq!(live.phase().await, TurnPhase::AwaitingUser);
        assert_eq!(live.turn_time_remaining().await, Some(Duration::from_secs(20)));

        // New text is ignored in favour of the retained message
        let outcome = live.submit_user_message("something else").await.unwrap();
        assert!(matches!(outcome, TurnOutcome::NextRound { round: 2, .. }));
        let session = live.snapshot().await.unwrap();
        assert_eq!(state(&session).count_by(Speaker::User), 1);
        assert_eq!(state(&session).feedback_log, vec!["Good"]);
        assert_eq!(
            live.turn_time_remaining().await,
            Some(Duration::from_secs(120))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_turn_timeout_forfeits_round() {
        let (ctx, _) = context(3);
        let mut events = ctx.events.subscribe();
        let live = open_with(ctx, steady_generator(50.0)).await;
        live.start_with_position("t1-for").await.unwrap();

        tokio::time::sleep(Duration::from_secs(121)).await;

        let session = live.snapshot().await.unwrap();
        let s = state(&session);
        assert_eq!(s.round, 2);
        assert_eq!(s.count_by(Speaker::System), 1);
        assert!(s.round_scores[0].timed_out);
        assert_eq!(live.phase().await, TurnPhase::AwaitingUser);

        let mut timeouts = 0;
        while let Ok(event) = events.try_recv() {
            if event.event_type() == "turn_timed_out" {
                timeouts += 1;
            }
        }
        assert_eq!(timeouts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_on_last_round_finalizes() {
        let (ctx, _) = context(1);
        let live = open_with(ctx, steady_generator(90.0)).await;
        live.start_with_position("t1-for").await.unwrap();

        assert!(live.on_turn_timeout().await.unwrap());
        let session = live.snapshot().await.unwrap();
        assert!(session.is_completed());
        assert_eq!(session.score, Some(0.0));

        // Nothing left to time out, and the disarmed timer never fires
        assert!(!live.on_turn_timeout().await.unwrap());
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(state(&live.snapshot().await.unwrap()).count_by(Speaker::System), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_timeout_is_unavailable() {
        let (ctx, _) = context(3);
        let live = open_with(ctx, Arc::new(HangingGenerator)).await;
        live.start_with_position("t1-for").await.unwrap();

        let err = live.submit_user_message("point").await.unwrap_err();
        assert!(matches!(err, EngineError::GenerationUnavailable { .. }));
        let session = live.snapshot().await.unwrap();
        assert!(state(&session).retained_message().is_some());
        assert_eq!(
            live.turn_time_remaining().await,
            Some(Duration::from_secs(120))
        );
    }

    #[tokio::test]
    async fn test_concurrent_submit_is_rejected() {
        let (ctx, _) = context(3);
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let generator = Arc::new(GatedGenerator {
            entered: entered.clone(),
            release: release.clone(),
        });
        let live = open_with(ctx, generator).await;
        live.start_with_position("t1-for").await.unwrap();

        let first = live.clone();
        let pending = tokio::spawn(async move { first.submit_user_message("point one").await });
        entered.notified().await;
        assert_eq!(live.phase().await, TurnPhase::AwaitingAi);

        let err = live.submit_user_message("point two").await.unwrap_err();
        assert!(matches!(err, EngineError::OperationInProgress { .. }));

        release.notify_one();
        let outcome = pending.await.unwrap().unwrap();
        assert!(matches!(outcome, TurnOutcome::NextRound { round: 2, .. }));
        let session = live.snapshot().await.unwrap();
        assert_eq!(state(&session).count_by(Speaker::User), 1);
    }

    #[tokio::test]
    async fn test_reply_after_reset_is_discarded() {
        let (ctx, store) = context(3);
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let generator = Arc::new(GatedGenerator {
            entered: entered.clone(),
            release: release.clone(),
        });
        let live = open_with(ctx, generator).await;
        let started = live.start_with_position("t1-for").await.unwrap();

        let first = live.clone();
        let pending = tokio::spawn(async move { first.submit_user_message("point").await });
        entered.notified().await;

        live.reset().await.unwrap();
        release.notify_one();
        assert_eq!(pending.await.unwrap().unwrap(), TurnOutcome::Discarded);

        let parked = live.snapshot().await.unwrap();
        assert_eq!(parked.id, started.id);
        assert_eq!(parked.status, SessionStatus::NotStarted);
        assert!(state(&parked).messages.is_empty());
        let stored = store.load(live.key()).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::NotStarted);

        // A new start reuses the parked record
        let restarted = live.start_with_position("t1-against").await.unwrap();
        assert_eq!(restarted.id, started.id);
        assert!(restarted.revision > parked.revision);
    }

    #[tokio::test]
    async fn test_reset_after_completion_keeps_record() {
        let (ctx, store) = context(1);
        let live = open_with(ctx, steady_generator(75.0)).await;
        live.start_with_position("t1-for").await.unwrap();
        live.submit_user_message("only point").await.unwrap();
        let finished = live.snapshot().await.unwrap();
        assert!(finished.is_completed());

        let err = live.start_with_position("t1-for").await.unwrap_err();
        assert!(matches!(err, EngineError::ReadOnly { .. }));

        live.reset().await.unwrap();
        assert!(live.snapshot().await.is_none());
        let fresh = live.start_with_position("t1-for").await.unwrap();
        assert_ne!(fresh.id, finished.id);

        let old = store.load_by_id(&finished.id).await.unwrap().unwrap();
        assert_eq!(old.score, Some(75.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_rearms_timer() {
        let (ctx, _) = context(3);
        let live = open_with(ctx.clone(), steady_generator(50.0)).await;
        let started = live.start_with_position("t1-for").await.unwrap();
        drop(live);

        let resumed = open_with(ctx, steady_generator(50.0)).await;
        assert_eq!(resumed.phase().await, TurnPhase::AwaitingUser);
        assert_eq!(resumed.snapshot().await.unwrap().id, started.id);
        assert_eq!(
            resumed.turn_time_remaining().await,
            Some(Duration::from_secs(120))
        );
    }
}
