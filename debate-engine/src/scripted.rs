//! Scripted playback of a topic's pre-authored rounds.
//!
//! Playback is `Idle -> Playing <-> Paused -> Completed`. While playing, an
//! auto-advance timer moves one round per tick. The playback phase is not
//! persisted; a resumed session starts idle at its saved round index.

use std::sync::{Arc, Weak};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::context::EngineContext;
use crate::error::{EngineError, EngineResult};
use crate::events::SessionEvent;
use crate::report::{Report, ScriptedSummary};
use crate::session::{DebateMode, ModeState, ScriptedState, Session, SessionKey};
use crate::timer::{TimerSlot, TimerTicket};
use crate::topic::ScriptedRound;

/// Auto-play phase of a scripted session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackPhase {
    Idle,
    Playing,
    Paused,
    Completed,
}

struct ScriptedInner {
    session: Session,
    rounds: Vec<ScriptedRound>,
    phase: PlaybackPhase,
    timer: TimerSlot,
}

impl ScriptedInner {
    fn index(&self) -> usize {
        self.session
            .scripted()
            .map(|s| s.current_round_index)
            .unwrap_or_default()
    }

    fn last_index(&self) -> usize {
        self.rounds.len().saturating_sub(1)
    }

    fn ensure_writable(&self) -> EngineResult<()> {
        if self.session.is_completed() {
            return Err(EngineError::ReadOnly {
                session_id: self.session.id.clone(),
            });
        }
        Ok(())
    }
}

pub(crate) struct ScriptedShared {
    ctx: EngineContext,
    key: SessionKey,
    inner: Mutex<ScriptedInner>,
}

/// Handle to one user's scripted playback of one topic.
#[derive(Clone)]
pub struct ScriptedController {
    shared: Arc<ScriptedShared>,
}

impl ScriptedController {
    /// Resume the stored session for `(user, topic)` or start a new one.
    pub async fn open(ctx: EngineContext, user_id: &str, topic_id: &str) -> EngineResult<Self> {
        let mut rounds = ctx.catalog.get_scripted_rounds(topic_id).await?;
        if rounds.is_empty() {
            return Err(EngineError::not_found("scripted rounds", topic_id));
        }
        rounds.sort_by_key(|r| r.index);

        let key = SessionKey::new(user_id, topic_id, DebateMode::Scripted);
        let (session, phase) = match ctx.store.load(&key).await? {
            Some(mut existing) => {
                let last = rounds.len() - 1;
                let session_id = existing.id.clone();
                let state = existing.scripted_mut().ok_or_else(|| {
                    EngineError::invalid_state(format!(
                        "session {} does not hold scripted state",
                        key
                    ))
                })?;
                if state.current_round_index > last {
                    warn!(
                        session_id = %session_id,
                        saved = state.current_round_index,
                        last,
                        "Saved round index past end of script, clamping"
                    );
                    state.current_round_index = last;
                }
                let phase = if existing.is_completed() {
                    PlaybackPhase::Completed
                } else {
                    existing.begin();
                    PlaybackPhase::Idle
                };
                ctx.publish(SessionEvent::Resumed {
                    session_id: existing.id.clone(),
                    mode: DebateMode::Scripted,
                    status: existing.status,
                    timestamp: Utc::now(),
                });
                info!(session_id = %existing.id, status = %existing.status, "Resumed scripted session");
                (existing, phase)
            }
            None => {
                let mut session = Session::new(
                    user_id,
                    topic_id,
                    ModeState::Scripted(ScriptedState::default()),
                );
                session.begin();
                ctx.persist(&mut session).await?;
                ctx.publish(SessionEvent::Started {
                    session_id: session.id.clone(),
                    mode: DebateMode::Scripted,
                    timestamp: Utc::now(),
                });
                info!(session_id = %session.id, rounds = rounds.len(), "Started scripted session");
                (session, PlaybackPhase::Idle)
            }
        };

        Ok(Self {
            shared: Arc::new(ScriptedShared {
                ctx,
                key,
                inner: Mutex::new(ScriptedInner {
                    session,
                    rounds,
                    phase,
                    timer: TimerSlot::new(),
                }),
            }),
        })
    }

    pub fn key(&self) -> &SessionKey {
        &self.shared.key
    }

    pub(crate) fn downgrade(&self) -> Weak<ScriptedShared> {
        Arc::downgrade(&self.shared)
    }

    pub(crate) fn upgrade(weak: &Weak<ScriptedShared>) -> Option<Self> {
        weak.upgrade().map(|shared| Self { shared })
    }

    /// Snapshot of the current session record.
    pub async fn snapshot(&self) -> Session {
        self.shared.inner.lock().await.session.clone()
    }

    pub async fn phase(&self) -> PlaybackPhase {
        self.shared.inner.lock().await.phase
    }

    /// The round at the current index.
    pub async fn current_round(&self) -> ScriptedRound {
        let inner = self.shared.inner.lock().await;
        let index = inner.index().min(inner.last_index());
        inner.rounds[index].clone()
    }

    pub async fn total_rounds(&self) -> usize {
        self.shared.inner.lock().await.rounds.len()
    }

    /// Start auto-advancing.
    pub async fn play(&self) -> EngineResult<()> {
        let mut inner = self.shared.lock().await?;
        inner.ensure_writable()?;
        if inner.phase == PlaybackPhase::Playing {
            return Ok(());
        }
        inner.phase = PlaybackPhase::Playing;
        self.shared.arm_auto_advance(&mut inner);
        debug!(session_id = %inner.session.id, "Playback started");
        Ok(())
    }

    /// Stop auto-advancing. The pending tick is cancelled.
    pub async fn pause(&self) -> EngineResult<()> {
        let mut inner = self.shared.lock().await?;
        inner.ensure_writable()?;
        if inner.phase == PlaybackPhase::Playing {
            inner.timer.disarm();
            inner.phase = PlaybackPhase::Paused;
            debug!(session_id = %inner.session.id, "Playback paused");
        }
        Ok(())
    }

    /// Move to the next round, completing the session at the last one.
    ///
    /// Advancing a completed session has no effect. While playing, the
    /// auto-advance delay restarts from the manual step.
    pub async fn advance(&self) -> EngineResult<()> {
        let mut inner = self.shared.lock().await?;
        if inner.session.is_completed() {
            debug!(session_id = %inner.session.id, "Advance on completed session ignored");
            return Ok(());
        }
        self.shared.step(&mut inner).await?;
        if inner.phase == PlaybackPhase::Playing {
            self.shared.arm_auto_advance(&mut inner);
        }
        Ok(())
    }

    /// Jump to an arbitrary round. Never completes the session.
    pub async fn jump_to(&self, index: usize) -> EngineResult<()> {
        let mut inner = self.shared.lock().await?;
        inner.ensure_writable()?;
        if index >= inner.rounds.len() {
            return Err(EngineError::invalid_state(format!(
                "round index {} out of range (script has {} rounds)",
                index,
                inner.rounds.len()
            )));
        }

        let mut next = inner.session.clone();
        if let Some(state) = next.scripted_mut() {
            state.current_round_index = index;
        }
        self.shared.ctx.persist(&mut next).await?;
        inner.session = next;

        if inner.phase == PlaybackPhase::Playing {
            self.shared.arm_auto_advance(&mut inner);
        }
        self.shared.ctx.publish(SessionEvent::RoundAdvanced {
            session_id: inner.session.id.clone(),
            round: index as u32,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Return to the first round.
    ///
    /// A completed session stays on record; playback restarts in a new one.
    pub async fn reset(&self) -> EngineResult<()> {
        let mut inner = self.shared.lock().await?;
        inner.timer.disarm();

        let mut next = if inner.session.is_completed() {
            let fresh = Session::new(
                &self.shared.key.user_id,
                &self.shared.key.topic_id,
                ModeState::Scripted(ScriptedState::default()),
            );
            info!(
                previous = %inner.session.id,
                session_id = %fresh.id,
                "Restarting completed scripted session"
            );
            fresh
        } else {
            let mut same = inner.session.clone();
            if let Some(state) = same.scripted_mut() {
                state.current_round_index = 0;
            }
            same
        };
        next.begin();
        self.shared.ctx.persist(&mut next).await?;
        inner.session = next;
        inner.phase = PlaybackPhase::Idle;

        self.shared.ctx.publish(SessionEvent::Reset {
            session_id: inner.session.id.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

impl ScriptedShared {
    async fn lock(&self) -> EngineResult<tokio::sync::MutexGuard<'_, ScriptedInner>> {
        self.ctx.lock(&self.inner, &self.key).await
    }

    fn arm_auto_advance(self: &Arc<Self>, inner: &mut ScriptedInner) {
        let weak = Arc::downgrade(self);
        inner
            .timer
            .arm(self.ctx.config.auto_advance_delay(), move |ticket| async move {
                if let Some(shared) = weak.upgrade() {
                    shared.on_tick(ticket).await;
                }
            });
    }

    async fn on_tick(self: Arc<Self>, ticket: TimerTicket) {
        let mut inner = self.inner.lock().await;
        if !inner.timer.accept(ticket) || inner.phase != PlaybackPhase::Playing {
            debug!(ticket, "Stale auto-advance tick ignored");
            return;
        }
        if let Err(e) = self.step(&mut inner).await {
            warn!(session_id = %inner.session.id, error = %e, "Auto-advance failed, pausing");
            inner.phase = PlaybackPhase::Paused;
            return;
        }
        if inner.phase == PlaybackPhase::Playing {
            self.arm_auto_advance(&mut inner);
        }
    }

    /// One forward step: next round, or completion at the last round.
    async fn step(&self, inner: &mut ScriptedInner) -> EngineResult<()> {
        let index = inner.index();
        let last = inner.last_index();
        let mut next = inner.session.clone();

        if index < last {
            if let Some(state) = next.scripted_mut() {
                state.current_round_index = index + 1;
            }
            self.ctx.persist(&mut next).await?;
            inner.session = next;
            self.ctx.publish(SessionEvent::RoundAdvanced {
                session_id: inner.session.id.clone(),
                round: (index + 1) as u32,
                timestamp: Utc::now(),
            });
            return Ok(());
        }

        let report = Report::Scripted(ScriptedSummary {
            total_rounds: inner.rounds.len(),
            completed_at: Utc::now(),
        });
        next.complete(Some(report.clone()));
        self.ctx.persist(&mut next).await?;
        inner.session = next;
        inner.timer.disarm();
        inner.phase = PlaybackPhase::Completed;

        info!(session_id = %inner.session.id, rounds = inner.rounds.len(), "Scripted playback completed");
        self.ctx.publish(SessionEvent::Completed {
            session_id: inner.session.id.clone(),
            report: Some(report),
            timestamp: Utc::now(),
        });
        Ok(())
    }
}
