//! Cooperative timers with explicit cancellation.
//!
//! A [`TimerSlot`] holds at most one pending callback. Every arm/disarm bumps
//! a ticket; a fired callback must present its ticket under the session lock
//! and is ignored unless it is still current. Whichever of "timer fired" and
//! "pause/reset" takes the lock first wins.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Identifies one arming of a slot.
pub type TimerTicket = u64;

#[derive(Debug)]
struct Armed {
    ticket: TimerTicket,
    token: CancellationToken,
    armed_at: Instant,
    delay: Duration,
}

/// Single pending timer owned by a controller.
#[derive(Debug, Default)]
pub struct TimerSlot {
    counter: TimerTicket,
    armed: Option<Armed>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `on_fire(ticket)` after `delay`, replacing any pending timer.
    pub fn arm<F, Fut>(&mut self, delay: Duration, on_fire: F) -> TimerTicket
    where
        F: FnOnce(TimerTicket) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.disarm();
        self.counter += 1;
        let ticket = self.counter;
        let token = CancellationToken::new();
        let cancelled = token.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {
                    debug!(ticket, "Timer cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    debug!(ticket, "Timer fired");
                    on_fire(ticket).await;
                }
            }
        });

        self.armed = Some(Armed {
            ticket,
            token,
            armed_at: Instant::now(),
            delay,
        });
        ticket
    }

    /// Cancel the pending timer. Returns the time it had left.
    pub fn disarm(&mut self) -> Option<Duration> {
        let armed = self.armed.take()?;
        armed.token.cancel();
        self.counter += 1;
        Some(armed.delay.saturating_sub(armed.armed_at.elapsed()))
    }

    /// Accept a fired ticket if it is still the current arming.
    ///
    /// Consumes the arming so the same ticket is never honoured twice.
    pub fn accept(&mut self, ticket: TimerTicket) -> bool {
        match &self.armed {
            Some(armed) if armed.ticket == ticket => {
                self.armed = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Time left on the pending timer.
    pub fn remaining(&self) -> Option<Duration> {
        self.armed
            .as_ref()
            .map(|a| a.delay.saturating_sub(a.armed_at.elapsed()))
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        if let Some(armed) = &self.armed {
            armed.token.cancel();
        }
    }
}
