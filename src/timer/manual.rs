//! Manually advanced clock for deterministic replays and tests

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{Scheduler, TimerFired, TimerId, TimerKind};

/// A scheduled timer that has not fired yet
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingTimer {
    pub id: TimerId,
    pub kind: TimerKind,
    pub due: Instant,
}

#[derive(Debug)]
struct ClockState {
    now: Instant,
    next_id: u64,
    pending: Vec<PendingTimer>,
}

/// Scheduler whose time only moves when told to.
///
/// Clones share the same clock, so one copy can be handed to the engine
/// while another drives it.
#[derive(Clone, Debug)]
pub struct ManualClock {
    state: Arc<Mutex<ClockState>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                now: Instant::now(),
                next_id: 1,
                pending: Vec::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pending timers, earliest first
    pub fn pending(&self) -> Vec<PendingTimer> {
        let mut pending = self.state().pending.clone();
        pending.sort_by_key(|t| (t.due, t.id));
        pending
    }

    pub fn is_pending(&self, kind: TimerKind) -> bool {
        self.state().pending.iter().any(|t| t.kind == kind)
    }

    /// Delay left on the earliest pending timer of this kind
    pub fn remaining(&self, kind: TimerKind) -> Option<Duration> {
        let state = self.state();
        state
            .pending
            .iter()
            .filter(|t| t.kind == kind)
            .map(|t| t.due.saturating_duration_since(state.now))
            .min()
    }

    /// Remove and return the earliest timer due at or before `until`,
    /// moving the clock to its due time
    pub fn pop_due(&self, until: Instant) -> Option<TimerFired> {
        let mut state = self.state();
        let index = state
            .pending
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due <= until)
            .min_by_key(|(_, t)| (t.due, t.id))
            .map(|(i, _)| i)?;

        let timer = state.pending.remove(index);
        if timer.due > state.now {
            state.now = timer.due;
        }
        Some(TimerFired {
            id: timer.id,
            kind: timer.kind,
        })
    }

    /// Advance time, handing every timer that falls due to `on_fire` in order.
    /// Timers scheduled by `on_fire` are delivered too if they fall inside the window.
    pub fn advance(&self, by: Duration, mut on_fire: impl FnMut(TimerFired)) {
        let target = self.state().now + by;
        while let Some(fired) = self.pop_due(target) {
            on_fire(fired);
        }
        self.state().now = target;
    }

    /// Fire the earliest pending timer of `kind` now, regardless of its delay
    pub fn fire(&self, kind: TimerKind) -> Option<TimerFired> {
        let mut state = self.state();
        let index = state
            .pending
            .iter()
            .enumerate()
            .filter(|(_, t)| t.kind == kind)
            .min_by_key(|(_, t)| (t.due, t.id))
            .map(|(i, _)| i)?;

        let timer = state.pending.remove(index);
        if timer.due > state.now {
            state.now = timer.due;
        }
        Some(TimerFired {
            id: timer.id,
            kind: timer.kind,
        })
    }
}

impl Scheduler for ManualClock {
    fn schedule(&mut self, kind: TimerKind, delay: Duration) -> TimerId {
        let mut state = self.state();
        let id = TimerId(state.next_id);
        state.next_id += 1;
        let due = state.now + delay;
        state.pending.push(PendingTimer { id, kind, due });
        id
    }

    fn cancel(&mut self, id: TimerId) {
        self.state().pending.retain(|t| t.id != id);
    }

    fn now(&self) -> Instant {
        self.state().now
    }
}
