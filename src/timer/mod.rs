//! Timer and scheduling adapter
//!
//! The negotiation engine never sleeps. It asks a [`Scheduler`] for a timer
//! and is called back with a [`TimerFired`] once the delay has elapsed. Every
//! timer carries an id so that a fire racing a cancellation can be told apart
//! from the live one.

pub mod manual;
pub mod tokio_timer;

pub use manual::ManualClock;
pub use tokio_timer::TokioScheduler;

use rand::Rng;
use std::time::{Duration, Instant};

use crate::config::DelaySettings;
use crate::types::DealKey;

/// Opaque handle for one scheduled timer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// What a timer guards
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Drives queue progression and delayed sends
    Action,
    /// Bounds how long the active negotiation may sit without progress
    Inactivity,
    /// Expires a deal from the recency cache
    RecentExpiry(DealKey),
}

/// Delivered back to the engine when a timer elapses
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerFired {
    pub id: TimerId,
    pub kind: TimerKind,
}

/// Host timer primitive
pub trait Scheduler: Send {
    fn schedule(&mut self, kind: TimerKind, delay: Duration) -> TimerId;

    /// Cancelling an unknown or already fired timer is a no-op
    fn cancel(&mut self, id: TimerId);

    fn now(&self) -> Instant;
}

/// Holds at most one live timer of a class
#[derive(Debug, Default)]
pub struct TimerSlot {
    current: Option<TimerId>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the timer, cancelling the previous one first
    pub fn arm(&mut self, scheduler: &mut dyn Scheduler, kind: TimerKind, delay: Duration) {
        self.cancel(scheduler);
        self.current = Some(scheduler.schedule(kind, delay));
    }

    pub fn cancel(&mut self, scheduler: &mut dyn Scheduler) {
        if let Some(id) = self.current.take() {
            scheduler.cancel(id);
        }
    }

    pub fn is_armed(&self) -> bool {
        self.current.is_some()
    }

    /// Accept a fire only if it belongs to the live timer, disarming the slot
    pub fn take_fired(&mut self, id: TimerId) -> bool {
        if self.current == Some(id) {
            self.current = None;
            true
        } else {
            false
        }
    }
}

/// Which delay window an action uses
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DelayClass {
    Short,
    Long,
}

/// Randomised human-like response times
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DelayPolicy {
    enabled: bool,
    short: [u64; 2],
    long: [u64; 2],
}

impl DelayPolicy {
    pub fn new(settings: &DelaySettings) -> Self {
        Self {
            enabled: settings.enabled,
            short: settings.short_range,
            long: settings.long_range,
        }
    }

    /// Uniform whole-millisecond delay from the inclusive window
    pub fn sample<R: Rng + ?Sized>(&self, class: DelayClass, rng: &mut R) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }
        let [min, max] = match class {
            DelayClass::Short => self.short,
            DelayClass::Long => self.long,
        };
        if min >= max {
            return Duration::from_millis(min);
        }
        Duration::from_millis(rng.gen_range(min..=max))
    }
}
