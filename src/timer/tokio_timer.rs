//! Tokio-backed scheduler for the live host

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Scheduler, TimerFired, TimerId, TimerKind};

/// Spawns one sleeping task per timer and reports fires over a channel.
///
/// Must be used from inside a tokio runtime.
pub struct TokioScheduler {
    fired_tx: mpsc::UnboundedSender<TimerFired>,
    tasks: HashMap<TimerId, JoinHandle<()>>,
    next_id: u64,
}

impl TokioScheduler {
    /// Create a scheduler and the receiver its fires arrive on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerFired>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            fired_tx,
            tasks: HashMap::new(),
            next_id: 1,
        };
        (scheduler, fired_rx)
    }

    /// Timers scheduled and not yet finished
    pub fn live_timers(&self) -> usize {
        self.tasks.values().filter(|task| !task.is_finished()).count()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, kind: TimerKind, delay: Duration) -> TimerId {
        self.tasks.retain(|_, task| !task.is_finished());

        let id = TimerId(self.next_id);
        self.next_id += 1;

        let fired_tx = self.fired_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if fired_tx.send(TimerFired { id, kind }).is_err() {
                tracing::debug!("Timer {:?} fired after the event loop stopped", id);
            }
        });
        self.tasks.insert(id, task);

        tracing::trace!("Scheduled {:?} timer {:?} in {:?}", kind, id, delay);
        id
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(task) = self.tasks.remove(&id) {
            task.abort();
            tracing::trace!("Cancelled timer {:?}", id);
        }
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}
