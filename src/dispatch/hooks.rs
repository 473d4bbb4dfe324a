//! Priority-ordered event hooks
//!
//! Handlers are registered per event kind with a priority. Lower priorities
//! run first; a handler returning [`Flow::Handled`] stops the chain and the
//! event is not passed on.

use std::collections::HashMap;

use super::message::{Event, EventKind};

pub const DEFAULT_PRIORITY: i32 = 0;

/// Whether an event continues down the chain
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Consumed; later hooks and the original recipient never see it
    Handled,
}

pub type HookFn<S> = fn(&mut S, &Event) -> Flow;

struct Hook<S> {
    name: &'static str,
    priority: i32,
    handler: HookFn<S>,
}

/// Hook table over some handler state `S`
pub struct HookRegistry<S> {
    hooks: HashMap<EventKind, Vec<Hook<S>>>,
}

impl<S> Default for HookRegistry<S> {
    fn default() -> Self {
        Self {
            hooks: HashMap::new(),
        }
    }
}

impl<S> HookRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Equal priorities keep registration order.
    pub fn hook(&mut self, kind: EventKind, priority: i32, name: &'static str, handler: HookFn<S>) {
        let chain = self.hooks.entry(kind).or_default();
        chain.push(Hook {
            name,
            priority,
            handler,
        });
        chain.sort_by_key(|hook| hook.priority);
    }

    /// Remove a named handler, returning whether it existed
    pub fn unhook(&mut self, kind: EventKind, name: &str) -> bool {
        let Some(chain) = self.hooks.get_mut(&kind) else {
            return false;
        };
        let before = chain.len();
        chain.retain(|hook| hook.name != name);
        chain.len() != before
    }

    /// Names of the handlers for a kind, in call order
    pub fn chain(&self, kind: EventKind) -> Vec<&'static str> {
        self.hooks
            .get(&kind)
            .map(|chain| chain.iter().map(|hook| hook.name).collect())
            .unwrap_or_default()
    }

    pub fn dispatch(&self, state: &mut S, event: &Event) -> Flow {
        let kind = event.kind();
        let Some(chain) = self.hooks.get(&kind) else {
            return Flow::Continue;
        };

        for hook in chain {
            if (hook.handler)(state, event) == Flow::Handled {
                tracing::trace!("{} handled by {}", kind, hook.name);
                return Flow::Handled;
            }
        }
        Flow::Continue
    }
}
