//! Binds the negotiation engine to the event hooks

use super::hooks::{Flow, HookRegistry, DEFAULT_PRIORITY};
use super::message::{Event, EventKind};
use crate::negotiation::NegotiationEngine;
use crate::timer::TimerFired;

/// Runs before any other handler so that deal traffic can be consumed
const ENGINE_PRIORITY: i32 = -10;

/// Entry point for a host: feed it events and timer fires
pub struct Negotiator {
    hooks: HookRegistry<NegotiationEngine>,
    engine: NegotiationEngine,
}

impl Negotiator {
    pub fn new(engine: NegotiationEngine) -> Self {
        let mut hooks = HookRegistry::new();

        hooks.hook(
            EventKind::DealSuggested,
            DEFAULT_PRIORITY,
            "deal-suggested",
            NegotiationEngine::on_deal_suggested,
        );
        hooks.hook(
            EventKind::RequestDealResult,
            ENGINE_PRIORITY,
            "request-deal-result",
            NegotiationEngine::on_request_deal_result,
        );
        hooks.hook(
            EventKind::DealInfoUpdate,
            ENGINE_PRIORITY,
            "deal-info-update",
            NegotiationEngine::on_deal_info_update,
        );
        hooks.hook(
            EventKind::DealTimeout,
            ENGINE_PRIORITY,
            "deal-timeout",
            NegotiationEngine::on_deal_timeout,
        );
        hooks.hook(
            EventKind::RequestContract,
            ENGINE_PRIORITY,
            "request-contract",
            NegotiationEngine::on_request_contract,
        );
        hooks.hook(
            EventKind::ReplyRequestContract,
            ENGINE_PRIORITY,
            "reply-request-contract",
            NegotiationEngine::on_contract_progress,
        );
        hooks.hook(
            EventKind::AcceptContract,
            ENGINE_PRIORITY,
            "accept-contract",
            NegotiationEngine::on_contract_progress,
        );
        hooks.hook(
            EventKind::RejectContract,
            ENGINE_PRIORITY,
            "reject-contract",
            NegotiationEngine::on_reject_contract,
        );
        hooks.hook(
            EventKind::CancelContract,
            ENGINE_PRIORITY,
            "cancel-contract",
            NegotiationEngine::on_cancel_contract,
        );
        hooks.hook(
            EventKind::SystemMessage,
            ENGINE_PRIORITY,
            "system-message",
            NegotiationEngine::on_system_message,
        );
        hooks.hook(
            EventKind::ClientRequestContract,
            DEFAULT_PRIORITY,
            "client-request-contract",
            NegotiationEngine::on_client_request_contract,
        );

        Self { hooks, engine }
    }

    /// Dispatch one event. `Flow::Continue` means the host should forward it.
    pub fn handle(&mut self, event: &Event) -> Flow {
        tracing::debug!("Dispatching {}", event.kind());
        self.hooks.dispatch(&mut self.engine, event)
    }

    pub fn on_timer(&mut self, fired: TimerFired) {
        tracing::trace!("Timer {:?} fired", fired.id);
        self.engine.on_timer(fired);
    }

    pub fn engine(&self) -> &NegotiationEngine {
        &self.engine
    }

    /// For hosts adding their own handlers around the engine's
    pub fn hooks_mut(&mut self) -> &mut HookRegistry<NegotiationEngine> {
        &mut self.hooks
    }
}
