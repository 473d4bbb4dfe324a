//! Negotiation engine: drives one broker deal at a time to completion

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use super::policy::{Decision, PricePolicy};
use super::queue::DealQueue;
use super::session::NegotiationSession;
use super::types::{PendingAction, Phase, Submission};
use crate::codec::{decode_request, encode_request, ContractPayload};
use crate::config::Settings;
use crate::dispatch::hooks::Flow;
use crate::dispatch::message::{
    ChatMessage, ClientEvent, ContractRef, ContractRequest, DealConfirm, Event, Outbound,
    RejectSuggest, ServerRequest,
};
use crate::dispatch::sysmsg::{self, SysmsgTable, SystemMessageDecoder, TradeNotice};
use crate::error::{BrokerError, Result};
use crate::gold::format_gold;
use crate::timer::{DelayClass, DelayPolicy, Scheduler, TimerFired, TimerKind, TimerSlot};
use crate::types::{Contract, ContractKind, Deal, DealKey, DealOrigin};

/// Inactivity window while other deals are waiting
pub const INACTIVITY_WITH_BACKLOG: Duration = Duration::from_secs(15);
/// Inactivity window when the queue is empty
pub const INACTIVITY_IDLE: Duration = Duration::from_secs(30);
/// How long after a local failure its follow-up system messages are still ours
pub const ERROR_CORRELATION_WINDOW: Duration = Duration::from_secs(1);

const CHAT_PREFIX: &str = "(Proxy)";

/// Negotiation engine owns the deal queue and the single active negotiation.
///
/// It is driven synchronously: one inbound event or timer fire at a time,
/// each handled to completion before the next.
pub struct NegotiationEngine {
    policy: PricePolicy,
    delays: DelayPolicy,
    secondary_flow: bool,
    chat_channel: u32,
    queue: DealQueue,
    session: Option<NegotiationSession>,
    action_timer: TimerSlot,
    pending_action: PendingAction,
    inactivity_timer: TimerSlot,
    last_local_error: Option<Instant>,
    scheduler: Box<dyn Scheduler>,
    decoder: Box<dyn SystemMessageDecoder>,
    outbound: mpsc::UnboundedSender<Outbound>,
    rng: StdRng,
}

impl NegotiationEngine {
    /// Create new negotiation engine
    pub fn new(
        settings: &Settings,
        scheduler: Box<dyn Scheduler>,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        Self {
            policy: PricePolicy::from_settings(settings),
            delays: DelayPolicy::new(&settings.delay_actions),
            secondary_flow: settings.enable_secondary_flow,
            chat_channel: settings.chat_channel,
            queue: DealQueue::new(),
            session: None,
            action_timer: TimerSlot::new(),
            pending_action: PendingAction::NextDeal,
            inactivity_timer: TimerSlot::new(),
            last_local_error: None,
            scheduler,
            decoder: Box::new(SysmsgTable::from_settings(&settings.sysmsg)),
            outbound,
            rng: StdRng::from_entropy(),
        }
    }

    /// Replace the system message decoder
    pub fn with_decoder(mut self, decoder: Box<dyn SystemMessageDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Make delay sampling reproducible
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn phase(&self) -> Phase {
        self.session.as_ref().map_or(Phase::Idle, |s| s.phase())
    }

    pub fn session(&self) -> Option<&NegotiationSession> {
        self.session.as_ref()
    }

    pub fn queue(&self) -> &DealQueue {
        &self.queue
    }

    pub fn policy(&self) -> &PricePolicy {
        &self.policy
    }

    // ------------------------------------------------------------------
    // Inbound events
    // ------------------------------------------------------------------

    /// S_TRADE_BROKER_DEAL_SUGGESTED
    pub fn on_deal_suggested(&mut self, event: &Event) -> Flow {
        let Event::DealSuggested(suggested) = event else {
            return Flow::Continue;
        };

        let deal = suggested.to_deal();
        let key = deal.key();
        let submission =
            self.queue
                .submit(deal, &self.policy, self.secondary_flow, self.scheduler.as_mut());

        match submission {
            Submission::Queued(decision) => {
                tracing::info!(
                    "Queued deal {} from {} ({:?}), {} pending",
                    key,
                    suggested.name,
                    decision,
                    self.queue.pending_len()
                );
                self.queue_next(DelayClass::Long);
                Flow::Handled
            }
            Submission::Cached => {
                tracing::debug!("Cached deal {} for manual negotiation", key);
                Flow::Continue
            }
            Submission::Dropped => {
                tracing::debug!("Deal {} left to the player", key);
                Flow::Continue
            }
        }
    }

    /// S_TRADE_BROKER_REQUEST_DEAL_RESULT
    pub fn on_request_deal_result(&mut self, event: &Event) -> Flow {
        let Event::RequestDealResult(result) = event else {
            return Flow::Continue;
        };
        if self.session.is_none() {
            return Flow::Continue;
        }

        if !result.ok {
            tracing::info!("Deal request refused by the server");
            self.end_deal();
        }
        Flow::Handled
    }

    /// S_TRADE_BROKER_DEAL_INFO_UPDATE
    pub fn on_deal_info_update(&mut self, event: &Event) -> Flow {
        let Event::DealInfoUpdate(update) = event else {
            return Flow::Continue;
        };
        let Some(session) = self.session.as_ref() else {
            return Flow::Continue;
        };
        if session.phase() != Phase::Confirming {
            tracing::debug!("Ignoring stage update in {:?}", session.phase());
            return Flow::Handled;
        }

        tracing::debug!(
            "Deal stages: buyer {} seller {} at {}",
            update.buyer_stage,
            update.seller_stage,
            update.price
        );

        if update.buyer_stage == 2 && update.seller_stage < 2 {
            let accepted = session.deal().offered_price;
            if update.price < accepted {
                self.abort(BrokerError::PriceViolation {
                    offered: update.price,
                    required: accepted,
                });
                return Flow::Handled;
            }

            let key = session.key();
            let stage = update.seller_stage + 1;
            let delay = if update.seller_stage == 0 {
                self.delays.sample(DelayClass::Short, &mut self.rng)
            } else {
                Duration::ZERO
            };

            if delay.is_zero() {
                self.confirm_stage(key, stage);
            } else {
                self.pending_action = PendingAction::ConfirmStage { key, stage };
                self.action_timer
                    .arm(self.scheduler.as_mut(), TimerKind::Action, delay);
            }
        }
        Flow::Handled
    }

    /// S_TRADE_BROKER_DEAL_TIMEOUT
    pub fn on_deal_timeout(&mut self, event: &Event) -> Flow {
        if !matches!(event, Event::DealTimeout(_)) {
            return Flow::Continue;
        }
        let Some(session) = self.session.as_ref() else {
            return Flow::Continue;
        };

        if !session.is_closing() {
            let err = BrokerError::RemoteTimedOut(session.deal().name.clone());
            tracing::info!("{}", err);
            self.chat(format!("{}.", err));
        }
        self.finish();
        Flow::Handled
    }

    /// S_REQUEST_CONTRACT
    pub fn on_request_contract(&mut self, event: &Event) -> Flow {
        let Event::RequestContract(offer) = event else {
            return Flow::Continue;
        };
        let Some(kind) = ContractKind::from_code(offer.contract_type) else {
            return Flow::Continue;
        };
        let Some(session) = self.session.as_mut() else {
            return Flow::Continue;
        };

        if session.is_closing() {
            tracing::debug!("Contract {} while closing, taking it as acknowledgement", offer.id);
            self.finish();
            return Flow::Handled;
        }

        let decoded = match kind {
            ContractKind::Pending => Ok(None),
            ContractKind::Negotiation => ContractPayload::decode(&offer.data).map(Some),
        };
        let contract = Contract {
            kind,
            id: offer.id,
            payload: decoded.as_ref().ok().cloned().flatten(),
        };
        if let Err(e) = session.receive_contract(contract) {
            tracing::warn!("Ignoring contract {}: {}", offer.id, e);
            return Flow::Handled;
        }
        tracing::info!("Received {:?} contract {}", kind, offer.id);
        self.arm_inactivity();

        match decoded {
            Ok(Some(payload)) => {
                if let Err(e) = self.check_terms(&payload, &offer.sender_name) {
                    self.abort(e);
                }
            }
            Ok(None) => {}
            Err(e) => self.abort(e),
        }
        Flow::Handled
    }

    /// S_REPLY_REQUEST_CONTRACT and S_ACCEPT_CONTRACT
    pub fn on_contract_progress(&mut self, event: &Event) -> Flow {
        let (Event::ReplyRequestContract(contract) | Event::AcceptContract(contract)) = event else {
            return Flow::Continue;
        };
        let Some(kind) = ContractKind::from_code(contract.contract_type) else {
            return Flow::Continue;
        };
        let Some(session) = self.session.as_ref() else {
            return Flow::Continue;
        };

        if session.is_closing() {
            self.finish();
            return Flow::Handled;
        }
        if kind != ContractKind::Pending {
            return Flow::Continue;
        }
        self.arm_inactivity();
        Flow::Handled
    }

    /// S_REJECT_CONTRACT
    pub fn on_reject_contract(&mut self, event: &Event) -> Flow {
        let Event::RejectContract(contract) = event else {
            return Flow::Continue;
        };
        if ContractKind::from_code(contract.contract_type).is_none() {
            return Flow::Continue;
        }
        let Some(session) = self.session.as_ref() else {
            return Flow::Continue;
        };

        if !session.is_closing() {
            let deal = session.deal();
            let err = BrokerError::RemoteRejected(deal.name.clone());
            tracing::info!("{}", err);
            self.chat(format!("{} aborted negotiation.", deal.name));

            // Otherwise the listing stays stuck on the broker
            if matches!(session.phase(), Phase::Negotiating | Phase::Offered) {
                let reject = RejectSuggest {
                    player_id: deal.player_id,
                    listing: deal.listing,
                };
                self.send(Outbound::Server(ServerRequest::RejectSuggest(reject)));
            }
        }
        self.finish();
        Flow::Handled
    }

    /// S_CANCEL_CONTRACT
    pub fn on_cancel_contract(&mut self, event: &Event) -> Flow {
        let Event::CancelContract(contract) = event else {
            return Flow::Continue;
        };
        if ContractKind::from_code(contract.contract_type).is_none() {
            return Flow::Continue;
        }
        let Some(session) = self.session.as_ref() else {
            return Flow::Continue;
        };

        if session.is_closing() {
            tracing::info!("Cancel of contract {} acknowledged", contract.id);
        } else {
            tracing::info!("{}", BrokerError::RemoteCancelled(session.deal().name.clone()));
        }
        self.finish();
        Flow::Handled
    }

    /// S_SYSTEM_MESSAGE
    pub fn on_system_message(&mut self, event: &Event) -> Flow {
        let Event::SystemMessage(message) = event else {
            return Flow::Continue;
        };
        if !self.system_messages_relevant() {
            return Flow::Continue;
        }

        match sysmsg::classify(self.decoder.as_ref(), &message.message) {
            Some(TradeNotice::CancelledByOpponent) => {
                if let Some(session) = self.session.as_ref() {
                    let name = session.deal().name.clone();
                    self.chat(format!("{} cancelled negotiation.", name));
                }
                Flow::Handled
            }
            Some(TradeNotice::CancelledByMe | TradeNotice::DisconnectCancelledByMe) => {
                Flow::Handled
            }
            None => Flow::Continue,
        }
    }

    /// C_REQUEST_CONTRACT observed from the client
    pub fn on_client_request_contract(&mut self, event: &Event) -> Flow {
        let Event::ClientRequestContract(request) = event else {
            return Flow::Continue;
        };
        if !self.secondary_flow
            || ContractKind::from_code(request.contract_type) != Some(ContractKind::Pending)
        {
            return Flow::Continue;
        }
        let Ok(key) = decode_request(&request.data) else {
            return Flow::Continue;
        };
        if self.session.is_some() {
            tracing::debug!("Busy, not adopting manual negotiation {}", key);
            return Flow::Continue;
        }
        let Some(deal) = self.queue.evict(key, self.scheduler.as_mut()) else {
            return Flow::Continue;
        };

        tracing::info!("Adopting manual negotiation {} with {}", key, deal.name);
        self.chat(format!("Handling negotiation with {}...", deal.name));
        self.action_timer.cancel(self.scheduler.as_mut());
        self.session = Some(NegotiationSession::new(deal, DealOrigin::Manual));
        self.arm_inactivity();

        let reply = ContractRef::new(request.contract_type, 0);
        self.send(Outbound::Client(ClientEvent::ReplyRequestContract(reply)));
        Flow::Continue
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    pub fn on_timer(&mut self, fired: TimerFired) {
        match fired.kind {
            TimerKind::Action => {
                if self.action_timer.take_fired(fired.id) {
                    match std::mem::replace(&mut self.pending_action, PendingAction::NextDeal) {
                        PendingAction::NextDeal => self.try_next_deal(),
                        PendingAction::ConfirmStage { key, stage } => {
                            self.confirm_stage(key, stage)
                        }
                    }
                }
            }
            TimerKind::Inactivity => {
                if self.inactivity_timer.take_fired(fired.id) {
                    self.on_inactivity();
                }
            }
            TimerKind::RecentExpiry(key) => {
                if self.queue.expire(key, fired.id) {
                    tracing::debug!("Deal {} expired from the recency cache", key);
                }
            }
        }
    }

    fn on_inactivity(&mut self) {
        match self.session.as_ref() {
            None => {}
            Some(session) if session.is_closing() => {
                tracing::warn!("Cancel of {} never acknowledged, giving up", session.key());
                self.finish();
            }
            Some(_) => self.abort(BrokerError::LocalInactivityTimeout),
        }
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// Arm the action timer for the next queued deal, if idle
    fn queue_next(&mut self, class: DelayClass) {
        if self.session.is_some() || self.action_timer.is_armed() || !self.queue.has_pending() {
            return;
        }
        let delay = self.delays.sample(class, &mut self.rng);
        self.pending_action = PendingAction::NextDeal;
        self.action_timer
            .arm(self.scheduler.as_mut(), TimerKind::Action, delay);
    }

    fn try_next_deal(&mut self) {
        if self.session.is_some() {
            return;
        }
        let Some(deal) = self.queue.take_next() else {
            return;
        };

        match self.policy.decide(deal.seller_price, deal.offered_price) {
            Decision::Accept => self.open_negotiation(deal),
            Decision::Decline | Decision::Neutral => self.decline(deal),
        }
    }

    fn open_negotiation(&mut self, deal: Deal) {
        tracing::info!("Negotiating deal {} with {}", deal.key(), deal.name);
        self.chat(format!("Attempting to negotiate with {}...", deal.name));
        self.chat(price_line(&deal));

        let request = ContractRequest {
            contract_type: ContractKind::PENDING_CODE,
            name: String::new(),
            data: encode_request(deal.key()),
        };
        self.send(Outbound::Server(ServerRequest::RequestContract(request)));

        self.session = Some(NegotiationSession::new(deal, DealOrigin::Automatic));
        self.arm_inactivity();
    }

    fn decline(&mut self, deal: Deal) {
        tracing::info!("Declining deal {} from {}", deal.key(), deal.name);
        let reject = RejectSuggest {
            player_id: deal.player_id,
            listing: deal.listing,
        };
        self.send(Outbound::Server(ServerRequest::RejectSuggest(reject)));
        self.chat(format!("Declined negotiation from {}.", deal.name));
        self.chat(price_line(&deal));

        self.queue_next(DelayClass::Short);
    }

    fn confirm_stage(&mut self, key: DealKey, stage: u32) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.key() != key || session.phase() != Phase::Confirming {
            tracing::debug!("Dropping stage {} confirmation for {}", stage, key);
            return;
        }

        session.record_stage_confirmed();
        let confirm = DealConfirm {
            listing: key.listing,
            stage,
        };
        tracing::info!("Confirming stage {} of deal {}", stage, key);
        self.send(Outbound::Server(ServerRequest::DealConfirm(confirm)));
    }

    /// Sanity-check a full contract against the deal and the accepted price
    fn check_terms(&mut self, payload: &ContractPayload, sender_name: &str) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        session.verify_payload(payload, sender_name)?;
        session.set_seller_name(sender_name.to_string());

        let (acceptable, required) = match session.origin() {
            DealOrigin::Automatic => (
                self.policy
                    .meets_accept(payload.seller_price, payload.offered_price),
                self.policy.accept_floor(payload.seller_price),
            ),
            DealOrigin::Manual => {
                let accepted = session.deal().offered_price;
                (payload.offered_price >= accepted, accepted)
            }
        };
        if !acceptable {
            return Err(BrokerError::PriceViolation {
                offered: payload.offered_price,
                required,
            });
        }

        tracing::info!(
            "Contract for {} verified at {}",
            session.key(),
            format_gold(payload.offered_price)
        );
        Ok(())
    }

    /// Report a failure and wind the negotiation down
    fn abort(&mut self, err: BrokerError) {
        if err.is_local() {
            self.last_local_error = Some(self.scheduler.now());
        }
        tracing::warn!("Aborting negotiation: {}", err);
        self.chat(format!("{}.", err));
        self.end_deal();
    }

    /// Cancel an outstanding contract and wait for the acknowledgement,
    /// or drop the deal right away if there is none
    fn end_deal(&mut self) {
        let cancel = match self.session.as_mut() {
            None => return,
            Some(session) if session.is_closing() => None,
            Some(session) => {
                let cancel = session
                    .contract()
                    .map(|c| ContractRef::new(c.kind.code(), c.id));
                if cancel.is_some() {
                    session.begin_closing();
                }
                cancel
            }
        };

        match cancel {
            Some(contract) => {
                tracing::info!("Cancelling contract {}", contract.id);
                self.send(Outbound::Server(ServerRequest::CancelContract(contract)));
                self.action_timer.cancel(self.scheduler.as_mut());
                self.arm_inactivity();
            }
            None => self.finish(),
        }
    }

    /// Release the active deal and both timers, then move on
    fn finish(&mut self) {
        self.inactivity_timer.cancel(self.scheduler.as_mut());
        self.action_timer.cancel(self.scheduler.as_mut());
        self.pending_action = PendingAction::NextDeal;

        if let Some(session) = self.session.take() {
            tracing::info!(
                "Negotiation {} ended in {:?}",
                session.key(),
                session.phase()
            );
        }
        self.queue_next(DelayClass::Short);
    }

    fn arm_inactivity(&mut self) {
        let window = if self.queue.has_pending() {
            INACTIVITY_WITH_BACKLOG
        } else {
            INACTIVITY_IDLE
        };
        self.inactivity_timer
            .arm(self.scheduler.as_mut(), TimerKind::Inactivity, window);
    }

    fn system_messages_relevant(&self) -> bool {
        if self.session.is_some() {
            return true;
        }
        self.last_local_error.map_or(false, |at| {
            self.scheduler.now().saturating_duration_since(at) <= ERROR_CORRELATION_WINDOW
        })
    }

    fn chat(&self, message: String) {
        let chat = ChatMessage {
            channel: self.chat_channel,
            message: format!("{}{}", CHAT_PREFIX, message),
        };
        self.send(Outbound::Client(ClientEvent::Chat(chat)));
    }

    fn send(&self, message: Outbound) {
        if self.outbound.send(message).is_err() {
            tracing::warn!("Outbound channel closed, dropping message");
        }
    }
}

fn price_line(deal: &Deal) -> String {
    format!(
        "Price: {} - Offered: {}",
        format_gold(deal.seller_price),
        format_gold(deal.offered_price)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::message::{
        ContractOffer, DealInfoUpdate, DealSuggested, DealTimeout, RequestDealResult,
        SystemMessage,
    };
    use crate::timer::ManualClock;
    use rust_decimal_macros::dec;

    const ME: &str = "Seller";

    struct Harness {
        engine: NegotiationEngine,
        clock: ManualClock,
        outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    }

    impl Harness {
        fn new(settings: Settings) -> Self {
            let clock = ManualClock::new();
            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            let mut table = SysmsgTable::new();
            table.insert(2421, sysmsg::CANCEL_OPPONENT);
            table.insert(2422, sysmsg::CANCEL_ME);
            let engine = NegotiationEngine::new(&settings, Box::new(clock.clone()), outbound_tx)
                .with_decoder(Box::new(table))
                .with_seed(1);
            Self {
                engine,
                clock,
                outbound_rx,
            }
        }

        fn without_delays() -> Self {
            let mut settings = Settings::default();
            settings.delay_actions.enabled = false;
            Self::new(settings)
        }

        /// Fire every timer due within `by`
        fn advance(&mut self, by: Duration) {
            let Harness { engine, clock, .. } = self;
            clock.advance(by, |fired| engine.on_timer(fired));
        }

        fn fire(&mut self, kind: TimerKind) {
            let fired = self.clock.fire(kind).expect("timer pending");
            self.engine.on_timer(fired);
        }

        fn drain(&mut self) -> Vec<Outbound> {
            let mut out = Vec::new();
            while let Ok(message) = self.outbound_rx.try_recv() {
                out.push(message);
            }
            out
        }

        fn server_sends(&mut self) -> Vec<ServerRequest> {
            self.drain()
                .into_iter()
                .filter_map(|m| match m {
                    Outbound::Server(request) => Some(request),
                    Outbound::Client(_) => None,
                })
                .collect()
        }

        fn suggest(&mut self, player_id: u32, listing: u32, seller: i64, offered: i64) -> Flow {
            let event = Event::DealSuggested(DealSuggested {
                player_id,
                listing,
                item: 555,
                amount: 2,
                enchant: 5,
                seller_price: seller,
                offered_price: offered,
                name: format!("Buyer{}", player_id),
            });
            self.engine.on_deal_suggested(&event)
        }

        fn offer_full(&mut self, payload: &ContractPayload) -> Flow {
            let event = Event::RequestContract(ContractOffer {
                sender_name: ME.to_string(),
                contract_type: ContractKind::NEGOTIATION_CODE,
                id: 77,
                data: payload.encode(),
            });
            self.engine.on_request_contract(&event)
        }

        fn offer_pending(&mut self) -> Flow {
            let event = Event::RequestContract(ContractOffer {
                sender_name: ME.to_string(),
                contract_type: ContractKind::PENDING_CODE,
                id: 76,
                data: Vec::new(),
            });
            self.engine.on_request_contract(&event)
        }

        fn info_update(&mut self, buyer_stage: u32, seller_stage: u32, price: i64) -> Flow {
            let event = Event::DealInfoUpdate(DealInfoUpdate {
                buyer_stage,
                seller_stage,
                price,
            });
            self.engine.on_deal_info_update(&event)
        }

        /// Suggest an acceptable deal and let it reach the Negotiating phase
        fn start(&mut self, player_id: u32, listing: u32) {
            self.suggest(player_id, listing, 1000, 1000);
            self.advance(Duration::ZERO);
            assert_eq!(self.engine.phase(), Phase::Negotiating);
        }

        fn chats(out: &[Outbound]) -> Vec<String> {
            out.iter()
                .filter_map(|m| match m {
                    Outbound::Client(ClientEvent::Chat(chat)) => Some(chat.message.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    fn payload_for(player_id: u32, listing: u32, offered: i64) -> ContractPayload {
        ContractPayload {
            trade_id: listing,
            item: 555,
            amount: 2,
            enchant: 5,
            seller_price: 1000,
            offered_price: offered,
            fee: 5,
            is_seller: true,
            buyer_name: format!("Buyer{}", player_id),
            seller_name: ME.to_string(),
            unidentified_grade: 0,
            masterwork: false,
            awakened: false,
            unbind_count: 0,
        }
    }

    fn is_cancel(request: &ServerRequest) -> bool {
        matches!(request, ServerRequest::CancelContract(_))
    }

    #[test]
    fn test_accepted_deal_reaches_confirming() {
        let mut h = Harness::without_delays();

        assert_eq!(h.suggest(7, 42, 1000, 1000), Flow::Handled);
        assert!(h.clock.is_pending(TimerKind::Action));
        h.advance(Duration::ZERO);

        let sends = h.server_sends();
        assert_eq!(sends.len(), 1);
        let ServerRequest::RequestContract(request) = &sends[0] else {
            panic!("Expected a contract request");
        };
        assert_eq!(request.contract_type, 35);
        assert_eq!(decode_request(&request.data).unwrap(), DealKey::new(7, 42));
        assert_eq!(h.engine.phase(), Phase::Negotiating);

        assert_eq!(h.offer_full(&payload_for(7, 42, 1000)), Flow::Handled);

        assert_eq!(h.engine.phase(), Phase::Confirming);
        assert!(h.server_sends().is_empty());
        let session = h.engine.session().unwrap();
        assert_eq!(session.deal().seller_name.as_deref(), Some(ME));
        assert!(session.contract().unwrap().payload.is_some());
    }

    #[test]
    fn test_declined_deal_advances_queue() {
        let mut h = Harness::without_delays();

        h.suggest(1, 10, 1000, 500);
        h.suggest(2, 20, 1000, 1000);
        h.advance(Duration::ZERO);

        let out = h.drain();
        let sends: Vec<_> = out
            .iter()
            .filter_map(|m| match m {
                Outbound::Server(request) => Some(request.clone()),
                _ => None,
            })
            .collect();

        assert_eq!(
            sends[0],
            ServerRequest::RejectSuggest(RejectSuggest {
                player_id: 1,
                listing: 10
            })
        );
        assert!(matches!(sends[1], ServerRequest::RequestContract(_)));
        assert_eq!(h.engine.session().unwrap().key(), DealKey::new(2, 20));
        assert!(Harness::chats(&out).contains(&"(Proxy)Declined negotiation from Buyer1.".to_string()));
    }

    #[test]
    fn test_decline_waits_short_delay() {
        let mut h = Harness::new(Settings::default());

        h.suggest(1, 10, 1000, 500);
        let long = h.clock.remaining(TimerKind::Action).unwrap();
        assert!(long >= Duration::from_millis(1200) && long <= Duration::from_millis(2600));

        h.suggest(2, 20, 1000, 400);
        h.fire(TimerKind::Action);
        assert_eq!(h.server_sends().len(), 1);
        assert!(h.engine.session().is_none());

        let short = h.clock.remaining(TimerKind::Action).unwrap();
        assert!(short >= Duration::from_millis(400) && short <= Duration::from_millis(800));
    }

    #[test]
    fn test_neutral_deal_is_left_alone() {
        let mut h = Harness::without_delays();

        assert_eq!(h.suggest(1, 10, 1000, 900), Flow::Continue);
        assert_eq!(h.engine.queue().pending_len(), 0);
        assert_eq!(h.engine.queue().recent_len(), 0);
        assert!(h.clock.pending().is_empty());
    }

    #[test]
    fn test_inactivity_with_contract_sends_one_cancel() {
        let mut h = Harness::without_delays();
        h.start(7, 42);
        h.offer_full(&payload_for(7, 42, 1000));
        h.drain();

        h.fire(TimerKind::Inactivity);

        let sends = h.server_sends();
        assert_eq!(sends.len(), 1);
        assert_eq!(
            sends[0],
            ServerRequest::CancelContract(ContractRef::new(36, 77))
        );
        assert_eq!(h.engine.phase(), Phase::Closing);
        assert!(h.clock.is_pending(TimerKind::Inactivity));

        // No acknowledgement: the second fire gives up
        h.fire(TimerKind::Inactivity);
        assert_eq!(h.engine.phase(), Phase::Idle);
        assert!(h.server_sends().is_empty());
    }

    #[test]
    fn test_inactivity_without_contract_moves_on() {
        let mut h = Harness::without_delays();
        h.start(1, 10);
        h.suggest(2, 20, 1000, 1000);
        h.drain();

        h.fire(TimerKind::Inactivity);

        let out = h.drain();
        assert!(Harness::chats(&out).contains(&"(Proxy)Negotiation timed out.".to_string()));
        assert!(!out
            .iter()
            .any(|m| matches!(m, Outbound::Server(ServerRequest::CancelContract(_)))));
        assert_eq!(h.engine.phase(), Phase::Idle);

        h.advance(Duration::ZERO);
        assert_eq!(h.engine.session().unwrap().key(), DealKey::new(2, 20));
    }

    #[test]
    fn test_inactivity_window_depends_on_backlog() {
        let mut h = Harness::without_delays();
        h.start(1, 10);
        assert_eq!(h.clock.remaining(TimerKind::Inactivity), Some(INACTIVITY_IDLE));

        h.suggest(2, 20, 1000, 1000);
        h.offer_pending();
        assert_eq!(
            h.clock.remaining(TimerKind::Inactivity),
            Some(INACTIVITY_WITH_BACKLOG)
        );
        assert_eq!(h.engine.phase(), Phase::Offered);
    }

    #[test]
    fn test_lowered_price_during_stages_is_fatal() {
        let mut h = Harness::without_delays();
        h.start(7, 42);
        h.offer_full(&payload_for(7, 42, 1000));
        h.drain();

        assert_eq!(h.info_update(2, 0, 999), Flow::Handled);

        let out = h.drain();
        assert!(out
            .iter()
            .any(|m| matches!(m, Outbound::Server(ServerRequest::CancelContract(_)))));
        assert!(!out
            .iter()
            .any(|m| matches!(m, Outbound::Server(ServerRequest::DealConfirm(_)))));
        assert!(Harness::chats(&out)[0].contains("Price mismatch"));
        assert_eq!(h.engine.phase(), Phase::Closing);
    }

    #[test]
    fn test_stage_confirmation() {
        let mut h = Harness::without_delays();
        h.start(7, 42);
        h.offer_full(&payload_for(7, 42, 1000));
        h.drain();

        h.info_update(2, 0, 1000);
        h.info_update(2, 1, 1100);
        h.info_update(1, 0, 1000);

        let sends = h.server_sends();
        assert_eq!(
            sends,
            vec![
                ServerRequest::DealConfirm(DealConfirm {
                    listing: 42,
                    stage: 1
                }),
                ServerRequest::DealConfirm(DealConfirm {
                    listing: 42,
                    stage: 2
                }),
            ]
        );
        assert_eq!(h.engine.session().unwrap().stages_confirmed(), 2);
    }

    #[test]
    fn test_first_stage_confirmation_is_delayed() {
        let mut settings = Settings::default();
        settings.delay_actions.long_range = [0, 0];
        let mut h = Harness::new(settings);
        h.start(7, 42);
        h.offer_full(&payload_for(7, 42, 1000));
        h.drain();

        h.info_update(2, 0, 1000);
        assert!(h.server_sends().is_empty());
        assert!(h.clock.is_pending(TimerKind::Action));

        h.fire(TimerKind::Action);
        assert_eq!(
            h.server_sends(),
            vec![ServerRequest::DealConfirm(DealConfirm {
                listing: 42,
                stage: 1
            })]
        );
    }

    #[test]
    fn test_delayed_confirmation_dropped_when_deal_ends() {
        let mut settings = Settings::default();
        settings.delay_actions.long_range = [0, 0];
        let mut h = Harness::new(settings);
        h.start(7, 42);
        h.offer_full(&payload_for(7, 42, 1000));
        h.info_update(2, 0, 1000);

        let cancel = Event::CancelContract(ContractRef::new(36, 77));
        assert_eq!(h.engine.on_cancel_contract(&cancel), Flow::Handled);
        h.drain();

        assert!(!h.clock.is_pending(TimerKind::Action));
        assert_eq!(h.engine.phase(), Phase::Idle);
        assert!(h.server_sends().is_empty());
    }

    #[test]
    fn test_contract_mismatch_cancels() {
        let mut h = Harness::without_delays();
        h.start(7, 42);
        h.drain();

        let mut payload = payload_for(7, 42, 1000);
        payload.item = 556;
        h.offer_full(&payload);

        let out = h.drain();
        assert_eq!(
            Harness::chats(&out),
            vec!["(Proxy)Contract mismatch on item: expected 555, got 556.".to_string()]
        );
        assert!(out
            .iter()
            .any(|m| matches!(m, Outbound::Server(ServerRequest::CancelContract(_)))));
        assert_eq!(h.engine.phase(), Phase::Closing);

        // Acknowledged by the server
        let ack = Event::CancelContract(ContractRef::new(36, 77));
        h.engine.on_cancel_contract(&ack);
        assert_eq!(h.engine.phase(), Phase::Idle);
        assert!(h.clock.pending().is_empty());
    }

    #[test]
    fn test_confirmed_price_below_threshold() {
        let mut h = Harness::without_delays();
        h.start(7, 42);
        h.drain();

        h.offer_full(&payload_for(7, 42, 999));

        let out = h.drain();
        assert_eq!(
            Harness::chats(&out),
            vec!["(Proxy)Price mismatch: offered 999, required at least 1000.".to_string()]
        );
        assert_eq!(h.engine.phase(), Phase::Closing);
    }

    #[test]
    fn test_malformed_payload_aborts() {
        let mut h = Harness::without_delays();
        h.start(7, 42);
        h.drain();

        let event = Event::RequestContract(ContractOffer {
            sender_name: ME.to_string(),
            contract_type: 36,
            id: 78,
            data: vec![0; 40],
        });
        assert_eq!(h.engine.on_request_contract(&event), Flow::Handled);

        let sends = h.server_sends();
        assert_eq!(sends, vec![ServerRequest::CancelContract(ContractRef::new(36, 78))]);
        assert_eq!(h.engine.phase(), Phase::Closing);
    }

    #[test]
    fn test_remote_reject_while_pending_voids_suggestion() {
        let mut h = Harness::without_delays();
        h.start(7, 42);
        h.offer_pending();
        h.drain();

        let event = Event::RejectContract(ContractRef::new(35, 76));
        assert_eq!(h.engine.on_reject_contract(&event), Flow::Handled);

        let out = h.drain();
        assert!(out.contains(&Outbound::Server(ServerRequest::RejectSuggest(RejectSuggest {
            player_id: 7,
            listing: 42
        }))));
        assert_eq!(
            Harness::chats(&out),
            vec!["(Proxy)Buyer7 aborted negotiation.".to_string()]
        );
        assert_eq!(h.engine.phase(), Phase::Idle);
        assert!(h.clock.pending().is_empty());
    }

    #[test]
    fn test_remote_reject_after_full_contract() {
        let mut h = Harness::without_delays();
        h.start(7, 42);
        h.offer_full(&payload_for(7, 42, 1000));
        h.drain();

        h.engine
            .on_reject_contract(&Event::RejectContract(ContractRef::new(36, 77)));

        assert!(h.server_sends().is_empty());
        assert_eq!(h.engine.phase(), Phase::Idle);
    }

    #[test]
    fn test_remote_timeout_ends_deal() {
        let mut h = Harness::without_delays();
        h.start(7, 42);
        h.drain();

        let flow = h
            .engine
            .on_deal_timeout(&Event::DealTimeout(DealTimeout { listing: 42 }));

        assert_eq!(flow, Flow::Handled);
        assert_eq!(
            Harness::chats(&h.drain()),
            vec!["(Proxy)Negotiation with Buyer7 timed out.".to_string()]
        );
        assert_eq!(h.engine.phase(), Phase::Idle);
    }

    #[test]
    fn test_refused_deal_request() {
        let mut h = Harness::without_delays();
        h.start(7, 42);
        h.drain();

        let ok = Event::RequestDealResult(RequestDealResult { ok: true });
        assert_eq!(h.engine.on_request_deal_result(&ok), Flow::Handled);
        assert_eq!(h.engine.phase(), Phase::Negotiating);

        let refused = Event::RequestDealResult(RequestDealResult { ok: false });
        assert_eq!(h.engine.on_request_deal_result(&refused), Flow::Handled);
        assert_eq!(h.engine.phase(), Phase::Idle);
        assert!(h.server_sends().is_empty());
    }

    #[test]
    fn test_events_without_active_deal_pass_through() {
        let mut h = Harness::without_delays();

        let events = [
            Event::CancelContract(ContractRef::new(36, 1)),
            Event::RejectContract(ContractRef::new(35, 1)),
            Event::ReplyRequestContract(ContractRef::new(35, 1)),
            Event::RequestDealResult(RequestDealResult { ok: false }),
            Event::DealTimeout(DealTimeout { listing: 1 }),
        ];
        assert_eq!(h.engine.on_cancel_contract(&events[0]), Flow::Continue);
        assert_eq!(h.engine.on_reject_contract(&events[1]), Flow::Continue);
        assert_eq!(h.engine.on_contract_progress(&events[2]), Flow::Continue);
        assert_eq!(h.engine.on_request_deal_result(&events[3]), Flow::Continue);
        assert_eq!(h.engine.on_deal_timeout(&events[4]), Flow::Continue);
        assert!(h.drain().is_empty());
    }

    #[test]
    fn test_unrelated_contract_types_ignored() {
        let mut h = Harness::without_delays();
        h.start(7, 42);

        let trade = Event::CancelContract(ContractRef::new(3, 1));
        assert_eq!(h.engine.on_cancel_contract(&trade), Flow::Continue);
        assert_eq!(h.engine.phase(), Phase::Negotiating);
    }

    #[test]
    fn test_system_message_correlation() {
        let mut h = Harness::without_delays();
        let opponent = Event::SystemMessage(SystemMessage {
            message: "@2421\x0bName\x0bBuyer7".to_string(),
        });
        let mine = Event::SystemMessage(SystemMessage {
            message: "@2422".to_string(),
        });

        // Nothing going on: not ours
        assert_eq!(h.engine.on_system_message(&opponent), Flow::Continue);

        h.start(7, 42);
        h.drain();
        assert_eq!(h.engine.on_system_message(&opponent), Flow::Handled);
        assert_eq!(
            Harness::chats(&h.drain()),
            vec!["(Proxy)Buyer7 cancelled negotiation.".to_string()]
        );

        // Local failure ends the deal, the echo arrives just after
        h.fire(TimerKind::Inactivity);
        assert_eq!(h.engine.phase(), Phase::Idle);
        assert_eq!(h.engine.on_system_message(&mine), Flow::Handled);

        h.advance(Duration::from_secs(2));
        assert_eq!(h.engine.on_system_message(&mine), Flow::Continue);
    }

    #[test]
    fn test_secondary_flow_adopts_cached_deal() {
        let mut settings = Settings::default();
        settings.delay_actions.enabled = false;
        settings.enable_secondary_flow = true;
        let mut h = Harness::new(settings);

        assert_eq!(h.suggest(7, 42, 1000, 900), Flow::Continue);
        assert_eq!(h.engine.queue().recent_len(), 1);

        let request = Event::ClientRequestContract(ContractRequest {
            contract_type: 35,
            name: String::new(),
            data: encode_request(DealKey::new(7, 42)),
        });
        assert_eq!(h.engine.on_client_request_contract(&request), Flow::Continue);

        let out = h.drain();
        assert!(out.contains(&Outbound::Client(ClientEvent::ReplyRequestContract(
            ContractRef::new(35, 0)
        ))));
        assert!(!out.iter().any(|m| matches!(m, Outbound::Server(_))));

        let session = h.engine.session().unwrap();
        assert_eq!(session.origin(), DealOrigin::Manual);
        assert_eq!(h.engine.queue().recent_len(), 0);
        assert!(!h.clock.is_pending(TimerKind::RecentExpiry(DealKey::new(7, 42))));

        // Manual deals are held to the price the player saw
        h.offer_full(&payload_for(7, 42, 900));
        assert_eq!(h.engine.phase(), Phase::Confirming);
    }

    #[test]
    fn test_secondary_flow_without_match() {
        let mut settings = Settings::default();
        settings.enable_secondary_flow = true;
        let mut h = Harness::new(settings);

        let request = Event::ClientRequestContract(ContractRequest {
            contract_type: 35,
            name: String::new(),
            data: encode_request(DealKey::new(1, 1)),
        });
        assert_eq!(h.engine.on_client_request_contract(&request), Flow::Continue);
        assert!(h.engine.session().is_none());
        assert!(h.drain().is_empty());
    }

    #[test]
    fn test_cache_entry_expires() {
        let mut settings = Settings::default();
        settings.enable_secondary_flow = true;
        let mut h = Harness::new(settings);

        h.suggest(7, 42, 1000, 900);
        h.advance(Duration::from_secs(31));
        assert_eq!(h.engine.queue().recent_len(), 0);
    }

    #[test]
    fn test_closing_takes_any_contract_event_as_ack() {
        let mut h = Harness::without_delays();
        h.start(7, 42);
        h.offer_full(&payload_for(7, 42, 1000));
        h.fire(TimerKind::Inactivity);
        assert_eq!(h.engine.phase(), Phase::Closing);

        let reply = Event::ReplyRequestContract(ContractRef::new(35, 77));
        assert_eq!(h.engine.on_contract_progress(&reply), Flow::Handled);
        assert_eq!(h.engine.phase(), Phase::Idle);
    }

    #[test]
    fn test_full_contract_accept_acknowledges_cancel() {
        let mut h = Harness::without_delays();
        h.start(7, 42);
        h.offer_full(&payload_for(7, 42, 1000));

        // Not closing: only pending contracts count as progress
        let accept = Event::AcceptContract(ContractRef::new(36, 77));
        assert_eq!(h.engine.on_contract_progress(&accept), Flow::Continue);
        assert_eq!(h.engine.phase(), Phase::Confirming);

        h.fire(TimerKind::Inactivity);
        assert_eq!(h.engine.phase(), Phase::Closing);

        assert_eq!(h.engine.on_contract_progress(&accept), Flow::Handled);
        assert_eq!(h.engine.phase(), Phase::Idle);
        assert!(h.clock.pending().is_empty());
    }

    #[test]
    fn test_stage_update_before_full_contract_ignored() {
        let mut h = Harness::without_delays();
        h.start(7, 42);
        h.offer_pending();
        h.drain();

        assert_eq!(h.info_update(2, 0, 1000), Flow::Handled);

        assert!(h.server_sends().is_empty());
        assert!(!h.clock.is_pending(TimerKind::Action));
        assert_eq!(h.engine.phase(), Phase::Offered);
        assert_eq!(h.engine.session().unwrap().stages_confirmed(), 0);
    }

    #[test]
    fn test_pending_contract_after_full_contract_ignored() {
        let mut h = Harness::without_delays();
        h.start(7, 42);
        h.offer_full(&payload_for(7, 42, 1000));
        h.offer_pending();
        h.drain();

        let session = h.engine.session().unwrap();
        assert_eq!(session.phase(), Phase::Confirming);
        assert!(session.contract().unwrap().payload.is_some());

        // A late reject no longer voids the suggestion
        h.engine
            .on_reject_contract(&Event::RejectContract(ContractRef::new(36, 77)));
        assert!(h.server_sends().is_empty());
        assert_eq!(h.engine.phase(), Phase::Idle);
    }

    #[test]
    fn test_stale_timer_fire_ignored() {
        let mut h = Harness::without_delays();
        h.start(7, 42);
        let stale = h.clock.pending()[0];
        h.offer_pending();

        h.engine.on_timer(TimerFired {
            id: stale.id,
            kind: stale.kind,
        });
        assert_eq!(h.engine.phase(), Phase::Offered);
    }

    #[test]
    fn test_accept_threshold_from_config() {
        let mut settings = Settings::default();
        settings.accept_threshold = dec!(0.9);
        settings.delay_actions.enabled = false;
        let mut h = Harness::new(settings);

        assert_eq!(h.suggest(1, 1, 1000, 900), Flow::Handled);
        h.advance(Duration::ZERO);
        assert_eq!(h.engine.phase(), Phase::Negotiating);
    }
}
