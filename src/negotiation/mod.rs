//! Deal queueing, price policy and the negotiation state machine

pub mod engine;
pub mod policy;
pub mod queue;
pub mod session;
pub mod types;

pub use engine::NegotiationEngine;
pub use policy::{Decision, PricePolicy};
pub use queue::DealQueue;
pub use session::NegotiationSession;
pub use types::{PendingAction, Phase, Submission};
