//! Broker Negotiator
//!
//! Automates trade-broker deal negotiation on behalf of a seller:
//! - Queues incoming deal suggestions and sorts them with a price policy
//! - Drives one negotiation at a time through the contract handshake
//! - Sanity-checks the full contract before confirming any stage
//! - Paces every action with human-like delays and bounds idle negotiations

pub mod cli;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gold;
pub mod negotiation;
pub mod timer;
pub mod types;

// Re-export commonly used types and functions
pub use config::Settings;
pub use dispatch::{Event, Flow, Negotiator, Outbound};
pub use error::{BrokerError, Result};
pub use gold::format_gold;
pub use negotiation::{Decision, NegotiationEngine, Phase, PricePolicy};
pub use timer::{ManualClock, Scheduler, TokioScheduler};
pub use types::{Deal, DealKey};
