//! Negotiation phases and bookkeeping types

use serde::{Deserialize, Serialize};

use super::policy::Decision;
use crate::types::DealKey;

/// Where the single active negotiation stands
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// No active deal
    Idle,
    /// Request sent, waiting for the contract offer
    Negotiating,
    /// Pending contract received
    Offered,
    /// Full contract received and validated
    Confirming,
    /// Cancel sent, waiting for the acknowledgement
    Closing,
}

/// What the action timer does when it fires
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingAction {
    /// Dequeue and handle the next deal
    NextDeal,
    /// Send a stage confirmation for the active deal
    ConfirmStage { key: DealKey, stage: u32 },
}

/// What happened to a submitted suggestion
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submission {
    /// Will be accepted or declined automatically
    Queued(Decision),
    /// Kept for a manually started negotiation
    Cached,
    /// Left to the player
    Dropped,
}
