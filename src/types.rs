//! Core types used throughout the broker negotiator

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codec::ContractPayload;

/// Identifies a deal: the buyer and the listing they made an offer on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DealKey {
    pub player_id: u32,
    pub listing: u32,
}

impl DealKey {
    pub fn new(player_id: u32, listing: u32) -> Self {
        Self { player_id, listing }
    }
}

impl fmt::Display for DealKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.player_id, self.listing)
    }
}

/// How a deal became active
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DealOrigin {
    /// Dequeued after the price policy accepted it
    Automatic,
    /// Adopted from the recency cache after the player started the negotiation
    Manual,
}

/// One sale offer awaiting or undergoing negotiation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deal {
    pub player_id: u32,
    pub listing: u32,
    pub item: i32,
    pub amount: i32,
    pub enchant: i32,
    pub seller_price: i64,
    pub offered_price: i64,
    /// Buyer display name
    pub name: String,
    /// Filled in once the full contract payload has been seen
    pub seller_name: Option<String>,
}

impl Deal {
    pub fn key(&self) -> DealKey {
        DealKey::new(self.player_id, self.listing)
    }
}

/// Contract types the broker negotiation uses
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractKind {
    /// Request sent, counterpart has not produced the full terms yet
    Pending,
    /// Full terms attached as a binary payload
    Negotiation,
}

impl ContractKind {
    pub const PENDING_CODE: u32 = 35;
    pub const NEGOTIATION_CODE: u32 = 36;

    /// Map a wire contract type, ignoring unrelated contracts
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            Self::PENDING_CODE => Some(ContractKind::Pending),
            Self::NEGOTIATION_CODE => Some(ContractKind::Negotiation),
            _ => None,
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            ContractKind::Pending => Self::PENDING_CODE,
            ContractKind::Negotiation => Self::NEGOTIATION_CODE,
        }
    }
}

/// The handshake record for the active deal
#[derive(Clone, Debug, PartialEq)]
pub struct Contract {
    pub kind: ContractKind,
    pub id: u32,
    pub payload: Option<ContractPayload>,
}
