//! Localised system messages
//!
//! A system message payload is a list of `\x0b`-separated tokens whose first
//! token is `@<code>`. The code only means something through the host's
//! message table, which the [`SystemMessageDecoder`] stands in for.

use std::collections::HashMap;

const SEPARATOR: char = '\x0b';

pub const CANCEL_OPPONENT: &str = "SMT_MEDIATE_TRADE_CANCEL_OPPONENT";
pub const CANCEL_ME: &str = "SMT_MEDIATE_TRADE_CANCEL_ME";
pub const DISCONNECT_CANCEL_BY_ME: &str = "SMT_MEDIATE_DISCONNECT_CANCEL_OFFER_BY_ME";

/// Maps a message code to its symbolic name
pub trait SystemMessageDecoder: Send {
    fn decode(&self, code: u32) -> Option<&str>;
}

/// Code table loaded from settings
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SysmsgTable {
    names: HashMap<u32, String>,
}

impl SysmsgTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `sysmsg` settings table. Non-numeric codes are skipped.
    pub fn from_settings(table: &HashMap<String, String>) -> Self {
        let names = table
            .iter()
            .filter_map(|(code, name)| Some((code.parse().ok()?, name.clone())))
            .collect();
        Self { names }
    }

    pub fn insert(&mut self, code: u32, name: impl Into<String>) {
        self.names.insert(code, name.into());
    }
}

impl SystemMessageDecoder for SysmsgTable {
    fn decode(&self, code: u32) -> Option<&str> {
        self.names.get(&code).map(String::as_str)
    }
}

/// The trade notifications the negotiator reacts to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TradeNotice {
    CancelledByOpponent,
    CancelledByMe,
    DisconnectCancelledByMe,
}

/// Code carried by a system message, if it has one
pub fn message_code(message: &str) -> Option<u32> {
    let head = message.split(SEPARATOR).next()?;
    head.strip_prefix('@')?.parse().ok()
}

pub fn classify(decoder: &dyn SystemMessageDecoder, message: &str) -> Option<TradeNotice> {
    let code = message_code(message)?;
    match decoder.decode(code)? {
        CANCEL_OPPONENT => Some(TradeNotice::CancelledByOpponent),
        CANCEL_ME => Some(TradeNotice::CancelledByMe),
        DISCONNECT_CANCEL_BY_ME => Some(TradeNotice::DisconnectCancelledByMe),
        _ => None,
    }
}
