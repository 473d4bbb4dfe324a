//! Broker contract payloads
//!
//! The full-data contract carries the negotiated terms in a fixed layout.
//! All integers are little-endian; names are 37 UTF-16 code units.
//!
//! | offset | width | field                   |
//! |--------|-------|-------------------------|
//! | 0      | 4     | trade id (listing)      |
//! | 4      | 4     | item id                 |
//! | 8      | 4     | item amount             |
//! | 12     | 4     | item enchant            |
//! | 16     | 8     | seller price            |
//! | 24     | 8     | offered price           |
//! | 32     | 8     | fee                     |
//! | 40     | 1     | seller-role flag        |
//! | 41     | 1     | reserved                |
//! | 42     | 74    | buyer name              |
//! | 116    | 74    | seller name             |
//! | 190    | 4     | unidentified item grade |
//! | 194    | 1     | masterwork flag         |
//! | 195    | 1     | awakened flag           |
//! | 196    | 4     | unbind count            |

use serde::{Deserialize, Serialize};

use super::payload::{PayloadReader, PayloadWriter};
use crate::error::Result;
use crate::types::DealKey;

pub const NAME_UNITS: usize = 37;

const OFF_TRADE_ID: usize = 0;
const OFF_ITEM: usize = 4;
const OFF_AMOUNT: usize = 8;
const OFF_ENCHANT: usize = 12;
const OFF_SELLER_PRICE: usize = 16;
const OFF_OFFERED_PRICE: usize = 24;
const OFF_FEE: usize = 32;
const OFF_IS_SELLER: usize = 40;
const OFF_BUYER_NAME: usize = 42;
const OFF_SELLER_NAME: usize = OFF_BUYER_NAME + NAME_UNITS * 2;
const OFF_GRADE: usize = OFF_SELLER_NAME + NAME_UNITS * 2;
const OFF_MASTERWORK: usize = OFF_GRADE + 4;
const OFF_AWAKENED: usize = OFF_MASTERWORK + 1;
const OFF_UNBIND_COUNT: usize = OFF_AWAKENED + 1;

/// Size of a full-data contract payload
pub const PAYLOAD_LEN: usize = OFF_UNBIND_COUNT + 4;

/// Size of the payload attached to an outbound negotiation request
pub const REQUEST_LEN: usize = 30;

/// Decoded full-data contract
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractPayload {
    pub trade_id: u32,
    pub item: i32,
    pub amount: i32,
    pub enchant: i32,
    pub seller_price: i64,
    pub offered_price: i64,
    pub fee: i64,
    pub is_seller: bool,
    pub buyer_name: String,
    pub seller_name: String,
    pub unidentified_grade: i32,
    pub masterwork: bool,
    pub awakened: bool,
    pub unbind_count: i32,
}

impl ContractPayload {
    /// Decode a full-data payload. Short or malformed input is an error.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let r = PayloadReader::new(data);
        r.require(PAYLOAD_LEN)?;

        Ok(Self {
            trade_id: r.u32(OFF_TRADE_ID)?,
            item: r.i32(OFF_ITEM)?,
            amount: r.i32(OFF_AMOUNT)?,
            enchant: r.i32(OFF_ENCHANT)?,
            seller_price: r.i64(OFF_SELLER_PRICE)?,
            offered_price: r.i64(OFF_OFFERED_PRICE)?,
            fee: r.i64(OFF_FEE)?,
            is_seller: r.flag(OFF_IS_SELLER)?,
            buyer_name: r.utf16z(OFF_BUYER_NAME, NAME_UNITS, "buyer name")?,
            seller_name: r.utf16z(OFF_SELLER_NAME, NAME_UNITS, "seller name")?,
            unidentified_grade: r.i32(OFF_GRADE)?,
            masterwork: r.flag(OFF_MASTERWORK)?,
            awakened: r.flag(OFF_AWAKENED)?,
            unbind_count: r.i32(OFF_UNBIND_COUNT)?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::with_capacity(PAYLOAD_LEN);
        w.u32(self.trade_id)
            .i32(self.item)
            .i32(self.amount)
            .i32(self.enchant)
            .i64(self.seller_price)
            .i64(self.offered_price)
            .i64(self.fee)
            .flag(self.is_seller)
            .u8(0)
            .utf16z(&self.buyer_name, NAME_UNITS)
            .utf16z(&self.seller_name, NAME_UNITS)
            .i32(self.unidentified_grade)
            .flag(self.masterwork)
            .flag(self.awakened)
            .i32(self.unbind_count);
        w.finish()
    }
}

/// Payload for the outbound negotiation request: buyer and listing, zero-filled after
pub fn encode_request(key: DealKey) -> Vec<u8> {
    let mut w = PayloadWriter::with_capacity(REQUEST_LEN);
    w.u32(key.player_id).u32(key.listing);
    let rest = REQUEST_LEN - w.len();
    w.zeros(rest);
    w.finish()
}

/// Read back the deal a negotiation request refers to
pub fn decode_request(data: &[u8]) -> Result<DealKey> {
    let r = PayloadReader::new(data);
    Ok(DealKey::new(r.u32(0)?, r.u32(4)?))
}
