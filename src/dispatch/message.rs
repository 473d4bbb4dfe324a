//! Protocol event records exchanged with the dispatch layer

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::Deal;

/// Event kinds the negotiator subscribes to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    DealSuggested,
    RequestDealResult,
    DealInfoUpdate,
    DealTimeout,
    RequestContract,
    ReplyRequestContract,
    AcceptContract,
    RejectContract,
    CancelContract,
    SystemMessage,
    ClientRequestContract,
}

impl EventKind {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::DealSuggested => "S_TRADE_BROKER_DEAL_SUGGESTED",
            EventKind::RequestDealResult => "S_TRADE_BROKER_REQUEST_DEAL_RESULT",
            EventKind::DealInfoUpdate => "S_TRADE_BROKER_DEAL_INFO_UPDATE",
            EventKind::DealTimeout => "S_TRADE_BROKER_DEAL_TIMEOUT",
            EventKind::RequestContract => "S_REQUEST_CONTRACT",
            EventKind::ReplyRequestContract => "S_REPLY_REQUEST_CONTRACT",
            EventKind::AcceptContract => "S_ACCEPT_CONTRACT",
            EventKind::RejectContract => "S_REJECT_CONTRACT",
            EventKind::CancelContract => "S_CANCEL_CONTRACT",
            EventKind::SystemMessage => "S_SYSTEM_MESSAGE",
            EventKind::ClientRequestContract => "C_REQUEST_CONTRACT",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoded inbound event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Event {
    #[serde(rename = "S_TRADE_BROKER_DEAL_SUGGESTED")]
    DealSuggested(DealSuggested),
    #[serde(rename = "S_TRADE_BROKER_REQUEST_DEAL_RESULT")]
    RequestDealResult(RequestDealResult),
    #[serde(rename = "S_TRADE_BROKER_DEAL_INFO_UPDATE")]
    DealInfoUpdate(DealInfoUpdate),
    #[serde(rename = "S_TRADE_BROKER_DEAL_TIMEOUT")]
    DealTimeout(DealTimeout),
    #[serde(rename = "S_REQUEST_CONTRACT")]
    RequestContract(ContractOffer),
    #[serde(rename = "S_REPLY_REQUEST_CONTRACT")]
    ReplyRequestContract(ContractRef),
    #[serde(rename = "S_ACCEPT_CONTRACT")]
    AcceptContract(ContractRef),
    #[serde(rename = "S_REJECT_CONTRACT")]
    RejectContract(ContractRef),
    #[serde(rename = "S_CANCEL_CONTRACT")]
    CancelContract(ContractRef),
    #[serde(rename = "S_SYSTEM_MESSAGE")]
    SystemMessage(SystemMessage),
    #[serde(rename = "C_REQUEST_CONTRACT")]
    ClientRequestContract(ContractRequest),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::DealSuggested(_) => EventKind::DealSuggested,
            Event::RequestDealResult(_) => EventKind::RequestDealResult,
            Event::DealInfoUpdate(_) => EventKind::DealInfoUpdate,
            Event::DealTimeout(_) => EventKind::DealTimeout,
            Event::RequestContract(_) => EventKind::RequestContract,
            Event::ReplyRequestContract(_) => EventKind::ReplyRequestContract,
            Event::AcceptContract(_) => EventKind::AcceptContract,
            Event::RejectContract(_) => EventKind::RejectContract,
            Event::CancelContract(_) => EventKind::CancelContract,
            Event::SystemMessage(_) => EventKind::SystemMessage,
            Event::ClientRequestContract(_) => EventKind::ClientRequestContract,
        }
    }
}

/// A buyer made an offer on one of our listings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealSuggested {
    pub player_id: u32,
    pub listing: u32,
    pub item: i32,
    pub amount: i32,
    #[serde(default)]
    pub enchant: i32,
    pub seller_price: i64,
    pub offered_price: i64,
    pub name: String,
}

impl DealSuggested {
    pub fn to_deal(&self) -> Deal {
        Deal {
            player_id: self.player_id,
            listing: self.listing,
            item: self.item,
            amount: self.amount,
            enchant: self.enchant,
            seller_price: self.seller_price,
            offered_price: self.offered_price,
            name: self.name.clone(),
            seller_name: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDealResult {
    pub ok: bool,
}

/// Negotiation stages advanced by either side
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealInfoUpdate {
    pub buyer_stage: u32,
    pub seller_stage: u32,
    pub price: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealTimeout {
    #[serde(default)]
    pub listing: u32,
}

/// Contract offered by the server, payload attached for the full-data type
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractOffer {
    pub sender_name: String,
    #[serde(rename = "type")]
    pub contract_type: u32,
    pub id: u32,
    #[serde(default, with = "hex_bytes")]
    pub data: Vec<u8>,
}

/// Reference to a contract by type and id
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractRef {
    #[serde(rename = "type")]
    pub contract_type: u32,
    #[serde(default)]
    pub id: u32,
}

impl ContractRef {
    pub fn new(contract_type: u32, id: u32) -> Self {
        Self { contract_type, id }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemMessage {
    pub message: String,
}

/// Contract request, either observed from the client or sent by us
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractRequest {
    #[serde(rename = "type")]
    pub contract_type: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default, with = "hex_bytes")]
    pub data: Vec<u8>,
}

/// Requests sent to the server
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ServerRequest {
    #[serde(rename = "C_REQUEST_CONTRACT")]
    RequestContract(ContractRequest),
    #[serde(rename = "C_TRADE_BROKER_REJECT_SUGGEST")]
    RejectSuggest(RejectSuggest),
    #[serde(rename = "C_TRADE_BROKER_DEAL_CONFIRM")]
    DealConfirm(DealConfirm),
    #[serde(rename = "C_CANCEL_CONTRACT")]
    CancelContract(ContractRef),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectSuggest {
    pub player_id: u32,
    pub listing: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealConfirm {
    pub listing: u32,
    pub stage: u32,
}

/// Events injected towards the local client
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ClientEvent {
    #[serde(rename = "S_REPLY_REQUEST_CONTRACT")]
    ReplyRequestContract(ContractRef),
    #[serde(rename = "S_CHAT")]
    Chat(ChatMessage),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub channel: u32,
    pub message: String,
}

/// Anything the negotiator sends
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "to", content = "event", rename_all = "lowercase")]
pub enum Outbound {
    Server(ServerRequest),
    Client(ClientEvent),
}

/// Binary payloads travel as hex strings
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hex::decode(raw.trim()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_from_json() {
        let raw = r#"{"kind":"S_TRADE_BROKER_DEAL_SUGGESTED","playerId":7,"listing":42,
            "item":100,"amount":1,"sellerPrice":1000,"offeredPrice":900,"name":"Buyer"}"#;

        let event: Event = serde_json::from_str(raw).unwrap();
        assert_eq!(event.kind(), EventKind::DealSuggested);

        let Event::DealSuggested(suggested) = event else {
            panic!("Wrong event type");
        };
        let deal = suggested.to_deal();
        assert_eq!(deal.offered_price, 900);
        assert_eq!(deal.enchant, 0);
        assert!(deal.seller_name.is_none());
    }

    #[test]
    fn test_contract_payload_as_hex() {
        let raw = r#"{"kind":"S_REQUEST_CONTRACT","senderName":"Me","type":36,"id":5,"data":"0a0b"}"#;

        let event: Event = serde_json::from_str(raw).unwrap();
        match event {
            Event::RequestContract(offer) => {
                assert_eq!(offer.contract_type, 36);
                assert_eq!(offer.data, vec![0x0a, 0x0b]);
            }
            _ => panic!("Wrong event type"),
        }

        let bad = r#"{"kind":"S_REQUEST_CONTRACT","senderName":"Me","type":36,"id":5,"data":"xyz"}"#;
        assert!(serde_json::from_str::<Event>(bad).is_err());
    }

    #[test]
    fn test_outbound_serialization() {
        let out = Outbound::Server(ServerRequest::DealConfirm(DealConfirm {
            listing: 42,
            stage: 1,
        }));

        let value = serde_json::to_value(&out).unwrap();
        assert_eq!(value["to"], "server");
        assert_eq!(value["event"]["kind"], "C_TRADE_BROKER_DEAL_CONFIRM");
        assert_eq!(value["event"]["stage"], 1);

        let back: Outbound = serde_json::from_value(value).unwrap();
        assert_eq!(back, out);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(EventKind::ClientRequestContract.to_string(), "C_REQUEST_CONTRACT");
        assert_eq!(
            EventKind::DealTimeout.to_string(),
            "S_TRADE_BROKER_DEAL_TIMEOUT"
        );
    }
}
