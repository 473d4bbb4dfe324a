//! The active negotiation

use crate::codec::ContractPayload;
use crate::error::{BrokerError, Result};
use crate::types::{Contract, ContractKind, Deal, DealKey, DealOrigin};

use super::types::Phase;

/// The one deal currently being negotiated and its contract
#[derive(Clone, Debug)]
pub struct NegotiationSession {
    deal: Deal,
    origin: DealOrigin,
    phase: Phase,
    contract: Option<Contract>,
    stages_confirmed: u32,
}

impl NegotiationSession {
    /// Start negotiating a deal; the request is assumed to be on its way
    pub fn new(deal: Deal, origin: DealOrigin) -> Self {
        Self {
            deal,
            origin,
            phase: Phase::Negotiating,
            contract: None,
            stages_confirmed: 0,
        }
    }

    pub fn deal(&self) -> &Deal {
        &self.deal
    }

    pub fn key(&self) -> DealKey {
        self.deal.key()
    }

    pub fn origin(&self) -> DealOrigin {
        self.origin
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn contract(&self) -> Option<&Contract> {
        self.contract.as_ref()
    }

    pub fn is_closing(&self) -> bool {
        self.phase == Phase::Closing
    }

    pub fn stages_confirmed(&self) -> u32 {
        self.stages_confirmed
    }

    /// Record a contract offered by the server
    pub fn receive_contract(&mut self, contract: Contract) -> Result<()> {
        if self.is_closing() {
            return Err(BrokerError::InvalidStateTransition(
                "Cannot take a contract while closing".to_string(),
            ));
        }
        if contract.kind == ContractKind::Pending && self.phase == Phase::Confirming {
            return Err(BrokerError::InvalidStateTransition(
                "Pending contract after the full contract".to_string(),
            ));
        }

        self.phase = match contract.kind {
            ContractKind::Pending => Phase::Offered,
            ContractKind::Negotiation => Phase::Confirming,
        };
        self.contract = Some(contract);
        Ok(())
    }

    /// Check a full contract against what was recorded when the deal was suggested.
    /// `sender_name` is whoever the contract event came from.
    pub fn verify_payload(&self, payload: &ContractPayload, sender_name: &str) -> Result<()> {
        let deal = &self.deal;

        check("listing", deal.listing, payload.trade_id)?;
        check("item", deal.item, payload.item)?;
        check("amount", deal.amount, payload.amount)?;
        check("enchant", deal.enchant, payload.enchant)?;
        check("seller price", deal.seller_price, payload.seller_price)?;
        check("buyer name", deal.name.as_str(), payload.buyer_name.as_str())?;
        check("seller name", sender_name, payload.seller_name.as_str())?;
        check("seller role", true, payload.is_seller)?;
        Ok(())
    }

    pub fn set_seller_name(&mut self, name: String) {
        self.deal.seller_name = Some(name);
    }

    pub fn record_stage_confirmed(&mut self) {
        self.stages_confirmed += 1;
    }

    /// A cancel has been sent; wait for the acknowledgement
    pub fn begin_closing(&mut self) {
        self.phase = Phase::Closing;
    }
}

fn check<T>(field: &'static str, expected: T, actual: T) -> Result<()>
where
    T: PartialEq + ToString,
{
    if expected == actual {
        return Ok(());
    }
    Err(BrokerError::ContractMismatch {
        field,
        expected: expected.to_string(),
        actual: actual.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deal() -> Deal {
        Deal {
            player_id: 7,
            listing: 42,
            item: 555,
            amount: 2,
            enchant: 5,
            seller_price: 1000,
            offered_price: 1000,
            name: "Buyer".to_string(),
            seller_name: None,
        }
    }

    fn payload() -> ContractPayload {
        ContractPayload {
            trade_id: 42,
            item: 555,
            amount: 2,
            enchant: 5,
            seller_price: 1000,
            offered_price: 1000,
            fee: 10,
            is_seller: true,
            buyer_name: "Buyer".to_string(),
            seller_name: "Me".to_string(),
            unidentified_grade: 0,
            masterwork: false,
            awakened: false,
            unbind_count: 0,
        }
    }

    fn contract(kind: ContractKind) -> Contract {
        Contract {
            kind,
            id: 9,
            payload: None,
        }
    }

    #[test]
    fn test_session_creation() {
        let session = NegotiationSession::new(deal(), DealOrigin::Automatic);

        assert_eq!(session.phase(), Phase::Negotiating);
        assert_eq!(session.key(), DealKey::new(7, 42));
        assert!(session.contract().is_none());
    }

    #[test]
    fn test_contract_phases() {
        let mut session = NegotiationSession::new(deal(), DealOrigin::Automatic);

        session.receive_contract(contract(ContractKind::Pending)).unwrap();
        assert_eq!(session.phase(), Phase::Offered);

        session.receive_contract(contract(ContractKind::Negotiation)).unwrap();
        assert_eq!(session.phase(), Phase::Confirming);
    }

    #[test]
    fn test_full_contract_is_not_downgraded() {
        let mut session = NegotiationSession::new(deal(), DealOrigin::Automatic);
        let mut full = contract(ContractKind::Negotiation);
        full.payload = Some(payload());
        session.receive_contract(full).unwrap();

        let result = session.receive_contract(contract(ContractKind::Pending));
        assert!(matches!(result, Err(BrokerError::InvalidStateTransition(_))));
        assert_eq!(session.phase(), Phase::Confirming);
        assert!(session.contract().unwrap().payload.is_some());
    }

    #[test]
    fn test_no_contract_while_closing() {
        let mut session = NegotiationSession::new(deal(), DealOrigin::Manual);
        session.begin_closing();

        let result = session.receive_contract(contract(ContractKind::Pending));
        assert!(result.is_err());
        assert!(session.is_closing());
    }

    #[test]
    fn test_verify_matching_payload() {
        let session = NegotiationSession::new(deal(), DealOrigin::Automatic);
        assert!(session.verify_payload(&payload(), "Me").is_ok());
    }

    #[test]
    fn test_verify_field_mismatch() {
        let session = NegotiationSession::new(deal(), DealOrigin::Automatic);

        let mut altered = payload();
        altered.enchant = 4;
        let err = session.verify_payload(&altered, "Me").unwrap_err();
        assert!(matches!(
            err,
            BrokerError::ContractMismatch { field: "enchant", .. }
        ));

        let err = session.verify_payload(&payload(), "Someone").unwrap_err();
        assert!(matches!(
            err,
            BrokerError::ContractMismatch {
                field: "seller name",
                ..
            }
        ));
    }

    #[test]
    fn test_verify_requires_seller_role() {
        let session = NegotiationSession::new(deal(), DealOrigin::Automatic);
        let mut altered = payload();
        altered.is_seller = false;

        let err = session.verify_payload(&altered, "Me").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Contract mismatch on seller role: expected true, got false"
        );
    }
}
