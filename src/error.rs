//! Error types for the broker negotiator

use thiserror::Error;

/// Main error type for the broker negotiator
#[derive(Error, Debug)]
pub enum BrokerError {
    // Codec errors
    #[error("Contract payload truncated: {needed} bytes at offset {offset}, payload is {len} bytes")]
    PayloadTruncated {
        offset: usize,
        needed: usize,
        len: usize,
    },

    #[error("Invalid UTF-16 in {0}")]
    InvalidName(&'static str),

    // Negotiation errors
    #[error("Contract mismatch on {field}: expected {expected}, got {actual}")]
    ContractMismatch {
        field: &'static str,
        expected: String,
        actual: String,
    },

    #[error("Price mismatch: offered {offered}, required at least {required}")]
    PriceViolation { offered: i64, required: i64 },

    #[error("Negotiation rejected by {0}")]
    RemoteRejected(String),

    #[error("Negotiation cancelled by {0}")]
    RemoteCancelled(String),

    #[error("Negotiation with {0} timed out")]
    RemoteTimedOut(String),

    #[error("Negotiation timed out")]
    LocalInactivityTimeout,

    #[error("Invalid negotiation state transition: {0}")]
    InvalidStateTransition(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration value: {0}")]
    InvalidConfig(String),

    // General errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BrokerError {
    /// Failures detected locally, as opposed to the counterpart ending the deal
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            BrokerError::PayloadTruncated { .. }
                | BrokerError::InvalidName(_)
                | BrokerError::ContractMismatch { .. }
                | BrokerError::PriceViolation { .. }
                | BrokerError::LocalInactivityTimeout
        )
    }
}

/// Result type alias for broker negotiator operations
pub type Result<T> = std::result::Result<T, BrokerError>;
