//! Binary contract payloads exchanged during broker negotiation

pub mod contract;
pub mod payload;

pub use contract::{decode_request, encode_request, ContractPayload, PAYLOAD_LEN, REQUEST_LEN};
pub use payload::{PayloadReader, PayloadWriter};
