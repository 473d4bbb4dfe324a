//! Event dispatch: records, hook chains and the negotiator facade

pub mod hooks;
pub mod message;
pub mod negotiator;
pub mod sysmsg;

pub use hooks::{Flow, HookRegistry, DEFAULT_PRIORITY};
pub use message::{ClientEvent, Event, EventKind, Outbound, ServerRequest};
pub use negotiator::Negotiator;
pub use sysmsg::{SysmsgTable, SystemMessageDecoder};
