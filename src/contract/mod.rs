//! Contract layer - prepared calls, error mapping and typed results
//!
//! This module provides:
//! - `ContractCall`, a function bound to an address and arguments
//! - The `ErrorMapper` translating revert selectors into named errors
//! - Event extraction from receipts
//! - `TypedOperation`, the call/send/retrieve surface for callers

pub mod call;
pub mod errors;
pub mod events;
pub mod operation;

pub use call::ContractCall;
pub use errors::{ContractErrorSpec, ContractRevert, ErrorMapper, Selector};
pub use events::{find_events, DecodedEvent, EventBinding, EventDecoder, RawArgs};
pub use operation::{Outcome, TypedOperation};
