//! Transaction receipts: canonical form and waiting for them

pub mod normalize;
pub mod waiter;

pub use normalize::{normalize, Receipt, ReceiptLog};
pub use waiter::ReceiptWaiter;
