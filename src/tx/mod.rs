//! Transaction submission module with nonce scheduling and stuck recovery

pub mod broadcast;
pub mod gas;
pub mod monitor;
pub mod nonce;
pub mod scheduler;

pub use broadcast::Broadcaster;
pub use gas::{Eip1559Fees, FeeBumper};
pub use monitor::{StuckMonitor, TickOutcome};
pub use nonce::{NonceLane, NonceState, PendingTransaction, Reservation, TxStatus};
pub use scheduler::{NonceScheduler, Submission};
