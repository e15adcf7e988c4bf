//! Framework-agnostic domain types.

pub mod event;
pub mod transaction;

pub use event::{EventKind, ProviderEvent};
pub use transaction::{Processor, Transaction, TransactionFlags, TransactionStatus};
