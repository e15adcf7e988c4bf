pub mod balance_cache;
pub mod notifier;
pub mod reconciler;
pub mod transitions;

pub use balance_cache::BalanceCache;
pub use notifier::{StatusNotifier, TransactionStatusUpdate};
pub use reconciler::{ReconcileError, ReconcileOutcome, Reconciler};
