//! Provider events as seen by the reconciler, independent of wire format.

use chrono::{DateTime, Utc};

use super::transaction::Processor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Created,
    /// Payment authorized, not yet settled.
    Ready,
    PaymentFailed { error_code: Option<String> },
    /// Informational update carrying the provider's own status string.
    Updated { provider_status: String },
    /// Authoritative settlement signal.
    Completed,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Ready => "ready",
            EventKind::PaymentFailed { .. } => "payment_failed",
            EventKind::Updated { .. } => "updated",
            EventKind::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEvent {
    pub processor: Processor,
    pub provider_transaction_id: String,
    pub kind: EventKind,
    /// User id embedded in the checkout's custom data.
    pub user_id: String,
    pub value: i64,
    /// Provider's last-modified time for the transaction.
    pub updated_at: DateTime<Utc>,
}
