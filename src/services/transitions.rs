//! Transaction status transition table.
//!
//! Every webhook handler goes through [`decide`], which maps the current
//! record (if any) and an incoming event to the write the reconciler must
//! perform.

use thiserror::Error;

use crate::domain::{EventKind, Processor, ProviderEvent, Transaction, TransactionStatus};

use TransactionStatus::*;

/// Provider error code that lets the user retry checkout.
pub const RECOVERABLE_ERROR_CODE: &str = "declined";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Local record is newer than the event.
    Stale,
    /// Completion already applied with the same value.
    AlreadySettled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// No record yet: create one with this status.
    Insert(TransactionStatus),
    /// Compare-and-swap the stored status.
    Advance {
        from: TransactionStatus,
        to: TransactionStatus,
    },
    /// Keep the status, refresh metadata.
    Touch,
    /// Drop the event, nothing to do.
    Skip(SkipReason),
    /// Current status is not a valid predecessor for this event.
    Reject { current: TransactionStatus },
}

impl Decision {
    /// Whether applying this decision moves the record into `Success`, which
    /// is what triggers the ledger transfer.
    pub fn settles(&self) -> bool {
        matches!(self, Decision::Insert(Success) | Decision::Advance { to: Success, .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("{processor} transaction {provider_transaction_id} already exists")]
    Duplicate {
        processor: Processor,
        provider_transaction_id: String,
    },

    #[error("settled transaction has value {stored}, completion reports {incoming}")]
    ConsistencyViolation { stored: i64, incoming: i64 },
}

/// Statuses an event may move a record out of. `None` means the event is
/// not gated on the current status.
pub fn valid_predecessors(kind: &EventKind) -> Option<&'static [TransactionStatus]> {
    match kind {
        EventKind::Ready => Some(&[Created]),
        EventKind::PaymentFailed { .. } => Some(&[Created, Processing]),
        EventKind::Created | EventKind::Updated { .. } | EventKind::Completed => None,
    }
}

pub fn failure_status(error_code: Option<&str>) -> TransactionStatus {
    match error_code {
        Some(RECOVERABLE_ERROR_CODE) => ErrorRecoverable,
        _ => Error,
    }
}

/// Status for a record first seen through an update.
pub fn inferred_status(provider_status: &str) -> TransactionStatus {
    match provider_status {
        "ready" => Processing,
        _ => Created,
    }
}

pub fn decide(
    current: Option<&Transaction>,
    event: &ProviderEvent,
) -> Result<Decision, TransitionError> {
    let Some(current) = current else {
        let status = match &event.kind {
            EventKind::Created => Created,
            EventKind::Ready => Processing,
            EventKind::PaymentFailed { error_code } => failure_status(error_code.as_deref()),
            EventKind::Updated { provider_status } => inferred_status(provider_status),
            EventKind::Completed => Success,
        };
        return Ok(Decision::Insert(status));
    };

    let next = match &event.kind {
        EventKind::Created => {
            return Err(TransitionError::Duplicate {
                processor: event.processor,
                provider_transaction_id: event.provider_transaction_id.clone(),
            })
        }
        EventKind::Ready => Processing,
        EventKind::PaymentFailed { error_code } => failure_status(error_code.as_deref()),
        EventKind::Updated { .. } => {
            if current.updated_at > event.updated_at {
                return Ok(Decision::Skip(SkipReason::Stale));
            }
            return Ok(Decision::Touch);
        }
        EventKind::Completed => {
            if current.status == Success {
                if current.value == event.value {
                    return Ok(Decision::Skip(SkipReason::AlreadySettled));
                }
                return Err(TransitionError::ConsistencyViolation {
                    stored: current.value,
                    incoming: event.value,
                });
            }
            Success
        }
    };

    if let Some(allowed) = valid_predecessors(&event.kind) {
        if !allowed.contains(&current.status) {
            return Ok(Decision::Reject {
                current: current.status,
            });
        }
    }

    Ok(Decision::Advance {
        from: current.status,
        to: next,
    })
}
