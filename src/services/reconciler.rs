//! Applies provider events to the transaction store and settles completed
//! purchases against the ledger.
//!
//! Each event is handled inside one store unit of work: the current record
//! is read under lock, [`transitions::decide`] picks the write, and the write
//! is a compare-and-swap on the status that was read. When the write moves a
//! record into `Success`, the ledger transfer runs before the unit commits,
//! so a failed transfer rolls the status back and a redelivery can retry it.
//! The transfer is keyed by the local transaction id, which makes repeated
//! attempts safe on the ledger side.

use std::cmp::max;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{EventKind, ProviderEvent, Transaction, TransactionStatus};
use crate::ledger::{Ledger, LedgerError, TransferRequest, TransferResult};
use crate::ports::{RepositoryError, TransactionRepository, TransactionUnit};
use crate::services::balance_cache::BalanceCache;
use crate::services::notifier::StatusNotifier;
use crate::services::transitions::{self, Decision, SkipReason, TransitionError};

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("transaction {id} belongs to user {stored}, event is for user {incoming}")]
    UserMismatch {
        id: Uuid,
        stored: String,
        incoming: String,
    },

    #[error("transaction {0} has no receiver to credit")]
    MissingReceiver(Uuid),

    #[error("transaction changed concurrently: {0}")]
    Conflict(String),

    #[error("transaction not found: {0}")]
    NotFound(String),

    #[error("ledger transfer failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("store error: {0}")]
    Repository(RepositoryError),
}

impl From<RepositoryError> for ReconcileError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict(msg) => ReconcileError::Conflict(msg),
            RepositoryError::NotFound(msg) => ReconcileError::NotFound(msg),
            other => ReconcileError::Repository(other),
        }
    }
}

impl ReconcileError {
    /// Errors an operator has to look at; redelivery will not fix them.
    pub fn needs_operator(&self) -> bool {
        matches!(
            self,
            ReconcileError::Transition(TransitionError::ConsistencyViolation { .. })
                | ReconcileError::UserMismatch { .. }
                | ReconcileError::MissingReceiver(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Inserted(Transaction),
    Updated(Transaction),
    /// Moved into `Success` and credited on the ledger.
    Settled(Transaction),
    Skipped {
        transaction: Transaction,
        reason: SkipReason,
    },
    /// Out-of-order event dropped without touching the store.
    Rejected {
        transaction: Transaction,
        event: &'static str,
    },
}

impl ReconcileOutcome {
    pub fn transaction(&self) -> &Transaction {
        match self {
            ReconcileOutcome::Inserted(tx)
            | ReconcileOutcome::Updated(tx)
            | ReconcileOutcome::Settled(tx) => tx,
            ReconcileOutcome::Skipped { transaction, .. }
            | ReconcileOutcome::Rejected { transaction, .. } => transaction,
        }
    }
}

pub struct Reconciler {
    repository: Arc<dyn TransactionRepository>,
    ledger: Arc<dyn Ledger>,
    balances: BalanceCache,
    notifier: StatusNotifier,
}

impl Reconciler {
    pub fn new(
        repository: Arc<dyn TransactionRepository>,
        ledger: Arc<dyn Ledger>,
        balances: BalanceCache,
        notifier: StatusNotifier,
    ) -> Self {
        Self {
            repository,
            ledger,
            balances,
            notifier,
        }
    }

    #[tracing::instrument(
        skip(self, event),
        fields(
            processor = %event.processor,
            provider_transaction_id = %event.provider_transaction_id,
            event = event.kind.name(),
        )
    )]
    pub async fn handle(&self, event: ProviderEvent) -> Result<ReconcileOutcome, ReconcileError> {
        let mut unit = self.repository.begin().await?;
        let current = unit
            .find_by_provider_id_for_update(event.processor, &event.provider_transaction_id)
            .await?;

        if let Some(stored) = &current {
            match stored.receiver_id.as_deref() {
                Some(receiver) if receiver != event.user_id => {
                    return Err(ReconcileError::UserMismatch {
                        id: stored.id,
                        stored: receiver.to_string(),
                        incoming: event.user_id.clone(),
                    });
                }
                _ => {}
            }
        }

        let decision = match transitions::decide(current.as_ref(), &event) {
            Ok(decision) => decision,
            Err(err) => {
                if let TransitionError::ConsistencyViolation { stored, incoming } = &err {
                    tracing::error!(
                        stored,
                        incoming,
                        "completion value differs from settled transaction, operator action required"
                    );
                }
                return Err(err.into());
            }
        };
        let settles = decision.settles();

        let inserted = matches!(decision, Decision::Insert(_));
        let transaction = match (decision, current) {
            (Decision::Insert(status), _) => {
                let mut tx = Transaction::purchase(
                    event.processor,
                    event.provider_transaction_id.clone(),
                    Some(event.user_id.clone()),
                    event.value,
                    status,
                    event.updated_at,
                );
                record_error(&mut tx, &event.kind);
                unit.insert(&tx).await?
            }
            (Decision::Advance { from, to }, Some(current)) => {
                let mut tx = current;
                tx.status = to;
                tx.value = event.value;
                tx.updated_at = max(tx.updated_at, event.updated_at);
                record_error(&mut tx, &event.kind);
                compare_and_swap(unit.as_mut(), &tx, from).await?;
                tx
            }
            (Decision::Touch, Some(current)) => {
                let mut tx = current;
                if tx.status != TransactionStatus::Success {
                    tx.value = event.value;
                }
                tx.updated_at = event.updated_at;
                let status = tx.status;
                compare_and_swap(unit.as_mut(), &tx, status).await?;
                tx
            }
            (Decision::Skip(reason), Some(current)) => {
                unit.rollback().await?;
                tracing::info!(?reason, transaction_id = %current.id, "event skipped");
                return Ok(ReconcileOutcome::Skipped {
                    transaction: current,
                    reason,
                });
            }
            (Decision::Reject { current: status }, Some(current)) => {
                unit.rollback().await?;
                tracing::warn!(
                    transaction_id = %current.id,
                    current_status = %status,
                    "event is not a valid transition from current status, dropping"
                );
                return Ok(ReconcileOutcome::Rejected {
                    transaction: current,
                    event: event.kind.name(),
                });
            }
            (decision, None) => {
                // decide() only inserts when there is no record
                return Err(ReconcileError::NotFound(format!(
                    "{decision:?} without a stored transaction"
                )));
            }
        };

        if settles {
            let tx = self.settle(unit, transaction).await?;
            return Ok(ReconcileOutcome::Settled(tx));
        }

        unit.commit().await?;
        self.notifier.publish(&transaction);
        tracing::info!(transaction_id = %transaction.id, status = %transaction.status, "transaction reconciled");

        if inserted {
            Ok(ReconcileOutcome::Inserted(transaction))
        } else {
            Ok(ReconcileOutcome::Updated(transaction))
        }
    }

    /// Forces a stored transaction to `Success` and credits it. Used by
    /// operators to finish a settlement that failed on the ledger.
    #[tracing::instrument(skip(self))]
    pub async fn complete_manually(&self, id: Uuid) -> Result<ReconcileOutcome, ReconcileError> {
        let mut unit = self.repository.begin().await?;
        let current = unit.get_by_id_for_update(id).await?;

        if current.status == TransactionStatus::Success {
            unit.rollback().await?;
            return Ok(ReconcileOutcome::Skipped {
                transaction: current,
                reason: SkipReason::AlreadySettled,
            });
        }

        let mut tx = current.clone();
        tx.status = TransactionStatus::Success;
        tx.updated_at = max(tx.updated_at, Utc::now());
        tx.flags.error = None;
        tx.flags.note = Some("completed manually".to_string());
        compare_and_swap(unit.as_mut(), &tx, current.status).await?;

        let tx = self.settle(unit, tx).await?;
        Ok(ReconcileOutcome::Settled(tx))
    }

    /// Credits `tx` on the ledger, then commits `unit`. A transfer failure
    /// rolls the unit back and is returned to the caller.
    async fn settle(
        &self,
        unit: Box<dyn TransactionUnit>,
        tx: Transaction,
    ) -> Result<Transaction, ReconcileError> {
        let Some(receiver_id) = tx.receiver_id.clone() else {
            unit.rollback().await?;
            return Err(ReconcileError::MissingReceiver(tx.id));
        };

        let request = TransferRequest {
            idempotency_key: tx.id,
            sender_id: tx.sender_id.clone(),
            receiver_id,
            amount: tx.value,
        };

        let result = match self.ledger.transfer(&request).await {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(transaction_id = %tx.id, error = %err, "ledger transfer failed, rolling back");
                if let Err(rollback_err) = unit.rollback().await {
                    tracing::warn!(transaction_id = %tx.id, error = %rollback_err, "rollback failed");
                }
                return Err(err.into());
            }
        };

        if let Err(err) = unit.commit().await {
            // The ledger already applied the transfer; a redelivery replays it
            // under the same idempotency key.
            tracing::error!(transaction_id = %tx.id, error = %err, "commit failed after ledger transfer");
            return Err(err.into());
        }

        tracing::info!(transaction_id = %tx.id, value = tx.value, "transaction settled");
        self.refresh_balances(&tx, &result).await;
        self.notifier.publish(&tx);
        Ok(tx)
    }

    async fn refresh_balances(&self, tx: &Transaction, result: &TransferResult) {
        let parties = [
            (tx.receiver_id.as_deref(), result.receiver_balance),
            (tx.sender_id.as_deref(), result.sender_balance),
        ];
        for (user_id, balance) in parties {
            match (user_id, balance) {
                (Some(user_id), Some(amount)) => self.balances.set(user_id, amount).await,
                (Some(user_id), None) => self.balances.invalidate(user_id).await,
                (None, _) => {}
            }
        }
    }
}

async fn compare_and_swap(
    unit: &mut dyn TransactionUnit,
    tx: &Transaction,
    expected: TransactionStatus,
) -> Result<(), ReconcileError> {
    if unit.update_if_status(tx, expected).await? {
        Ok(())
    } else {
        Err(ReconcileError::Conflict(format!(
            "transaction {} is no longer {}",
            tx.id, expected
        )))
    }
}

fn record_error(tx: &mut Transaction, kind: &EventKind) {
    match kind {
        EventKind::PaymentFailed { error_code } => {
            tx.flags.error = Some(error_code.clone().unwrap_or_else(|| "unknown".to_string()));
        }
        EventKind::Completed => tx.flags.error = None,
        _ => {}
    }
}
