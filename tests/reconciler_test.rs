mod common;

use common::*;
use cores_reconciler::domain::{Transaction, TransactionStatus};
use cores_reconciler::services::transitions::{SkipReason, TransitionError};
use cores_reconciler::services::{ReconcileError, ReconcileOutcome};

async fn stored(h: &Harness, provider_id: &str) -> Transaction {
    h.repository
        .all()
        .await
        .into_iter()
        .find(|tx| tx.provider_transaction_id.as_deref() == Some(provider_id))
        .expect("transaction stored")
}

#[tokio::test]
async fn test_created_ready_completed_settles_once() {
    let h = harness();

    h.reconciler.handle(created("txn_1", 500)).await.unwrap();
    h.reconciler.handle(ready("txn_1", 500)).await.unwrap();
    let outcome = h.reconciler.handle(completed("txn_1", 500)).await.unwrap();

    let tx = stored(&h, "txn_1").await;
    assert!(matches!(outcome, ReconcileOutcome::Settled(_)));
    assert_eq!(tx.status, TransactionStatus::Success);
    assert_eq!(tx.value, 500);

    let transfers = h.ledger.transfers();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].idempotency_key, tx.id);
    assert_eq!(transfers[0].receiver_id, "user-1");
    assert_eq!(transfers[0].amount, 500);
    assert_eq!(transfers[0].sender_id, None);
}

#[tokio::test]
async fn test_duplicate_completion_transfers_at_most_once() {
    let h = harness();

    h.reconciler.handle(created("txn_1", 500)).await.unwrap();
    h.reconciler.handle(completed("txn_1", 500)).await.unwrap();
    let second = h.reconciler.handle(completed("txn_1", 500)).await.unwrap();

    assert!(matches!(
        second,
        ReconcileOutcome::Skipped {
            reason: SkipReason::AlreadySettled,
            ..
        }
    ));
    assert_eq!(h.ledger.transfers().len(), 1);
}

#[tokio::test]
async fn test_replaying_every_event_twice_matches_single_replay() {
    let sequences = vec![
        (
            "created, ready, completed",
            vec![created("txn_1", 500), ready("txn_1", 500), completed("txn_1", 500)],
        ),
        (
            "created, declined, completed",
            vec![
                created("txn_1", 500),
                payment_failed("txn_1", "declined"),
                completed("txn_1", 500),
            ],
        ),
        (
            "ready first, fraud",
            vec![ready("txn_1", 500), payment_failed("txn_1", "fraud")],
        ),
        (
            "created, updated, ready, completed",
            vec![
                created("txn_1", 500),
                updated("txn_1", 700, at(30)),
                ready("txn_1", 700),
                completed("txn_1", 700),
            ],
        ),
        (
            "completed first, updated",
            vec![completed("txn_1", 500), updated("txn_1", 700, at(30))],
        ),
    ];

    for (name, sequence) in sequences {
        let once = harness();
        let twice = harness();

        for event in sequence.clone() {
            let _ = once.reconciler.handle(event).await;
        }
        for event in sequence {
            // Duplicates are acknowledged; some report errors, none change state.
            let _ = twice.reconciler.handle(event.clone()).await;
            let _ = twice.reconciler.handle(event).await;
        }

        let summary = |txs: Vec<Transaction>| {
            txs.into_iter()
                .map(|tx| (tx.status, tx.value, tx.flags, tx.updated_at))
                .collect::<Vec<_>>()
        };
        assert_eq!(
            summary(once.repository.all().await),
            summary(twice.repository.all().await),
            "{name}"
        );
        assert_eq!(twice.repository.all().await.len(), 1, "{name}");
        assert_eq!(
            once.ledger.transfers().len(),
            twice.ledger.transfers().len(),
            "{name}"
        );
    }
}

#[tokio::test]
async fn test_stale_update_never_mutates() {
    let h = harness();

    h.reconciler.handle(created("txn_1", 500)).await.unwrap();
    h.reconciler
        .handle(updated("txn_1", 700, at(30)))
        .await
        .unwrap();
    let before = stored(&h, "txn_1").await;

    let outcome = h
        .reconciler
        .handle(updated("txn_1", 900, at(5)))
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        ReconcileOutcome::Skipped {
            reason: SkipReason::Stale,
            ..
        }
    ));
    assert_eq!(stored(&h, "txn_1").await, before);
}

#[tokio::test]
async fn test_fresh_update_refreshes_value_without_status_change() {
    let h = harness();

    h.reconciler.handle(created("txn_1", 500)).await.unwrap();
    h.reconciler
        .handle(updated("txn_1", 700, at(30)))
        .await
        .unwrap();

    let tx = stored(&h, "txn_1").await;
    assert_eq!(tx.status, TransactionStatus::Created);
    assert_eq!(tx.value, 700);
    assert_eq!(tx.updated_at, at(30));
}

#[tokio::test]
async fn test_ready_after_success_is_rejected() {
    let h = harness();

    h.reconciler.handle(created("txn_1", 500)).await.unwrap();
    h.reconciler.handle(completed("txn_1", 500)).await.unwrap();
    let before = stored(&h, "txn_1").await;

    let outcome = h.reconciler.handle(ready("txn_1", 500)).await.unwrap();

    assert!(matches!(outcome, ReconcileOutcome::Rejected { event: "ready", .. }));
    assert_eq!(stored(&h, "txn_1").await, before);
}

#[tokio::test]
async fn test_declined_payment_then_retry_with_new_provider_id() {
    let h = harness();

    h.reconciler.handle(created("txn_1", 500)).await.unwrap();
    h.reconciler
        .handle(payment_failed("txn_1", "declined"))
        .await
        .unwrap();

    let failed = stored(&h, "txn_1").await;
    assert_eq!(failed.status, TransactionStatus::ErrorRecoverable);
    assert_eq!(failed.flags.error.as_deref(), Some("declined"));

    let err = h.reconciler.handle(created("txn_1", 500)).await.unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Transition(TransitionError::Duplicate { .. })
    ));

    let outcome = h.reconciler.handle(created("txn_2", 500)).await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Inserted(_)));
    assert_eq!(stored(&h, "txn_2").await.status, TransactionStatus::Created);
    assert_eq!(stored(&h, "txn_1").await.status, TransactionStatus::ErrorRecoverable);
}

#[tokio::test]
async fn test_other_payment_failures_are_terminal_errors() {
    let h = harness();

    h.reconciler.handle(created("txn_1", 500)).await.unwrap();
    h.reconciler
        .handle(payment_failed("txn_1", "fraud"))
        .await
        .unwrap();

    assert_eq!(stored(&h, "txn_1").await.status, TransactionStatus::Error);
}

#[tokio::test]
async fn test_completion_value_mismatch_is_consistency_violation() {
    let h = harness();

    h.reconciler.handle(created("txn_1", 500)).await.unwrap();
    h.reconciler.handle(completed("txn_1", 500)).await.unwrap();
    let err = h
        .reconciler
        .handle(completed("txn_1", 700))
        .await
        .unwrap_err();

    assert!(err.needs_operator());
    assert!(matches!(
        err,
        ReconcileError::Transition(TransitionError::ConsistencyViolation {
            stored: 500,
            incoming: 700
        })
    ));
    let tx = stored(&h, "txn_1").await;
    assert_eq!(tx.status, TransactionStatus::Success);
    assert_eq!(tx.value, 500);
    assert_eq!(h.ledger.transfers().len(), 1);
}

#[tokio::test]
async fn test_open_circuit_rolls_back_completion() {
    let h = harness();

    h.reconciler.handle(created("txn_1", 500)).await.unwrap();
    h.reconciler.handle(ready("txn_1", 500)).await.unwrap();

    h.ledger.set_circuit_open(true);
    let err = h
        .reconciler
        .handle(completed("txn_1", 500))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Ledger(ref e) if e.is_circuit_open()));
    assert_eq!(stored(&h, "txn_1").await.status, TransactionStatus::Processing);

    // Redelivery after the ledger recovers settles normally.
    h.ledger.set_circuit_open(false);
    h.reconciler.handle(completed("txn_1", 500)).await.unwrap();
    assert_eq!(stored(&h, "txn_1").await.status, TransactionStatus::Success);
    assert_eq!(h.ledger.transfers().len(), 1);
}

#[tokio::test]
async fn test_completed_first_inserts_and_settles() {
    let h = harness();

    let outcome = h.reconciler.handle(completed("txn_1", 300)).await.unwrap();

    assert!(matches!(outcome, ReconcileOutcome::Settled(_)));
    assert_eq!(h.ledger.transfers().len(), 1);
}

#[tokio::test]
async fn test_event_for_other_user_is_refused() {
    let h = harness();

    h.reconciler.handle(created("txn_1", 500)).await.unwrap();
    let mut hijack = completed("txn_1", 500);
    hijack.user_id = "user-2".to_string();

    let err = h.reconciler.handle(hijack).await.unwrap_err();

    assert!(matches!(err, ReconcileError::UserMismatch { .. }));
    assert!(h.ledger.transfers().is_empty());
}

#[tokio::test]
async fn test_settlement_refreshes_balance_and_notifies() {
    let h = harness();
    let mut updates = h.notifier.subscribe();

    h.reconciler.handle(created("txn_1", 500)).await.unwrap();
    h.reconciler.handle(completed("txn_1", 500)).await.unwrap();

    assert_eq!(h.balances.get("user-1").await, 500);

    let first = updates.recv().await.unwrap();
    let second = updates.recv().await.unwrap();
    assert_eq!(first.status, TransactionStatus::Created);
    assert_eq!(second.status, TransactionStatus::Success);
    assert_eq!(second.value, 500);
}

#[tokio::test]
async fn test_complete_manually_settles_failed_transaction() {
    let h = harness();

    h.reconciler.handle(created("txn_1", 500)).await.unwrap();
    h.reconciler
        .handle(payment_failed("txn_1", "fraud"))
        .await
        .unwrap();
    let id = stored(&h, "txn_1").await.id;

    let outcome = h.reconciler.complete_manually(id).await.unwrap();

    let tx = outcome.transaction();
    assert_eq!(tx.status, TransactionStatus::Success);
    assert_eq!(tx.flags.error, None);
    assert_eq!(tx.flags.note.as_deref(), Some("completed manually"));
    assert_eq!(h.ledger.transfers().len(), 1);

    let again = h.reconciler.complete_manually(id).await.unwrap();
    assert!(matches!(again, ReconcileOutcome::Skipped { .. }));
    assert_eq!(h.ledger.transfers().len(), 1);
}

#[tokio::test]
async fn test_concurrent_completions_transfer_once() {
    let h = harness();
    h.reconciler.handle(created("txn_1", 500)).await.unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let reconciler = h.reconciler.clone();
            tokio::spawn(async move { reconciler.handle(completed("txn_1", 500)).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(h.ledger.transfers().len(), 1);
    assert_eq!(stored(&h, "txn_1").await.status, TransactionStatus::Success);
}
