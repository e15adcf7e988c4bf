mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use cores_reconciler::cache::{CacheStore, MemoryCache};
use cores_reconciler::ledger::{Ledger, TransferRequest};
use cores_reconciler::services::BalanceCache;
use uuid::Uuid;

async fn credit(ledger: &RecordingLedger, user_id: &str, amount: i64) {
    ledger
        .transfer(&TransferRequest {
            idempotency_key: Uuid::new_v4(),
            sender_id: None,
            receiver_id: user_id.to_string(),
            amount,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_miss_reads_ledger_and_populates_cache() {
    let h = harness();
    credit(&h.ledger, "user-1", 250).await;

    assert_eq!(h.balances.get("user-1").await, 250);
    assert_eq!(
        h.cache.get("balance:user-1").await.unwrap().as_deref(),
        Some(r#"{"amount":250}"#)
    );
}

#[tokio::test]
async fn test_hit_does_not_consult_ledger() {
    let h = harness();
    h.balances.set("user-1", 900).await;
    h.ledger.set_circuit_open(true);

    assert_eq!(h.balances.get("user-1").await, 900);
}

#[tokio::test]
async fn test_ledger_outage_reports_zero_and_caches_nothing() {
    let h = harness();
    h.ledger.set_circuit_open(true);

    assert_eq!(h.balances.get("user-1").await, 0);
    assert_eq!(h.cache.get("balance:user-1").await.unwrap(), None);

    h.ledger.set_circuit_open(false);
    credit(&h.ledger, "user-1", 75).await;
    assert_eq!(h.balances.get("user-1").await, 75);
}

#[tokio::test]
async fn test_invalidate_forces_fresh_read() {
    let h = harness();
    credit(&h.ledger, "user-1", 100).await;
    assert_eq!(h.balances.get("user-1").await, 100);

    credit(&h.ledger, "user-1", 50).await;
    assert_eq!(h.balances.get("user-1").await, 100);

    h.balances.invalidate("user-1").await;
    assert_eq!(h.balances.get("user-1").await, 150);
}

#[tokio::test]
async fn test_entries_expire_after_ttl() {
    let ledger = Arc::new(RecordingLedger::default());
    let cache = MemoryCache::new();
    let balances = BalanceCache::new(
        Arc::new(cache.clone()),
        ledger.clone(),
        Duration::from_millis(20),
    );

    credit(&ledger, "user-1", 10).await;
    assert_eq!(balances.get("user-1").await, 10);
    credit(&ledger, "user-1", 5).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(balances.get("user-1").await, 15);
}
