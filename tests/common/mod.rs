#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use cores_reconciler::adapters::MemoryTransactionRepository;
use cores_reconciler::cache::MemoryCache;
use cores_reconciler::domain::{EventKind, Processor, ProviderEvent};
use cores_reconciler::ledger::{Ledger, LedgerError, TransferRequest, TransferResult};
use cores_reconciler::services::{BalanceCache, Reconciler, StatusNotifier};

/// Ledger double that records transfers and keeps running balances.
#[derive(Default)]
pub struct RecordingLedger {
    transfers: Mutex<Vec<TransferRequest>>,
    balances: Mutex<HashMap<String, i64>>,
    circuit_open: AtomicBool,
}

impl RecordingLedger {
    pub fn transfers(&self) -> Vec<TransferRequest> {
        self.transfers.lock().unwrap().clone()
    }

    /// While open, every call fails the way the real client does.
    pub fn set_circuit_open(&self, open: bool) {
        self.circuit_open.store(open, Ordering::SeqCst);
    }

    fn check_circuit(&self) -> Result<(), LedgerError> {
        if self.circuit_open.load(Ordering::SeqCst) {
            return Err(LedgerError::CircuitBreakerOpen("ledger circuit breaker is open".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for RecordingLedger {
    async fn transfer(&self, request: &TransferRequest) -> Result<TransferResult, LedgerError> {
        self.check_circuit()?;
        self.transfers.lock().unwrap().push(request.clone());

        let mut balances = self.balances.lock().unwrap();
        let receiver = balances.entry(request.receiver_id.clone()).or_insert(0);
        *receiver += request.amount;
        Ok(TransferResult {
            sender_balance: None,
            receiver_balance: Some(*receiver),
        })
    }

    async fn get_balance(&self, user_id: &str) -> Result<i64, LedgerError> {
        self.check_circuit()?;
        Ok(self.balances.lock().unwrap().get(user_id).copied().unwrap_or(0))
    }

    fn circuit_state(&self) -> String {
        if self.circuit_open.load(Ordering::SeqCst) {
            "open".to_string()
        } else {
            "closed".to_string()
        }
    }
}

pub struct Harness {
    pub repository: MemoryTransactionRepository,
    pub ledger: Arc<RecordingLedger>,
    pub cache: MemoryCache,
    pub balances: BalanceCache,
    pub notifier: StatusNotifier,
    pub reconciler: Arc<Reconciler>,
}

pub fn harness() -> Harness {
    let repository = MemoryTransactionRepository::new();
    let ledger = Arc::new(RecordingLedger::default());
    let cache = MemoryCache::new();
    let balances = BalanceCache::new(
        Arc::new(cache.clone()),
        ledger.clone(),
        Duration::from_secs(180),
    );
    let notifier = StatusNotifier::new(64);
    let reconciler = Arc::new(Reconciler::new(
        Arc::new(repository.clone()),
        ledger.clone(),
        balances.clone(),
        notifier.clone(),
    ));

    Harness {
        repository,
        ledger,
        cache,
        balances,
        notifier,
        reconciler,
    }
}

pub fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_760_000_000 + seconds, 0).unwrap()
}

pub fn event(provider_id: &str, kind: EventKind, value: i64, updated_at: DateTime<Utc>) -> ProviderEvent {
    ProviderEvent {
        processor: Processor::Paddle,
        provider_transaction_id: provider_id.to_string(),
        kind,
        user_id: "user-1".to_string(),
        value,
        updated_at,
    }
}

pub fn created(provider_id: &str, value: i64) -> ProviderEvent {
    event(provider_id, EventKind::Created, value, at(0))
}

pub fn ready(provider_id: &str, value: i64) -> ProviderEvent {
    event(provider_id, EventKind::Ready, value, at(10))
}

pub fn completed(provider_id: &str, value: i64) -> ProviderEvent {
    event(provider_id, EventKind::Completed, value, at(20))
}

pub fn payment_failed(provider_id: &str, error_code: &str) -> ProviderEvent {
    event(
        provider_id,
        EventKind::PaymentFailed {
            error_code: Some(error_code.to_string()),
        },
        500,
        at(10),
    )
}

pub fn updated(provider_id: &str, value: i64, updated_at: DateTime<Utc>) -> ProviderEvent {
    event(
        provider_id,
        EventKind::Updated {
            provider_status: "ready".to_string(),
        },
        value,
        updated_at,
    )
}
