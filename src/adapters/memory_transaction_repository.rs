//! In-process implementation of TransactionRepository.
//!
//! Units of work are serialized by an owned mutex and write to a staged copy
//! of the table, which replaces the shared one on commit. Used by tests and
//! by local runs without Postgres.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::domain::{Processor, Transaction, TransactionStatus};
use crate::ports::{RepositoryError, RepositoryResult, TransactionRepository, TransactionUnit};

type Table = HashMap<Uuid, Transaction>;

#[derive(Clone, Default)]
pub struct MemoryTransactionRepository {
    rows: Arc<Mutex<Table>>,
}

impl MemoryTransactionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored row, oldest first.
    pub async fn all(&self) -> Vec<Transaction> {
        let mut rows: Vec<Transaction> = self.rows.lock().await.values().cloned().collect();
        rows.sort_by_key(|t| t.created_at);
        rows
    }
}

fn find_provider(table: &Table, processor: Processor, provider_id: &str) -> Option<Transaction> {
    table
        .values()
        .find(|t| {
            t.processor == Some(processor)
                && t.provider_transaction_id.as_deref() == Some(provider_id)
        })
        .cloned()
}

#[async_trait]
impl TransactionRepository for MemoryTransactionRepository {
    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Transaction> {
        self.rows
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn find_by_provider_id(
        &self,
        processor: Processor,
        provider_transaction_id: &str,
    ) -> RepositoryResult<Option<Transaction>> {
        let rows = self.rows.lock().await;
        Ok(find_provider(&rows, processor, provider_transaction_id))
    }

    async fn list(&self, limit: i64, offset: i64) -> RepositoryResult<Vec<Transaction>> {
        let mut rows = self.all().await;
        rows.reverse();
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn begin(&self) -> RepositoryResult<Box<dyn TransactionUnit>> {
        let guard = Arc::clone(&self.rows).lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTransactionUnit { guard, staged }))
    }
}

pub struct MemoryTransactionUnit {
    guard: OwnedMutexGuard<Table>,
    staged: Table,
}

#[async_trait]
impl TransactionUnit for MemoryTransactionUnit {
    async fn find_by_provider_id_for_update(
        &mut self,
        processor: Processor,
        provider_transaction_id: &str,
    ) -> RepositoryResult<Option<Transaction>> {
        Ok(find_provider(&self.staged, processor, provider_transaction_id))
    }

    async fn get_by_id_for_update(&mut self, id: Uuid) -> RepositoryResult<Transaction> {
        self.staged
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn insert(&mut self, tx: &Transaction) -> RepositoryResult<Transaction> {
        if self.staged.contains_key(&tx.id) {
            return Err(RepositoryError::Conflict(format!("id {} exists", tx.id)));
        }
        if let (Some(processor), Some(provider_id)) = (tx.processor, &tx.provider_transaction_id) {
            if find_provider(&self.staged, processor, provider_id).is_some() {
                return Err(RepositoryError::Conflict(format!(
                    "{processor} transaction {provider_id} exists"
                )));
            }
        }
        self.staged.insert(tx.id, tx.clone());
        Ok(tx.clone())
    }

    async fn update_if_status(
        &mut self,
        tx: &Transaction,
        expected: TransactionStatus,
    ) -> RepositoryResult<bool> {
        match self.staged.get_mut(&tx.id) {
            Some(row) if row.status == expected => {
                row.status = tx.status;
                row.receiver_id = tx.receiver_id.clone();
                row.value = tx.value;
                row.flags = tx.flags.clone();
                row.updated_at = tx.updated_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn commit(self: Box<Self>) -> RepositoryResult<()> {
        let MemoryTransactionUnit { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> RepositoryResult<()> {
        Ok(())
    }
}
