//! Ports implemented by storage adapters.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Processor, Transaction, TransactionStatus};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Transaction not found: {0}")]
    NotFound(String),

    /// A unique constraint rejected the write, usually a concurrent insert
    /// for the same provider transaction.
    #[error("Conflicting write: {0}")]
    Conflict(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("row not found".to_string()),
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                RepositoryError::Conflict(db.message().to_string())
            }
            other => RepositoryError::Database(other.to_string()),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Durable store of transactions.
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Transaction>;

    async fn find_by_provider_id(
        &self,
        processor: Processor,
        provider_transaction_id: &str,
    ) -> RepositoryResult<Option<Transaction>>;

    async fn list(&self, limit: i64, offset: i64) -> RepositoryResult<Vec<Transaction>>;

    /// Opens an atomic unit of work. Rows read through the unit stay locked
    /// until it commits or is dropped.
    async fn begin(&self) -> RepositoryResult<Box<dyn TransactionUnit>>;
}

/// One atomic read-validate-write cycle against the store. Dropping a unit
/// without calling `commit` discards every write made through it.
#[async_trait]
pub trait TransactionUnit: Send {
    async fn find_by_provider_id_for_update(
        &mut self,
        processor: Processor,
        provider_transaction_id: &str,
    ) -> RepositoryResult<Option<Transaction>>;

    async fn get_by_id_for_update(&mut self, id: Uuid) -> RepositoryResult<Transaction>;

    async fn insert(&mut self, tx: &Transaction) -> RepositoryResult<Transaction>;

    /// Writes `tx` only if the stored status still equals `expected`.
    /// Returns `false` when another writer got there first.
    async fn update_if_status(
        &mut self,
        tx: &Transaction,
        expected: TransactionStatus,
    ) -> RepositoryResult<bool>;

    async fn commit(self: Box<Self>) -> RepositoryResult<()>;

    async fn rollback(self: Box<Self>) -> RepositoryResult<()>;
}
