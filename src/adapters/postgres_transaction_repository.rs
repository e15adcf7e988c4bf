//! Postgres implementation of TransactionRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use crate::domain::{Processor, Transaction, TransactionFlags, TransactionStatus};
use crate::ports::{RepositoryError, RepositoryResult, TransactionRepository, TransactionUnit};

const COLUMNS: &str = "id, processor, provider_transaction_id, status, sender_id, receiver_id, \
                       product_id, value, fee, flags, created_at, updated_at";

/// Postgres-backed transaction repository.
#[derive(Clone)]
pub struct PostgresTransactionRepository {
    pool: PgPool,
}

impl PostgresTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionRepository for PostgresTransactionRepository {
    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Transaction> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {COLUMNS} FROM transactions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| RepositoryError::NotFound(id.to_string()))?
            .into_domain()
    }

    async fn find_by_provider_id(
        &self,
        processor: Processor,
        provider_transaction_id: &str,
    ) -> RepositoryResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {COLUMNS} FROM transactions \
             WHERE processor = $1 AND provider_transaction_id = $2"
        ))
        .bind(processor.as_str())
        .bind(provider_transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn list(&self, limit: i64, offset: i64) -> RepositoryResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {COLUMNS} FROM transactions ORDER BY created_at DESC LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }

    async fn begin(&self) -> RepositoryResult<Box<dyn TransactionUnit>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresTransactionUnit { tx }))
    }
}

/// Unit of work backed by a single database transaction. Dropping it without
/// commit makes sqlx roll back.
pub struct PostgresTransactionUnit {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl TransactionUnit for PostgresTransactionUnit {
    async fn find_by_provider_id_for_update(
        &mut self,
        processor: Processor,
        provider_transaction_id: &str,
    ) -> RepositoryResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {COLUMNS} FROM transactions \
             WHERE processor = $1 AND provider_transaction_id = $2 \
             FOR UPDATE"
        ))
        .bind(processor.as_str())
        .bind(provider_transaction_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn get_by_id_for_update(&mut self, id: Uuid) -> RepositoryResult<Transaction> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {COLUMNS} FROM transactions WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.ok_or_else(|| RepositoryError::NotFound(id.to_string()))?
            .into_domain()
    }

    async fn insert(&mut self, tx: &Transaction) -> RepositoryResult<Transaction> {
        let flags = serde_json::to_value(&tx.flags)
            .map_err(|e| RepositoryError::Corrupt(e.to_string()))?;

        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            INSERT INTO transactions (
                id, processor, provider_transaction_id, status, sender_id, receiver_id,
                product_id, value, fee, flags, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(tx.id)
        .bind(tx.processor.map(|p| p.as_str()))
        .bind(&tx.provider_transaction_id)
        .bind(tx.status.code())
        .bind(&tx.sender_id)
        .bind(&tx.receiver_id)
        .bind(tx.product_id)
        .bind(tx.value)
        .bind(tx.fee)
        .bind(flags)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .fetch_one(&mut *self.tx)
        .await?;

        row.into_domain()
    }

    async fn update_if_status(
        &mut self,
        tx: &Transaction,
        expected: TransactionStatus,
    ) -> RepositoryResult<bool> {
        let flags = serde_json::to_value(&tx.flags)
            .map_err(|e| RepositoryError::Corrupt(e.to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET status = $3, receiver_id = $4, value = $5, flags = $6, updated_at = $7
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(tx.id)
        .bind(expected.code())
        .bind(tx.status.code())
        .bind(&tx.receiver_id)
        .bind(tx.value)
        .bind(flags)
        .bind(tx.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn commit(self: Box<Self>) -> RepositoryResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> RepositoryResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    processor: Option<String>,
    provider_transaction_id: Option<String>,
    status: i16,
    sender_id: Option<String>,
    receiver_id: Option<String>,
    product_id: Option<Uuid>,
    value: i64,
    fee: i64,
    flags: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_domain(self) -> RepositoryResult<Transaction> {
        let processor = self
            .processor
            .as_deref()
            .map(str::parse::<Processor>)
            .transpose()
            .map_err(RepositoryError::Corrupt)?;
        let status = TransactionStatus::from_code(self.status).ok_or_else(|| {
            RepositoryError::Corrupt(format!("status {} on transaction {}", self.status, self.id))
        })?;
        let flags: TransactionFlags = serde_json::from_value(self.flags)
            .map_err(|e| RepositoryError::Corrupt(e.to_string()))?;

        Ok(Transaction {
            id: self.id,
            processor,
            provider_transaction_id: self.provider_transaction_id,
            status,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            product_id: self.product_id,
            value: self.value,
            fee: self.fee,
            flags,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
