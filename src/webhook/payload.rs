//! Provider notification wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{EventKind, Processor, ProviderEvent};

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("invalid payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("transaction {0} carries no user id in custom data")]
    MissingUser(String),
}

/// Envelope shared by every notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub event_id: String,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionEventType {
    Created,
    Ready,
    PaymentFailed,
    Updated,
    Completed,
}

impl TransactionEventType {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "transaction.created" => Some(Self::Created),
            "transaction.ready" => Some(Self::Ready),
            "transaction.payment_failed" => Some(Self::PaymentFailed),
            "transaction.updated" => Some(Self::Updated),
            "transaction.completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionData {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub custom_data: Option<CheckoutCustomData>,
    #[serde(default)]
    pub items: Vec<TransactionItem>,
    #[serde(default)]
    pub payments: Vec<PaymentAttempt>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckoutCustomData {
    #[serde(default)]
    pub user_id: Option<String>,
}

fn one() -> i64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionItem {
    #[serde(default = "one")]
    pub quantity: i64,
    pub price: ItemPrice,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemPrice {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub custom_data: Option<PriceCustomData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceCustomData {
    /// Currency units granted per unit of this price.
    #[serde(default)]
    pub cores: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentAttempt {
    #[serde(default)]
    pub error_code: Option<String>,
}

impl TransactionData {
    /// Currency units the transaction grants.
    pub fn value(&self) -> i64 {
        self.items
            .iter()
            .map(|item| {
                let cores = item
                    .price
                    .custom_data
                    .as_ref()
                    .and_then(|c| c.cores)
                    .unwrap_or(0);
                cores.saturating_mul(item.quantity)
            })
            .fold(0i64, i64::saturating_add)
    }

    /// Error code of the most recent failed attempt. Attempts are listed
    /// newest first.
    pub fn error_code(&self) -> Option<&str> {
        self.payments.iter().find_map(|p| p.error_code.as_deref())
    }

    pub fn into_event(
        self,
        event_type: TransactionEventType,
        occurred_at: DateTime<Utc>,
    ) -> Result<ProviderEvent, PayloadError> {
        let kind = match event_type {
            TransactionEventType::Created => EventKind::Created,
            TransactionEventType::Ready => EventKind::Ready,
            TransactionEventType::PaymentFailed => EventKind::PaymentFailed {
                error_code: self.error_code().map(str::to_string),
            },
            TransactionEventType::Updated => EventKind::Updated {
                provider_status: self.status.clone(),
            },
            TransactionEventType::Completed => EventKind::Completed,
        };
        let value = self.value();
        let user_id = self
            .custom_data
            .and_then(|c| c.user_id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| PayloadError::MissingUser(self.id.clone()))?;

        Ok(ProviderEvent {
            processor: Processor::Paddle,
            provider_transaction_id: self.id,
            kind,
            user_id,
            value,
            updated_at: self.updated_at.unwrap_or(occurred_at),
        })
    }
}
