//! Transaction domain entity.
//! Framework-agnostic representation of one purchase or award attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// External payment processor that owns a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Processor {
    Paddle,
    StoreKit,
}

impl Processor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Processor::Paddle => "paddle",
            Processor::StoreKit => "store-kit",
        }
    }
}

impl fmt::Display for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Processor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paddle" => Ok(Processor::Paddle),
            "store-kit" => Ok(Processor::StoreKit),
            other => Err(format!("unknown processor: {other}")),
        }
    }
}

/// Transaction status. The discriminants are the persisted ordinals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum TransactionStatus {
    Success = 0,
    Error = 1,
    ErrorRecoverable = 2,
    Processing = 3,
    Created = 4,
}

impl TransactionStatus {
    pub fn code(self) -> i16 {
        self as i16
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(TransactionStatus::Success),
            1 => Some(TransactionStatus::Error),
            2 => Some(TransactionStatus::ErrorRecoverable),
            3 => Some(TransactionStatus::Processing),
            4 => Some(TransactionStatus::Created),
            _ => None,
        }
    }

    /// `Success` and `Error` never change again except through a forced
    /// settlement.
    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionStatus::Success | TransactionStatus::Error)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStatus::Success => "success",
            TransactionStatus::Error => "error",
            TransactionStatus::ErrorRecoverable => "error_recoverable",
            TransactionStatus::Processing => "processing",
            TransactionStatus::Created => "created",
        };
        f.write_str(name)
    }
}

/// Auxiliary metadata stored alongside a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TransactionFlags {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Domain entity representing a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    pub id: Uuid,
    pub processor: Option<Processor>,
    pub provider_transaction_id: Option<String>,
    pub status: TransactionStatus,
    pub sender_id: Option<String>,
    pub receiver_id: Option<String>,
    pub product_id: Option<Uuid>,
    pub value: i64,
    pub fee: i64,
    pub flags: TransactionFlags,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// A platform-originated currency purchase reported by `processor`.
    pub fn purchase(
        processor: Processor,
        provider_transaction_id: String,
        receiver_id: Option<String>,
        value: i64,
        status: TransactionStatus,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            processor: Some(processor),
            provider_transaction_id: Some(provider_transaction_id),
            status,
            sender_id: None,
            receiver_id,
            product_id: None,
            value,
            fee: 0,
            flags: TransactionFlags::default(),
            created_at: Utc::now(),
            updated_at,
        }
    }
}
