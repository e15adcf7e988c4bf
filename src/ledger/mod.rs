pub mod client;

pub use client::{
    CircuitBreakerSettings, Ledger, LedgerClient, LedgerError, TransferRequest, TransferResult,
};
