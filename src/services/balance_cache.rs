use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::cache::CacheStore;
use crate::ledger::Ledger;

pub const DEFAULT_BALANCE_TTL: Duration = Duration::from_secs(180);
const BALANCE_PREFIX: &str = "balance:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CachedBalance {
    pub amount: i64,
}

fn balance_key(user_id: &str) -> String {
    format!("{}{}", BALANCE_PREFIX, user_id)
}

/// Write-through balance cache in front of the ledger.
///
/// Cache failures are logged and treated as misses; the ledger stays the
/// source of truth.
#[derive(Clone)]
pub struct BalanceCache {
    store: Arc<dyn CacheStore>,
    ledger: Arc<dyn Ledger>,
    ttl: Duration,
}

impl BalanceCache {
    pub fn new(store: Arc<dyn CacheStore>, ledger: Arc<dyn Ledger>, ttl: Duration) -> Self {
        Self { store, ledger, ttl }
    }

    /// Cached balance, or a fresh ledger read that is then cached. When the
    /// ledger is unreachable the balance degrades to 0 and nothing is cached.
    pub async fn get(&self, user_id: &str) -> i64 {
        let key = balance_key(user_id);
        match self.store.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<CachedBalance>(&raw) {
                Ok(cached) => return cached.amount,
                Err(e) => tracing::warn!(user_id, error = %e, "discarding malformed cached balance"),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!(user_id, error = %e, "balance cache read failed"),
        }

        match self.ledger.get_balance(user_id).await {
            Ok(amount) => {
                self.set(user_id, amount).await;
                amount
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, "ledger balance unavailable, reporting 0");
                0
            }
        }
    }

    pub async fn set(&self, user_id: &str, amount: i64) {
        let value = match serde_json::to_string(&CachedBalance { amount }) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(user_id, error = %e, "failed to encode balance");
                return;
            }
        };
        if let Err(e) = self.store.set_ex(&balance_key(user_id), value, self.ttl).await {
            tracing::warn!(user_id, error = %e, "balance cache write failed");
        }
    }

    pub async fn invalidate(&self, user_id: &str) {
        if let Err(e) = self.store.del(&balance_key(user_id)).await {
            tracing::warn!(user_id, error = %e, "balance cache invalidation failed");
        }
    }
}
