use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::adapters::PostgresTransactionRepository;
use crate::cache::{CacheStore, MemoryCache, RedisCache};
use crate::config::Config;
use crate::health::{DependencyChecker, LedgerChecker, PostgresChecker, RedisChecker};
use crate::ledger::{Ledger, LedgerClient};
use crate::ports::TransactionRepository;
use crate::secrets::{self, VaultSettings};
use crate::services::{BalanceCache, Reconciler, StatusNotifier};
use crate::webhook::WebhookRouter;
use crate::AppState;

/// Everything the server and the operator commands share.
pub struct Services {
    pub pool: PgPool,
    pub repository: Arc<dyn TransactionRepository>,
    pub ledger: Arc<dyn Ledger>,
    pub balances: BalanceCache,
    pub notifier: StatusNotifier,
    pub reconciler: Arc<Reconciler>,
}

impl Services {
    pub async fn build(config: &Config) -> Result<Self> {
        let pool = crate::db::create_pool(config)
            .await
            .context("failed to connect to Postgres")?;
        let repository: Arc<dyn TransactionRepository> =
            Arc::new(PostgresTransactionRepository::new(pool.clone()));

        let ledger: Arc<dyn Ledger> = Arc::new(LedgerClient::with_circuit_breaker(
            config.ledger_url.clone(),
            config.ledger_breaker,
        ));

        let store: Arc<dyn CacheStore> = match &config.redis_url {
            Some(url) => Arc::new(RedisCache::new(url).context("invalid REDIS_URL")?),
            None => {
                tracing::info!("REDIS_URL not set, caching balances in process");
                Arc::new(MemoryCache::new())
            }
        };
        let balances = BalanceCache::new(store, ledger.clone(), config.balance_cache_ttl);
        let notifier = StatusNotifier::default();

        let reconciler = Arc::new(Reconciler::new(
            repository.clone(),
            ledger.clone(),
            balances.clone(),
            notifier.clone(),
        ));

        Ok(Self {
            pool,
            repository,
            ledger,
            balances,
            notifier,
            reconciler,
        })
    }

    fn health_checks(&self, config: &Config) -> Vec<Arc<dyn DependencyChecker>> {
        let mut checks: Vec<Arc<dyn DependencyChecker>> = vec![
            Arc::new(PostgresChecker::new(self.pool.clone())),
            Arc::new(LedgerChecker::new(self.ledger.clone())),
        ];
        if let Some(url) = &config.redis_url {
            checks.push(Arc::new(RedisChecker::new(url.clone())));
        }
        checks
    }

    /// Resolves the webhook secret and assembles the HTTP state.
    pub async fn into_app_state(self, config: &Config, vault: Option<&VaultSettings>) -> Result<AppState> {
        let secret = secrets::resolve_webhook_secret(config, vault).await?;
        let webhooks = WebhookRouter::new(self.reconciler.clone(), secret, config.webhook_max_age);
        let health_checks = self.health_checks(config);

        Ok(AppState {
            transactions: self.repository,
            webhooks: Arc::new(webhooks),
            balances: self.balances,
            notifier: self.notifier,
            health_checks: Arc::new(health_checks),
            start_time: Instant::now(),
        })
    }
}
