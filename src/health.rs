use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use utoipa::ToSchema;

use crate::ledger::Ledger;

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: HashMap<String, DependencyStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum DependencyStatus {
    Healthy { status: String, latency_ms: u64 },
    Unhealthy { status: String, error: String },
}

impl DependencyStatus {
    fn healthy(start: Instant) -> Self {
        DependencyStatus::Healthy {
            status: "healthy".to_string(),
            latency_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn unhealthy(error: impl ToString) -> Self {
        DependencyStatus::Unhealthy {
            status: "unhealthy".to_string(),
            error: error.to_string(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, DependencyStatus::Healthy { .. })
    }
}

#[async_trait]
pub trait DependencyChecker: Send + Sync {
    /// Name under which the result is reported.
    fn name(&self) -> &'static str;

    /// A failing critical dependency makes the service unhealthy rather
    /// than degraded.
    fn critical(&self) -> bool {
        false
    }

    async fn check(&self) -> DependencyStatus;
}

pub struct PostgresChecker {
    pool: sqlx::PgPool,
}

impl PostgresChecker {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DependencyChecker for PostgresChecker {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn critical(&self) -> bool {
        true
    }

    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => DependencyStatus::healthy(start),
            Err(e) => DependencyStatus::unhealthy(e),
        }
    }
}

pub struct RedisChecker {
    url: String,
}

impl RedisChecker {
    pub fn new(url: String) -> Self {
        Self { url }
    }

    async fn ping(&self) -> anyhow::Result<()> {
        let client = redis::Client::open(self.url.as_str())?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl DependencyChecker for RedisChecker {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        match self.ping().await {
            Ok(()) => DependencyStatus::healthy(start),
            Err(e) => DependencyStatus::unhealthy(e),
        }
    }
}

/// Reports the ledger circuit breaker; an open circuit means settlements are
/// currently failing.
pub struct LedgerChecker {
    ledger: Arc<dyn Ledger>,
}

impl LedgerChecker {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl DependencyChecker for LedgerChecker {
    fn name(&self) -> &'static str {
        "ledger"
    }

    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        match self.ledger.circuit_state().as_str() {
            "closed" => DependencyStatus::healthy(start),
            state => DependencyStatus::unhealthy(format!("circuit breaker {state}")),
        }
    }
}

pub async fn check_health(
    checkers: &[Arc<dyn DependencyChecker>],
    start_time: Instant,
) -> HealthResponse {
    let results = join_all(checkers.iter().map(|checker| async move {
        let status = timeout(CHECK_TIMEOUT, checker.check())
            .await
            .unwrap_or_else(|_| DependencyStatus::unhealthy("timeout"));
        (checker.name(), checker.critical(), status)
    }))
    .await;

    let status = determine_overall_status(&results);
    let dependencies = results
        .into_iter()
        .map(|(name, _, status)| (name.to_string(), status))
        .collect();

    HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: start_time.elapsed().as_secs(),
        dependencies,
    }
}

fn determine_overall_status(results: &[(&str, bool, DependencyStatus)]) -> String {
    let mut has_critical_failure = false;
    let mut has_non_critical_failure = false;

    for (_, critical, status) in results {
        if !status.is_healthy() {
            if *critical {
                has_critical_failure = true;
            } else {
                has_non_critical_failure = true;
            }
        }
    }

    if has_critical_failure {
        "unhealthy".to_string()
    } else if has_non_critical_failure {
        "degraded".to_string()
    } else {
        "healthy".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        name: &'static str,
        critical: bool,
        healthy: bool,
    }

    #[async_trait]
    impl DependencyChecker for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        fn critical(&self) -> bool {
            self.critical
        }

        async fn check(&self) -> DependencyStatus {
            if self.healthy {
                DependencyStatus::healthy(Instant::now())
            } else {
                DependencyStatus::unhealthy("down")
            }
        }
    }

    fn checker(name: &'static str, critical: bool, healthy: bool) -> Arc<dyn DependencyChecker> {
        Arc::new(Fixed {
            name,
            critical,
            healthy,
        })
    }

    #[tokio::test]
    async fn test_all_healthy() {
        let report = check_health(
            &[checker("postgres", true, true), checker("redis", false, true)],
            Instant::now(),
        )
        .await;
        assert_eq!(report.status, "healthy");
        assert_eq!(report.dependencies.len(), 2);
    }

    #[tokio::test]
    async fn test_non_critical_failure_degrades() {
        let report = check_health(
            &[checker("postgres", true, true), checker("ledger", false, false)],
            Instant::now(),
        )
        .await;
        assert_eq!(report.status, "degraded");
    }

    #[tokio::test]
    async fn test_critical_failure_is_unhealthy() {
        let report = check_health(&[checker("postgres", true, false)], Instant::now()).await;
        assert_eq!(report.status, "unhealthy");
        assert!(!report.dependencies["postgres"].is_healthy());
    }

    #[test]
    fn test_dependency_status_serialization() {
        let json = serde_json::to_value(DependencyStatus::unhealthy("timeout")).unwrap();
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["error"], "timeout");
        assert!(json.get("latency_ms").is_none());
    }
}
