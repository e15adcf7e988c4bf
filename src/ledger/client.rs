use async_trait::async_trait;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::failure_policy::FailurePolicy;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Ledger returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Invalid response from ledger: {0}")]
    InvalidResponse(String),
    #[error("Circuit breaker open: {0}")]
    CircuitBreakerOpen(String),
}

impl LedgerError {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, LedgerError::CircuitBreakerOpen(_))
    }
}

/// Only transport failures and server errors count against the breaker;
/// a 4xx is the caller's fault, not a sign the ledger is down.
fn counts_as_failure(err: &LedgerError) -> bool {
    match err {
        LedgerError::Status { status, .. } => *status >= 500,
        _ => true,
    }
}

/// Body of `POST /transfer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub idempotency_key: Uuid,
    /// `None` credits the receiver from the platform.
    pub sender_id: Option<String>,
    pub receiver_id: String,
    pub amount: i64,
}

/// Balances after a transfer, when the ledger reports them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    #[serde(default)]
    pub sender_balance: Option<i64>,
    #[serde(default)]
    pub receiver_balance: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    amount: i64,
}

/// Balance transfer service of record.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn transfer(&self, request: &TransferRequest) -> Result<TransferResult, LedgerError>;

    async fn get_balance(&self, user_id: &str) -> Result<i64, LedgerError>;

    /// "closed" while calls are permitted, "open" otherwise.
    fn circuit_state(&self) -> String;
}

/// Tuning for the ledger circuit breaker.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerSettings {
    /// Fraction of failed calls in the window that opens the circuit.
    pub failure_rate: f64,
    /// Calls required in the window before the rate is evaluated.
    pub min_requests: u32,
    pub window: Duration,
    /// How long the circuit stays open before a trial call is let through.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_rate: 0.1,
            min_requests: 10,
            window: Duration::from_secs(30),
            cooldown: Duration::from_secs(5),
        }
    }
}

type Breaker = StateMachine<
    failure_policy::OrElse<
        failure_policy::SuccessRateOverTimeWindow<backoff::Constant>,
        failure_policy::ConsecutiveFailures<backoff::Constant>,
    >,
    (),
>;

/// Lets a single trial call through once the breaker has tripped. The
/// breaker itself admits every caller while half-open.
struct TrialGate {
    tripped: AtomicBool,
    permit: Semaphore,
}

impl TrialGate {
    fn new() -> Self {
        Self {
            tripped: AtomicBool::new(false),
            permit: Semaphore::new(1),
        }
    }
}

/// HTTP client for the ledger service.
#[derive(Clone)]
pub struct LedgerClient {
    client: Client,
    base_url: String,
    circuit_breaker: Breaker,
    gate: Arc<TrialGate>,
}

impl LedgerClient {
    /// Creates a new LedgerClient with the default breaker settings
    pub fn new(base_url: String) -> Self {
        Self::with_circuit_breaker(base_url, CircuitBreakerSettings::default())
    }

    /// Creates a new LedgerClient with custom circuit breaker configuration
    pub fn with_circuit_breaker(base_url: String, settings: CircuitBreakerSettings) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        // The rate policy only evaluates once a full window has elapsed, so a
        // run of consecutive failures trips the breaker before that.
        let policy = failure_policy::success_rate_over_time_window(
            1.0 - settings.failure_rate,
            settings.min_requests,
            settings.window,
            backoff::constant(settings.cooldown),
        )
        .or_else(failure_policy::consecutive_failures(
            settings.min_requests,
            backoff::constant(settings.cooldown),
        ));
        let circuit_breaker = Config::new().failure_policy(policy).build();

        LedgerClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            circuit_breaker,
            gate: Arc::new(TrialGate::new()),
        }
    }

    async fn guarded<T, F>(&self, call: F) -> Result<T, LedgerError>
    where
        F: Future<Output = Result<T, LedgerError>>,
    {
        let trial = if self.gate.tripped.load(Ordering::SeqCst) {
            match self.gate.permit.try_acquire() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    return Err(LedgerError::CircuitBreakerOpen(
                        "ledger trial call in flight".to_string(),
                    ))
                }
            }
        } else {
            None
        };

        let result = self.circuit_breaker.call_with(counts_as_failure, call).await;

        match &result {
            Ok(_) if trial.is_some() => {
                self.gate.tripped.store(false, Ordering::SeqCst);
                tracing::info!(base_url = %self.base_url, "ledger circuit closed after trial call");
            }
            Err(FailsafeError::Rejected) => self.gate.tripped.store(true, Ordering::SeqCst),
            Err(FailsafeError::Inner(_)) if !self.circuit_breaker.is_call_permitted() => {
                if !self.gate.tripped.swap(true, Ordering::SeqCst) {
                    tracing::warn!(base_url = %self.base_url, "ledger circuit opened");
                }
            }
            Err(FailsafeError::Inner(e)) if trial.is_some() && !counts_as_failure(e) => {
                self.gate.tripped.store(false, Ordering::SeqCst);
            }
            _ => {}
        }
        drop(trial);

        map_breaker(result)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

async fn read_error(response: reqwest::Response) -> LedgerError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    LedgerError::Status { status, body }
}

fn map_breaker<T>(result: Result<T, FailsafeError<LedgerError>>) -> Result<T, LedgerError> {
    match result {
        Ok(value) => Ok(value),
        Err(FailsafeError::Rejected) => Err(LedgerError::CircuitBreakerOpen(
            "ledger circuit breaker is open".to_string(),
        )),
        Err(FailsafeError::Inner(e)) => Err(e),
    }
}

#[async_trait]
impl Ledger for LedgerClient {
    async fn transfer(&self, request: &TransferRequest) -> Result<TransferResult, LedgerError> {
        let url = format!("{}/transfer", self.base_url);
        let client = self.client.clone();
        let body = request.clone();

        self.guarded(async move {
            let response = client
                .post(&url)
                .header("Idempotency-Key", body.idempotency_key.to_string())
                .json(&body)
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(read_error(response).await);
            }

            response
                .json::<TransferResult>()
                .await
                .map_err(|e| LedgerError::InvalidResponse(e.to_string()))
        })
        .await
    }

    async fn get_balance(&self, user_id: &str) -> Result<i64, LedgerError> {
        let url = format!("{}/balance/{}", self.base_url, user_id);
        let client = self.client.clone();

        self.guarded(async move {
            let response = client.get(&url).send().await?;

            // Unknown users have never received anything.
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(0);
            }
            if !response.status().is_success() {
                return Err(read_error(response).await);
            }

            let balance = response
                .json::<BalanceResponse>()
                .await
                .map_err(|e| LedgerError::InvalidResponse(e.to_string()))?;
            Ok(balance.amount)
        })
        .await
    }

    fn circuit_state(&self) -> String {
        let permitted = self.circuit_breaker.is_call_permitted();
        match (permitted, self.gate.tripped.load(Ordering::SeqCst)) {
            (false, _) => "open".to_string(),
            (true, true) => "half_open".to_string(),
            (true, false) => "closed".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_client_creation() {
        let client = LedgerClient::new("http://ledger.internal/".to_string());
        assert_eq!(client.base_url(), "http://ledger.internal");
    }

    #[test]
    fn test_circuit_breaker_starts_closed() {
        let client = LedgerClient::new("http://ledger.internal".to_string());
        assert_eq!(client.circuit_state(), "closed");
    }

    #[test]
    fn test_client_errors_do_not_trip_breaker() {
        let client_error = LedgerError::Status {
            status: 422,
            body: "insufficient funds".to_string(),
        };
        let server_error = LedgerError::Status {
            status: 503,
            body: String::new(),
        };
        assert!(!counts_as_failure(&client_error));
        assert!(counts_as_failure(&server_error));
        assert!(counts_as_failure(&LedgerError::InvalidResponse("bad".into())));
    }

    #[test]
    fn test_transfer_request_serialization() {
        let request = TransferRequest {
            idempotency_key: Uuid::nil(),
            sender_id: None,
            receiver_id: "user-1".to_string(),
            amount: 500,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["receiver_id"], "user-1");
        assert_eq!(json["amount"], 500);
        assert!(json["sender_id"].is_null());
    }
}
