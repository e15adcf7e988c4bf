pub mod adapters;
pub mod cache;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod health;
pub mod ledger;
pub mod middleware;
pub mod openapi;
pub mod ports;
pub mod secrets;
pub mod services;
pub mod startup;
pub mod webhook;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AllowedIps;
use crate::health::DependencyChecker;
use crate::middleware::SourceAllowlistLayer;
use crate::ports::TransactionRepository;
use crate::services::{BalanceCache, StatusNotifier};
use crate::webhook::WebhookRouter;

#[derive(Clone)]
pub struct AppState {
    pub transactions: Arc<dyn TransactionRepository>,
    pub webhooks: Arc<WebhookRouter>,
    pub balances: BalanceCache,
    pub notifier: StatusNotifier,
    pub health_checks: Arc<Vec<Arc<dyn DependencyChecker>>>,
    pub start_time: Instant,
}

pub fn create_app(state: AppState, allowed_ips: AllowedIps, trusted_proxy_depth: usize) -> Router {
    let webhooks = Router::new()
        .route("/webhooks/paddle", post(handlers::webhook::paddle))
        .layer(SourceAllowlistLayer::new(allowed_ips, trusted_proxy_depth));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/transactions", get(handlers::transactions::list_transactions))
        .route("/transactions/:id", get(handlers::transactions::get_transaction))
        .route("/balance/:user_id", get(handlers::balance::get_balance))
        .route("/ws/transactions", get(handlers::ws::ws_handler))
        .merge(webhooks)
        .with_state(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
}
