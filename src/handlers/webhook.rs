use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::webhook::signature::SIGNATURE_HEADER;
use crate::webhook::WebhookOutcome;
use crate::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
}

/// Receives Paddle notifications.
///
/// The response is always `200 {"received": true}`, including for bad
/// signatures, unknown events and failed reconciliation. The provider only
/// learns that the delivery arrived; outcomes are reported through logs, and
/// a failed delivery is recovered by a later event or an operator.
#[utoipa::path(
    post,
    path = "/webhooks/paddle",
    request_body(content = String, description = "Raw Paddle notification", content_type = "application/json"),
    params(
        ("Paddle-Signature" = String, Header, description = "ts=<unix seconds>;h1=<hex hmac-sha256>")
    ),
    responses(
        (status = 200, description = "Delivery acknowledged", body = WebhookAck)
    ),
    tag = "Webhooks"
)]
pub async fn paddle(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    match state.webhooks.route(&body, signature).await {
        WebhookOutcome::Applied(outcome) => {
            let tx = outcome.transaction();
            tracing::info!(
                transaction_id = %tx.id,
                status = %tx.status,
                "webhook applied"
            );
        }
        WebhookOutcome::Ignored(event_type) => {
            tracing::debug!(%event_type, "webhook ignored");
        }
        // Logged with full context by the router.
        WebhookOutcome::Rejected(_) | WebhookOutcome::Failed(_) => {}
    }

    (StatusCode::OK, Json(WebhookAck { received: true }))
}
