use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::domain::Processor;
use crate::services::{ReconcileOutcome, Reconciler};
use crate::webhook::payload::{Notification, PayloadError, TransactionData, TransactionEventType};
use crate::webhook::signature;

/// What happened to one delivery. Every variant is acknowledged to the
/// provider; the distinction exists for logs and tests.
#[derive(Debug)]
pub enum WebhookOutcome {
    /// Bad signature or unparseable body. Nothing was touched.
    Rejected(String),
    /// Event type this service does not handle.
    Ignored(String),
    Applied(ReconcileOutcome),
    /// The reconciler returned an error. Already logged.
    Failed(String),
}

/// Verifies and dispatches provider notifications to the reconciler.
pub struct WebhookRouter {
    reconciler: Arc<Reconciler>,
    secret: String,
    max_age: Option<Duration>,
}

impl WebhookRouter {
    pub fn new(reconciler: Arc<Reconciler>, secret: String, max_age: Option<Duration>) -> Self {
        Self {
            reconciler,
            secret,
            max_age,
        }
    }

    /// Never returns an error: every failure is logged and folded into the
    /// outcome so the caller can always acknowledge the delivery.
    pub async fn route(&self, body: &[u8], signature_header: Option<&str>) -> WebhookOutcome {
        let processor = Processor::Paddle;

        if let Err(e) = signature::verify(
            &self.secret,
            signature_header,
            body,
            self.max_age,
            Utc::now(),
        ) {
            tracing::warn!(%processor, error = %e, "webhook signature rejected");
            return WebhookOutcome::Rejected(e.to_string());
        }

        let notification: Notification = match serde_json::from_slice(body) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(%processor, error = %e, "webhook body is not a notification");
                return WebhookOutcome::Rejected(e.to_string());
            }
        };

        let Some(event_type) = TransactionEventType::from_tag(&notification.event_type) else {
            tracing::info!(
                %processor,
                event_id = %notification.event_id,
                event_type = %notification.event_type,
                "ignoring unhandled webhook event type"
            );
            return WebhookOutcome::Ignored(notification.event_type);
        };

        let event = match serde_json::from_value::<TransactionData>(notification.data)
            .map_err(PayloadError::from)
            .and_then(|data| data.into_event(event_type, notification.occurred_at))
        {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    %processor,
                    event_id = %notification.event_id,
                    event_type = %notification.event_type,
                    error = %e,
                    "webhook transaction data rejected"
                );
                return WebhookOutcome::Rejected(e.to_string());
            }
        };

        match self.reconciler.handle(event).await {
            Ok(outcome) => WebhookOutcome::Applied(outcome),
            Err(e) => {
                tracing::error!(
                    %processor,
                    event_id = %notification.event_id,
                    event_type = %notification.event_type,
                    needs_operator = e.needs_operator(),
                    error = %e,
                    "webhook processing failed"
                );
                WebhookOutcome::Failed(e.to_string())
            }
        }
    }
}
