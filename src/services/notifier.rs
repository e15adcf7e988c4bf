use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::{Transaction, TransactionStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionStatusUpdate {
    pub transaction_id: Uuid,
    pub receiver_id: Option<String>,
    pub status: TransactionStatus,
    pub value: i64,
    pub timestamp: DateTime<Utc>,
    pub message: Option<String>,
}

impl From<&Transaction> for TransactionStatusUpdate {
    fn from(tx: &Transaction) -> Self {
        Self {
            transaction_id: tx.id,
            receiver_id: tx.receiver_id.clone(),
            status: tx.status,
            value: tx.value,
            timestamp: tx.updated_at,
            message: tx.flags.error.clone(),
        }
    }
}

/// Fire-and-forget fan-out of status changes to websocket clients and any
/// other in-process listener.
#[derive(Clone)]
pub struct StatusNotifier {
    sender: broadcast::Sender<TransactionStatusUpdate>,
}

impl StatusNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransactionStatusUpdate> {
        self.sender.subscribe()
    }

    pub fn publish(&self, tx: &Transaction) {
        // No receivers is not an error.
        let delivered = self.sender.send(TransactionStatusUpdate::from(tx)).unwrap_or(0);
        tracing::debug!(transaction_id = %tx.id, status = %tx.status, delivered, "status update published");
    }
}

impl Default for StatusNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Processor;

    #[tokio::test]
    async fn publish_without_subscribers_is_silent() {
        let notifier = StatusNotifier::new(4);
        let tx = Transaction::purchase(
            Processor::Paddle,
            "txn_1".into(),
            Some("u".into()),
            10,
            TransactionStatus::Created,
            Utc::now(),
        );
        notifier.publish(&tx);
    }

    #[tokio::test]
    async fn subscribers_receive_updates() {
        let notifier = StatusNotifier::new(4);
        let mut rx = notifier.subscribe();
        let tx = Transaction::purchase(
            Processor::Paddle,
            "txn_2".into(),
            Some("u".into()),
            10,
            TransactionStatus::Success,
            Utc::now(),
        );
        notifier.publish(&tx);

        let update = rx.recv().await.unwrap();
        assert_eq!(update.transaction_id, tx.id);
        assert_eq!(update.status, TransactionStatus::Success);
    }
}
