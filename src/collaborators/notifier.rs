use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::CollaboratorError;
use crate::domain::order::{OrderStatus, VerificationCode};
use crate::messaging::RedpandaClient;

/// Payload sent to the customer on every status change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerNotification {
    pub customer_id: Uuid,
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub invoice: u64,
    /// Only present on the notification issued at placement
    pub verification_code: Option<VerificationCode>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_customer(&self, notification: &CustomerNotification) -> Result<(), CollaboratorError>;

    /// Drop the still-pending verification-code notification of an order
    async fn purge_verification_notification(&self, order_id: Uuid) -> Result<(), CollaboratorError>;
}

fn verification_key(order_id: Uuid) -> String {
    format!("verification:{}", order_id)
}

/// Record key: verification-code notices get their own key so they can be purged
pub fn notification_key(notification: &CustomerNotification) -> String {
    if notification.verification_code.is_some() {
        verification_key(notification.order_id)
    } else {
        notification.order_id.to_string()
    }
}

// ============================================================================
// Redpanda Notifier
// ============================================================================

pub struct RedpandaNotifier {
    client: Arc<RedpandaClient>,
    topic: String,
}

impl RedpandaNotifier {
    pub fn new(client: Arc<RedpandaClient>, topic: impl Into<String>) -> Self {
        Self {
            client,
            topic: topic.into(),
        }
    }

    fn unavailable(err: anyhow::Error) -> CollaboratorError {
        CollaboratorError::Unavailable {
            service: "redpanda",
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl Notifier for RedpandaNotifier {
    async fn notify_customer(&self, notification: &CustomerNotification) -> Result<(), CollaboratorError> {
        let payload = serde_json::to_string(notification).map_err(|e| CollaboratorError::Rejected {
            service: "redpanda",
            message: format!("unserializable notification: {}", e),
        })?;

        self.client
            .publish(&self.topic, &notification_key(notification), &payload)
            .await
            .map_err(Self::unavailable)
    }

    async fn purge_verification_notification(&self, order_id: Uuid) -> Result<(), CollaboratorError> {
        self.client
            .publish_tombstone(&self.topic, &verification_key(order_id))
            .await
            .map_err(Self::unavailable)
    }
}

// ============================================================================
// Recording Notifier
// ============================================================================

#[derive(Default)]
struct Outbox {
    sent: Vec<CustomerNotification>,
    pending_codes: HashMap<Uuid, VerificationCode>,
    purged: Vec<Uuid>,
    failures_remaining: u32,
}

/// Keeps notifications in memory, keyed the same way the Redpanda topic is
#[derive(Default)]
pub struct RecordingNotifier {
    state: Mutex<Outbox>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_next(&self, count: u32) {
        self.state.lock().await.failures_remaining = count;
    }

    pub async fn sent(&self) -> Vec<CustomerNotification> {
        self.state.lock().await.sent.clone()
    }

    pub async fn sent_for(&self, order_id: Uuid) -> Vec<CustomerNotification> {
        self.state
            .lock()
            .await
            .sent
            .iter()
            .filter(|n| n.order_id == order_id)
            .cloned()
            .collect()
    }

    /// Verification code still visible to the customer, if not purged
    pub async fn pending_code(&self, order_id: Uuid) -> Option<VerificationCode> {
        self.state.lock().await.pending_codes.get(&order_id).cloned()
    }

    pub async fn purged(&self) -> Vec<Uuid> {
        self.state.lock().await.purged.clone()
    }

    fn take_failure(state: &mut Outbox) -> Result<(), CollaboratorError> {
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(CollaboratorError::Unavailable {
                service: "notifier",
                message: "notification transport timed out".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_customer(&self, notification: &CustomerNotification) -> Result<(), CollaboratorError> {
        let mut state = self.state.lock().await;
        Self::take_failure(&mut state)?;

        if let Some(code) = &notification.verification_code {
            state.pending_codes.insert(notification.order_id, code.clone());
        }
        state.sent.push(notification.clone());
        Ok(())
    }

    async fn purge_verification_notification(&self, order_id: Uuid) -> Result<(), CollaboratorError> {
        let mut state = self.state.lock().await;
        Self::take_failure(&mut state)?;

        state.pending_codes.remove(&order_id);
        state.purged.push(order_id);
        Ok(())
    }
}
