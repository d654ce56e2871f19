use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("delivery failed: {0}")]
    Delivery(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Customer-facing notifications triggered by order and payment transitions.
/// All calls are best-effort: callers log failures and move on, so an
/// implementation must never be load-bearing for financial state.
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn order_confirmed(&self, order_id: Uuid, amount: Decimal)
        -> Result<(), NotificationError>;
    async fn invoice_ready(&self, order_id: Uuid) -> Result<(), NotificationError>;
    async fn payment_failed(
        &self,
        order_id: Uuid,
        reason: Option<&str>,
    ) -> Result<(), NotificationError>;
    async fn order_status(&self, order_id: Uuid, status: &str) -> Result<(), NotificationError>;
}

/// Log-backed sender. Stands in for the email/SMS provider integration;
/// each call records a structured line with a synthetic message id.
#[derive(Debug, Default, Clone)]
pub struct LogNotificationService;

impl LogNotificationService {
    pub fn new() -> Self {
        Self
    }

    fn message_id() -> String {
        format!("msg_{}", Uuid::new_v4().simple())
    }
}

#[async_trait]
impl NotificationService for LogNotificationService {
    async fn order_confirmed(
        &self,
        order_id: Uuid,
        amount: Decimal,
    ) -> Result<(), NotificationError> {
        info!(
            order_id = %order_id,
            amount = %amount,
            message_id = %Self::message_id(),
            "notification: order confirmed"
        );
        Ok(())
    }

    async fn invoice_ready(&self, order_id: Uuid) -> Result<(), NotificationError> {
        info!(
            order_id = %order_id,
            message_id = %Self::message_id(),
            "notification: invoice ready"
        );
        Ok(())
    }

    async fn payment_failed(
        &self,
        order_id: Uuid,
        reason: Option<&str>,
    ) -> Result<(), NotificationError> {
        info!(
            order_id = %order_id,
            reason = reason.unwrap_or("unspecified"),
            message_id = %Self::message_id(),
            "notification: payment failed"
        );
        Ok(())
    }

    async fn order_status(&self, order_id: Uuid, status: &str) -> Result<(), NotificationError> {
        info!(
            order_id = %order_id,
            status = status,
            message_id = %Self::message_id(),
            "notification: order status update"
        );
        Ok(())
    }
}
