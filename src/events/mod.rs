use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::notifications::NotificationService;

/// Events emitted after state transitions commit. Consumers run off the
/// request path; a slow or failing consumer never rolls back a transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderCancelled(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    PaymentInitiated {
        order_id: Uuid,
        transaction_id: String,
        amount: Decimal,
    },
    PaymentSucceeded {
        order_id: Uuid,
        payment_id: Uuid,
        amount: Decimal,
    },
    PaymentFailed {
        order_id: Uuid,
        payment_id: Uuid,
        reason: Option<String>,
    },
    StockReleased(Uuid),
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Drains the event channel, logging every event and fanning payment
/// outcomes out to the notification service. Notification failures are
/// logged and dropped.
pub async fn process_events(
    mut receiver: mpsc::Receiver<Event>,
    notifier: Arc<dyn NotificationService>,
) {
    while let Some(event) = receiver.recv().await {
        info!(?event, "processing event");
        match &event {
            Event::PaymentSucceeded {
                order_id, amount, ..
            } => {
                if let Err(e) = notifier.order_confirmed(*order_id, *amount).await {
                    warn!(order_id = %order_id, error = %e, "order confirmation notification failed");
                }
                if let Err(e) = notifier.invoice_ready(*order_id).await {
                    warn!(order_id = %order_id, error = %e, "invoice notification failed");
                }
            }
            Event::PaymentFailed {
                order_id, reason, ..
            } => {
                if let Err(e) = notifier.payment_failed(*order_id, reason.as_deref()).await {
                    warn!(order_id = %order_id, error = %e, "payment failure notification failed");
                }
            }
            Event::OrderStatusChanged {
                order_id,
                new_status,
                ..
            } => {
                if let Err(e) = notifier.order_status(*order_id, new_status).await {
                    warn!(order_id = %order_id, error = %e, "status notification failed");
                }
            }
            _ => {}
        }
    }
    info!("event channel closed; event processor exiting");
}
