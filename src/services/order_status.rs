//! Fulfillment state machine.
//!
//! `received → packing → on_the_way → delivered`, with cancellation
//! possible from the first two states only. `delivered` and `canceled` are
//! terminal. Requests outside the table fail with an explicit invalid
//! transition error and leave state untouched; there is no coercion to a
//! nearest legal state.

use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set, TransactionTrait};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    entities::{order, OrderStatus, PaymentMethod, PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    services::orders::OrderService,
};

/// Legal fulfillment transitions.
pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
    matches!(
        (from, to),
        (OrderStatus::Received, OrderStatus::Packing)
            | (OrderStatus::Packing, OrderStatus::OnTheWay)
            | (OrderStatus::OnTheWay, OrderStatus::Delivered)
            | (OrderStatus::Received, OrderStatus::Canceled)
            | (OrderStatus::Packing, OrderStatus::Canceled)
    )
}

#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DatabaseConnection>,
    orders: Arc<OrderService>,
    event_sender: EventSender,
}

impl OrderStatusService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        orders: Arc<OrderService>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            db,
            orders,
            event_sender,
        }
    }

    /// Applies an operator-requested transition.
    ///
    /// Cancellation routes through the order service so stock release stays
    /// paired with the cancel. Delivery of a cash-on-delivery order settles
    /// its payment status.
    #[instrument(skip(self, actor), fields(order_id = %order_id, new_status = new_status.as_str()))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
        actor: &AuthUser,
    ) -> Result<order::Model, ServiceError> {
        if new_status == OrderStatus::Canceled {
            return self.orders.cancel_order(order_id, actor).await;
        }

        let txn = self.db.begin().await?;

        let order_row = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {} not found", order_id)))?;

        let old_status = order_row.status;
        if !is_valid_transition(old_status, new_status) {
            warn!(
                from = old_status.as_str(),
                to = new_status.as_str(),
                "rejected invalid status transition"
            );
            return Err(ServiceError::InvalidOperation(format!(
                "invalid state transition: {} -> {}",
                old_status.as_str(),
                new_status.as_str()
            )));
        }

        let settles_cod = new_status == OrderStatus::Delivered
            && order_row.payment_method == PaymentMethod::Cod
            && order_row.payment_status == PaymentStatus::Pending;

        let mut active: order::ActiveModel = order_row.into();
        active.status = Set(new_status);
        if settles_cod {
            active.payment_status = Set(PaymentStatus::Paid);
        }
        active.updated_at = Set(Some(Utc::now()));
        let version = *active.version.as_ref();
        active.version = Set(version + 1);
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        info!(
            old_status = old_status.as_str(),
            new_status = new_status.as_str(),
            settled_cod = settles_cod,
            "order status updated"
        );
        if let Err(e) = self
            .event_sender
            .send(Event::OrderStatusChanged {
                order_id,
                old_status: old_status.as_str().to_string(),
                new_status: new_status.as_str().to_string(),
            })
            .await
        {
            warn!(error = %e, "failed to emit status changed event");
        }

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_forward_only() {
        assert!(is_valid_transition(
            OrderStatus::Received,
            OrderStatus::Packing
        ));
        assert!(is_valid_transition(
            OrderStatus::Packing,
            OrderStatus::OnTheWay
        ));
        assert!(is_valid_transition(
            OrderStatus::OnTheWay,
            OrderStatus::Delivered
        ));
        // No skipping ahead or moving backwards.
        assert!(!is_valid_transition(
            OrderStatus::Received,
            OrderStatus::OnTheWay
        ));
        assert!(!is_valid_transition(
            OrderStatus::OnTheWay,
            OrderStatus::Packing
        ));
        assert!(!is_valid_transition(
            OrderStatus::Received,
            OrderStatus::Delivered
        ));
    }

    #[test]
    fn cancellation_is_only_legal_early() {
        assert!(is_valid_transition(
            OrderStatus::Received,
            OrderStatus::Canceled
        ));
        assert!(is_valid_transition(
            OrderStatus::Packing,
            OrderStatus::Canceled
        ));
        assert!(!is_valid_transition(
            OrderStatus::OnTheWay,
            OrderStatus::Canceled
        ));
        assert!(!is_valid_transition(
            OrderStatus::Delivered,
            OrderStatus::Canceled
        ));
    }

    #[test]
    fn terminal_states_admit_nothing() {
        for to in [
            OrderStatus::Received,
            OrderStatus::Packing,
            OrderStatus::OnTheWay,
            OrderStatus::Delivered,
            OrderStatus::Canceled,
        ] {
            assert!(!is_valid_transition(OrderStatus::Delivered, to));
            assert!(!is_valid_transition(OrderStatus::Canceled, to));
        }
    }

    #[test]
    fn same_state_transitions_are_rejected() {
        for status in [
            OrderStatus::Received,
            OrderStatus::Packing,
            OrderStatus::OnTheWay,
        ] {
            assert!(!is_valid_transition(status, status));
        }
    }
}
