//! Gateway callback reconciliation.
//!
//! One state machine per transaction id. Every mutation is conditioned on
//! `payments.status = 'pending'` with a conditional UPDATE, so the gateway
//! may deliver the same callback any number of times (callback and webhook
//! race, webhook retries) and only the first verified delivery has an
//! effect. Payment update, order update, and stock release commit in a
//! single transaction: a crash mid-reconciliation leaves the triple in the
//! pre- or post-state, never a mix.

use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::{
    entities::{order, order_item, payment, OrderStatus, PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        inventory,
        payu::{format_amount, GatewayCallback, GatewayStatus, PayuService},
    },
};

/// What a delivery did to the payment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationOutcome {
    /// Payment confirmed; order stands.
    Confirmed,
    /// Payment failed; order canceled and stock released.
    Failed,
    /// Gateway still processing; raw response recorded, no state change.
    StillPending,
    /// Transaction already settled; delivery absorbed.
    Duplicate,
}

#[derive(Clone)]
pub struct ReconciliationService {
    db: Arc<DatabaseConnection>,
    payu: Arc<PayuService>,
    event_sender: EventSender,
}

impl ReconciliationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        payu: Arc<PayuService>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            db,
            payu,
            event_sender,
        }
    }

    /// Entry point for the callback and webhook routes. Verifies the
    /// signature before anything else; a tampered payload is discarded
    /// without touching state.
    #[instrument(skip(self, callback), fields(transaction_id = %callback.txnid))]
    pub async fn process_callback(
        &self,
        callback: &GatewayCallback,
    ) -> Result<ReconciliationOutcome, ServiceError> {
        self.payu.verify_callback(callback)?;

        let status = GatewayStatus::parse(&callback.status).ok_or_else(|| {
            warn!(status = %callback.status, "gateway callback carried unknown status");
            ServiceError::ValidationError(format!(
                "unknown gateway status: {}",
                callback.status
            ))
        })?;

        let raw = serde_json::to_string(callback)?;
        self.apply_gateway_status(
            &callback.txnid,
            status,
            callback.mihpayid.clone(),
            callback.error_message.clone(),
            raw,
            Some(&callback.amount),
        )
        .await
    }

    /// Applies a verified gateway verdict to the payment/order/stock triple.
    /// Shared by the callback path and the stale-payment sweep.
    pub async fn apply_gateway_status(
        &self,
        transaction_id: &str,
        status: GatewayStatus,
        gateway_txn_id: Option<String>,
        failure_reason: Option<String>,
        raw_response: String,
        echoed_amount: Option<&str>,
    ) -> Result<ReconciliationOutcome, ServiceError> {
        let txn = self.db.begin().await?;

        let payment_row = payment::Entity::find()
            .filter(payment::Column::TransactionId.eq(transaction_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                warn!(transaction_id, "callback for unknown transaction id");
                ServiceError::NotFound(format!("payment {} not found", transaction_id))
            })?;

        // Short-circuit for already-settled transactions; no mutation.
        if payment_row.status != PaymentStatus::Pending {
            info!(
                transaction_id,
                status = payment_row.status.as_str(),
                "duplicate gateway delivery absorbed"
            );
            return Ok(ReconciliationOutcome::Duplicate);
        }

        // The hash covers the amount, so a mismatch here means the gateway
        // settled a different figure than we quoted. Park it for manual
        // review rather than confirming the order.
        if let Some(echoed) = echoed_amount {
            if echoed != format_amount(payment_row.amount) {
                warn!(
                    transaction_id,
                    expected = %format_amount(payment_row.amount),
                    echoed,
                    "gateway echoed a different amount than initiated"
                );
                return Err(ServiceError::ValidationError(
                    "gateway amount does not match initiated amount".into(),
                ));
            }
        }

        let outcome = match status {
            GatewayStatus::Pending => {
                payment::Entity::update_many()
                    .col_expr(
                        payment::Column::GatewayResponse,
                        Expr::value(Some(raw_response)),
                    )
                    .filter(payment::Column::Id.eq(payment_row.id))
                    .filter(payment::Column::Status.eq(PaymentStatus::Pending))
                    .exec(&txn)
                    .await?;
                txn.commit().await?;
                info!(transaction_id, "gateway still processing; response recorded");
                return Ok(ReconciliationOutcome::StillPending);
            }
            GatewayStatus::Success => {
                let claimed = payment::Entity::update_many()
                    .col_expr(payment::Column::Status, Expr::value(PaymentStatus::Paid))
                    .col_expr(
                        payment::Column::GatewayTxnId,
                        Expr::value(gateway_txn_id.clone()),
                    )
                    .col_expr(
                        payment::Column::GatewayResponse,
                        Expr::value(Some(raw_response)),
                    )
                    .col_expr(
                        payment::Column::CompletedAt,
                        Expr::value(Some(chrono::Utc::now())),
                    )
                    .filter(payment::Column::Id.eq(payment_row.id))
                    .filter(payment::Column::Status.eq(PaymentStatus::Pending))
                    .exec(&txn)
                    .await?
                    .rows_affected;
                if claimed == 0 {
                    return Ok(ReconciliationOutcome::Duplicate);
                }

                let order_row = order::Entity::find_by_id(payment_row.order_id)
                    .one(&txn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!(
                            "order {} for payment {}",
                            payment_row.order_id, transaction_id
                        ))
                    })?;

                if order_row.status == OrderStatus::Canceled {
                    // Customer canceled while the gateway settled; the money
                    // was captured but stock is gone. Flag for a refund.
                    warn!(
                        transaction_id,
                        order_id = %order_row.id,
                        "payment captured for a canceled order; refund required"
                    );
                } else {
                    order::Entity::update_many()
                        .col_expr(
                            order::Column::PaymentStatus,
                            Expr::value(PaymentStatus::Paid),
                        )
                        .col_expr(
                            order::Column::UpdatedAt,
                            Expr::value(Some(chrono::Utc::now())),
                        )
                        .col_expr(
                            order::Column::Version,
                            Expr::col(order::Column::Version).add(1),
                        )
                        .filter(order::Column::Id.eq(order_row.id))
                        .exec(&txn)
                        .await?;
                }

                txn.commit().await?;
                info!(transaction_id, order_id = %payment_row.order_id, "payment confirmed");

                if let Err(e) = self
                    .event_sender
                    .send(Event::PaymentSucceeded {
                        order_id: payment_row.order_id,
                        payment_id: payment_row.id,
                        amount: payment_row.amount,
                    })
                    .await
                {
                    warn!(error = %e, "failed to emit payment succeeded event");
                }
                ReconciliationOutcome::Confirmed
            }
            GatewayStatus::Failure => {
                let reason = failure_reason
                    .clone()
                    .unwrap_or_else(|| "payment declined by gateway".to_string());
                let claimed = payment::Entity::update_many()
                    .col_expr(payment::Column::Status, Expr::value(PaymentStatus::Failed))
                    .col_expr(
                        payment::Column::GatewayTxnId,
                        Expr::value(gateway_txn_id.clone()),
                    )
                    .col_expr(
                        payment::Column::GatewayResponse,
                        Expr::value(Some(raw_response)),
                    )
                    .col_expr(
                        payment::Column::FailureReason,
                        Expr::value(Some(reason.clone())),
                    )
                    .col_expr(
                        payment::Column::CompletedAt,
                        Expr::value(Some(chrono::Utc::now())),
                    )
                    .filter(payment::Column::Id.eq(payment_row.id))
                    .filter(payment::Column::Status.eq(PaymentStatus::Pending))
                    .exec(&txn)
                    .await?
                    .rows_affected;
                if claimed == 0 {
                    return Ok(ReconciliationOutcome::Duplicate);
                }

                let items = order_item::Entity::find()
                    .filter(order_item::Column::OrderId.eq(payment_row.order_id))
                    .all(&txn)
                    .await?;
                let released = inventory::release(&txn, payment_row.order_id, &items).await?;

                order::Entity::update_many()
                    .col_expr(order::Column::Status, Expr::value(OrderStatus::Canceled))
                    .col_expr(
                        order::Column::PaymentStatus,
                        Expr::value(PaymentStatus::Failed),
                    )
                    .col_expr(
                        order::Column::UpdatedAt,
                        Expr::value(Some(chrono::Utc::now())),
                    )
                    .col_expr(
                        order::Column::Version,
                        Expr::col(order::Column::Version).add(1),
                    )
                    .filter(order::Column::Id.eq(payment_row.order_id))
                    .exec(&txn)
                    .await?;

                txn.commit().await?;
                info!(
                    transaction_id,
                    order_id = %payment_row.order_id,
                    reason = %reason,
                    "payment failed; order canceled"
                );

                if let Err(e) = self
                    .event_sender
                    .send(Event::PaymentFailed {
                        order_id: payment_row.order_id,
                        payment_id: payment_row.id,
                        reason: Some(reason),
                    })
                    .await
                {
                    warn!(error = %e, "failed to emit payment failed event");
                }
                if released {
                    let _ = self
                        .event_sender
                        .send(Event::StockReleased(payment_row.order_id))
                        .await;
                }
                ReconciliationOutcome::Failed
            }
        };

        Ok(outcome)
    }

    /// Snapshot lookup for the payment status endpoint. Returns the payment
    /// together with its order so the handler can enforce ownership.
    pub async fn get_payment(
        &self,
        transaction_id: &str,
    ) -> Result<(payment::Model, order::Model), ServiceError> {
        let payment_row = payment::Entity::find()
            .filter(payment::Column::TransactionId.eq(transaction_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("payment {} not found", transaction_id))
            })?;
        let order_row = order::Entity::find_by_id(payment_row.order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("order {} not found", payment_row.order_id))
            })?;
        Ok((payment_row, order_row))
    }
}
