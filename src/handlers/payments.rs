use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Form, Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::payu::GatewayCallback,
    ApiResponse, AppState,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub order_id: Uuid,
    pub transaction_id: String,
    pub amount: Decimal,
    pub status: crate::entities::PaymentStatus,
    pub gateway_txn_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Shared body for the callback and webhook routes. The gateway hash is the
/// only authentication; verification failures and duplicates are absorbed
/// with a 200 so neither the payer's browser nor the gateway's retry loop
/// learns anything, while genuine infrastructure errors surface as 5xx so
/// the gateway retries the webhook.
async fn handle_gateway_delivery(
    state: &AppState,
    source: &str,
    callback: GatewayCallback,
) -> Result<impl IntoResponse, ServiceError> {
    match state
        .services
        .reconciliation
        .process_callback(&callback)
        .await
    {
        Ok(outcome) => {
            tracing::info!(
                source,
                transaction_id = %callback.txnid,
                ?outcome,
                "gateway delivery processed"
            );
            Ok((StatusCode::OK, "ok"))
        }
        Err(
            err @ (ServiceError::Unauthorized(_)
            | ServiceError::ValidationError(_)
            | ServiceError::NotFound(_)),
        ) => {
            warn!(
                source,
                transaction_id = %callback.txnid,
                error = %err,
                "gateway delivery discarded"
            );
            Ok((StatusCode::OK, "ok"))
        }
        Err(err) => Err(err),
    }
}

/// POST /api/v1/payments/callback
#[utoipa::path(
    post,
    path = "/api/v1/payments/callback",
    responses((status = 200, description = "Delivery processed or discarded")),
    tag = "Payments"
)]
pub async fn payment_callback(
    State(state): State<AppState>,
    Form(callback): Form<GatewayCallback>,
) -> Result<impl IntoResponse, ServiceError> {
    handle_gateway_delivery(&state, "callback", callback).await
}

/// POST /api/v1/payments/webhook
///
/// Catches callbacks missed due to client-side redirect failures; same
/// verification and idempotent handling as the callback route.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    responses((status = 200, description = "Delivery processed or discarded")),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    Form(callback): Form<GatewayCallback>,
) -> Result<impl IntoResponse, ServiceError> {
    handle_gateway_delivery(&state, "webhook", callback).await
}

/// GET /api/v1/payments/status/{transaction_id}
#[utoipa::path(
    get,
    path = "/api/v1/payments/status/{transaction_id}",
    params(("transaction_id" = String, Path, description = "Transaction id issued at initiation")),
    responses(
        (status = 200, description = "Payment snapshot", body = PaymentResponse),
        (status = 404, description = "Unknown transaction", body = crate::errors::ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "Payments"
)]
pub async fn payment_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(transaction_id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let (payment_row, order_row) = state
        .services
        .reconciliation
        .get_payment(&transaction_id)
        .await?;

    if order_row.customer_id != user.user_id && !user.is_admin() {
        return Err(ServiceError::Forbidden(
            "only the order owner may view this payment".into(),
        ));
    }

    Ok(Json(ApiResponse::ok(PaymentResponse {
        id: payment_row.id,
        order_id: payment_row.order_id,
        transaction_id: payment_row.transaction_id,
        amount: payment_row.amount,
        status: payment_row.status,
        gateway_txn_id: payment_row.gateway_txn_id,
        failure_reason: payment_row.failure_reason,
        created_at: payment_row.created_at,
        completed_at: payment_row.completed_at,
    })))
}
