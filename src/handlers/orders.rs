use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    entities::{order, order_item, OrderStatus, PaymentMethod, PaymentStatus},
    errors::ServiceError,
    services::orders::CreateOrderRequest,
    services::payu::RedirectPayload,
    ApiResponse, AppState, ListQuery,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub name: String,
    pub sku: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub delivery_slot: String,
    pub coupon_code: Option<String>,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub delivery_fee: Decimal,
    pub handling_charge: Decimal,
    pub platform_fee: Decimal,
    pub gst: Decimal,
    pub total: Decimal,
    pub savings: Decimal,
    pub currency: String,
    #[schema(value_type = Object)]
    pub shipping_address: serde_json::Value,
    pub items: Vec<OrderItemResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateOrderResponse {
    pub order: OrderResponse,
    /// Present for online payment: the signed payload the client posts to
    /// the gateway's hosted page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<RedirectPayload>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

pub(crate) fn map_order(
    order_row: &order::Model,
    items: &[order_item::Model],
) -> OrderResponse {
    let shipping_address = serde_json::from_str(&order_row.shipping_address)
        .unwrap_or(serde_json::Value::Null);
    OrderResponse {
        id: order_row.id,
        order_number: order_row.order_number.clone(),
        status: order_row.status,
        payment_status: order_row.payment_status,
        payment_method: order_row.payment_method,
        delivery_slot: order_row.delivery_slot.clone(),
        coupon_code: order_row.coupon_code.clone(),
        subtotal: order_row.subtotal,
        discount: order_row.discount,
        delivery_fee: order_row.delivery_fee,
        handling_charge: order_row.handling_charge,
        platform_fee: order_row.platform_fee,
        gst: order_row.gst,
        total: order_row.total,
        savings: order_row.savings,
        currency: order_row.currency.clone(),
        shipping_address,
        items: items
            .iter()
            .map(|item| OrderItemResponse {
                id: item.id,
                product_id: item.product_id,
                variant_id: item.variant_id,
                name: item.name.clone(),
                sku: item.sku.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                line_total: item.line_total,
            })
            .collect(),
        created_at: order_row.created_at,
        updated_at: order_row.updated_at,
    }
}

/// POST /api/v1/orders
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created; redirect payload included for online payment"),
        (status = 400, description = "Empty cart, unknown product/address, or bad coupon", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let created = state.services.orders.create_order(&user, payload).await?;
    let body = CreateOrderResponse {
        order: map_order(&created.order, &created.items),
        payment: created.payment,
    };
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(body))))
}

/// GET /api/v1/orders/{id}
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order with items"),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let (order_row, items) = state.services.orders.get_order(order_id, &user).await?;
    Ok(Json(ApiResponse::ok(map_order(&order_row, &items))))
}

/// GET /api/v1/orders
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(("page" = Option<u64>, Query, description = "1-based page"), ("limit" = Option<u64>, Query, description = "page size")),
    responses((status = 200, description = "Caller's orders, newest first")),
    security(("bearer" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let (orders, total) = state
        .services
        .orders
        .list_orders(user.user_id, query.page, query.limit)
        .await?;
    let body = OrderListResponse {
        orders: orders.iter().map(|o| map_order(o, &[])).collect(),
        total,
        page: query.page,
        limit: query.limit,
    };
    Ok(Json(ApiResponse::ok(body)))
}

/// PUT /api/v1/orders/{id}/cancel
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/cancel",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order canceled and stock released"),
        (status = 400, description = "Order is past the cancellable states", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not the order owner", body = crate::errors::ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order_row = state.services.orders.cancel_order(order_id, &user).await?;
    Ok(Json(ApiResponse::ok(map_order(&order_row, &[]))))
}
