//! FreshBasket API Library
//!
//! Storefront backend for a grocery-delivery service. The engineered core
//! is order checkout and payment reconciliation: server-side cart pricing,
//! transactional inventory reservation, the PayU signed-redirect adapter,
//! idempotent callback reconciliation, and the fulfillment state machine.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod notifications;
pub mod services;

use axum::{
    routing::{get, post, put},
    Router,
};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
}

/// Common query parameters for list endpoints.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_page() -> u64 {
    1
}
fn default_limit() -> u64 {
    20
}

/// Uniform success envelope.
#[derive(Serialize, utoipa::ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health_check,
        handlers::orders::create_order,
        handlers::orders::get_order,
        handlers::orders::list_orders,
        handlers::orders::cancel_order,
        handlers::payments::payment_callback,
        handlers::payments::payment_webhook,
        handlers::payments::payment_status,
        handlers::admin::update_order_status,
    ),
    components(schemas(
        errors::ErrorResponse,
        handlers::health::HealthResponse,
        handlers::orders::OrderResponse,
        handlers::orders::OrderItemResponse,
        handlers::orders::CreateOrderResponse,
        handlers::orders::OrderListResponse,
        handlers::payments::PaymentResponse,
        handlers::admin::UpdateOrderStatusRequest,
        services::orders::CreateOrderRequest,
        services::orders::CreateOrderItem,
        services::payu::RedirectPayload,
        entities::OrderStatus,
        entities::PaymentStatus,
        entities::PaymentMethod,
    )),
    tags(
        (name = "Orders", description = "Checkout and order lifecycle"),
        (name = "Payments", description = "Gateway reconciliation and payment status"),
        (name = "Admin", description = "Operator order management"),
        (name = "Health", description = "Liveness"),
    )
)]
pub struct ApiDoc;

/// Builds the application router.
pub fn app_router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/orders",
            post(handlers::orders::create_order).get(handlers::orders::list_orders),
        )
        .route("/orders/:id", get(handlers::orders::get_order))
        .route("/orders/:id/cancel", put(handlers::orders::cancel_order))
        .route(
            "/payments/callback",
            post(handlers::payments::payment_callback),
        )
        .route(
            "/payments/webhook",
            post(handlers::payments::payment_webhook),
        )
        .route(
            "/payments/status/:transaction_id",
            get(handlers::payments::payment_status),
        )
        .route(
            "/admin/orders/:id/status",
            put(handlers::admin::update_order_status),
        );

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api/v1", api)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(state)
}
