//! Order ledger.
//!
//! Creation reprices the cart server-side from the catalog, snapshots the
//! address and unit prices, and reserves stock, all in one transaction.
//! The recomputed total, never a client-submitted figure, is what gets
//! signed and sent to the gateway.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::AuthUser,
    entities::{
        customer_address, order, order_item, product, product_variant, OrderStatus, PaymentMethod,
        PaymentStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        inventory::{self, ReservationLine},
        payu::{CustomerContact, PayuService, RedirectPayload},
        pricing::{self, CartLine, CatalogEntry, PricingCatalog, PricingConfig},
    },
};

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, message = "Order must contain at least one item"))]
    pub items: Vec<CreateOrderItem>,
    pub address_id: Uuid,
    #[validate(length(min = 1, message = "Delivery slot is required"))]
    pub delivery_slot: String,
    pub payment_method: PaymentMethod,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateOrderItem {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

/// Address fields frozen into the order at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressSnapshot {
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub phone: String,
}

impl From<&customer_address::Model> for AddressSnapshot {
    fn from(model: &customer_address::Model) -> Self {
        Self {
            line1: model.line1.clone(),
            line2: model.line2.clone(),
            city: model.city.clone(),
            state: model.state.clone(),
            postal_code: model.postal_code.clone(),
            phone: model.phone.clone(),
        }
    }
}

/// Result of order creation; the redirect payload is present for online
/// payments only.
pub struct CreatedOrder {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    pub payment: Option<RedirectPayload>,
}

/// Flat discounts for the currently running promotions. Promotion
/// management is out of scope; codes are settled here at order time and the
/// resolved amount is snapshotted onto the order.
const ACTIVE_COUPONS: &[(&str, Decimal)] = &[("WELCOME50", dec!(50)), ("SAVE20", dec!(20))];

fn resolve_coupon(code: &str) -> Result<Decimal, ServiceError> {
    let normalized = code.trim().to_ascii_uppercase();
    ACTIVE_COUPONS
        .iter()
        .find(|(c, _)| *c == normalized)
        .map(|(_, amount)| *amount)
        .ok_or_else(|| ServiceError::ValidationError(format!("unknown coupon code: {code}")))
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    payu: Arc<PayuService>,
    pricing: PricingConfig,
    event_sender: EventSender,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        payu: Arc<PayuService>,
        pricing: PricingConfig,
        event_sender: EventSender,
    ) -> Self {
        Self {
            db,
            payu,
            pricing,
            event_sender,
        }
    }

    /// Creates an order: price → snapshot → reserve → (initiate payment),
    /// all inside one transaction.
    #[instrument(skip(self, request, actor), fields(customer_id = %actor.user_id))]
    pub async fn create_order(
        &self,
        actor: &AuthUser,
        request: CreateOrderRequest,
    ) -> Result<CreatedOrder, ServiceError> {
        request.validate()?;
        for item in &request.items {
            item.validate()?;
        }

        let discount = match &request.coupon_code {
            Some(code) => resolve_coupon(code)?,
            None => Decimal::ZERO,
        };

        let db = &*self.db;

        let address = customer_address::Entity::find_by_id(request.address_id)
            .filter(customer_address::Column::CustomerId.eq(actor.user_id))
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "unknown address {} for customer",
                    request.address_id
                ))
            })?;

        let (catalog, lines) = self.load_catalog(&request.items).await?;
        let priced = pricing::price(&self.pricing, &lines, &catalog, discount)?;

        if request.payment_method == PaymentMethod::Online && actor.email.is_none() {
            return Err(ServiceError::ValidationError(
                "an email address is required for online payment".into(),
            ));
        }

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order_number = format!(
            "ORD-{}",
            order_id.simple().to_string()[..8].to_uppercase()
        );
        let snapshot = AddressSnapshot::from(&address);

        let txn = db.begin().await?;

        let order_model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            customer_id: Set(actor.user_id),
            status: Set(OrderStatus::Received),
            payment_status: Set(PaymentStatus::Pending),
            payment_method: Set(request.payment_method),
            delivery_slot: Set(request.delivery_slot.clone()),
            coupon_code: Set(request.coupon_code.clone()),
            subtotal: Set(priced.subtotal),
            discount: Set(priced.discount),
            delivery_fee: Set(priced.delivery_fee),
            handling_charge: Set(priced.handling_charge),
            platform_fee: Set(priced.platform_fee),
            gst: Set(priced.gst),
            total: Set(priced.total),
            savings: Set(priced.savings),
            currency: Set("INR".to_string()),
            shipping_address: Set(serde_json::to_string(&snapshot)?),
            stock_released: Set(false),
            notes: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        };
        let order_row = order_model.insert(&txn).await?;

        let mut item_rows = Vec::with_capacity(priced.lines.len());
        for line in &priced.lines {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                variant_id: Set(line.variant_id),
                name: Set(line.name.clone()),
                sku: Set(line.sku.clone()),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                line_total: Set(line.line_total),
                created_at: Set(now),
            };
            item_rows.push(item.insert(&txn).await?);
        }

        // Transactional re-check of the fail-fast stock validation done by
        // the pricing engine; this one is authoritative.
        let reservation: Vec<ReservationLine> = priced
            .lines
            .iter()
            .map(|line| ReservationLine {
                product_id: line.product_id,
                variant_id: line.variant_id,
                name: line.name.clone(),
                quantity: line.quantity,
            })
            .collect();
        inventory::reserve(&txn, &reservation).await?;

        let payment_payload = if request.payment_method == PaymentMethod::Online {
            let contact = CustomerContact {
                first_name: actor.first_name(),
                email: actor.email.clone().unwrap_or_default(),
                phone: address.phone.clone(),
            };
            let (payment_row, payload) = self.payu.initiate(&txn, &order_row, &contact).await?;
            Some((payment_row, payload))
        } else {
            None
        };

        txn.commit().await?;

        info!(
            order_id = %order_id,
            order_number = %order_number,
            total = %priced.total,
            method = request.payment_method.as_str(),
            "order created"
        );

        if let Err(e) = self.event_sender.send(Event::OrderCreated(order_id)).await {
            warn!(error = %e, order_id = %order_id, "failed to emit order created event");
        }
        let payment = match payment_payload {
            Some((payment_row, payload)) => {
                if let Err(e) = self
                    .event_sender
                    .send(Event::PaymentInitiated {
                        order_id,
                        transaction_id: payment_row.transaction_id.clone(),
                        amount: payment_row.amount,
                    })
                    .await
                {
                    warn!(error = %e, "failed to emit payment initiated event");
                }
                Some(payload)
            }
            None => None,
        };

        Ok(CreatedOrder {
            order: order_row,
            items: item_rows,
            payment,
        })
    }

    /// Resolves every cart line against the live catalog, building the
    /// snapshot the pricing engine runs on. Any unresolved id fails the
    /// whole request before anything is persisted.
    async fn load_catalog(
        &self,
        items: &[CreateOrderItem],
    ) -> Result<(PricingCatalog, Vec<CartLine>), ServiceError> {
        let db = &*self.db;
        let mut catalog = PricingCatalog::new();
        let mut lines = Vec::with_capacity(items.len());

        for item in items {
            let product_row = product::Entity::find_by_id(item.product_id)
                .one(db)
                .await?
                .filter(|p| p.is_active)
                .ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "unknown product {} in cart",
                        item.product_id
                    ))
                })?;

            let entry = match item.variant_id {
                Some(variant_id) => {
                    let variant_row = product_variant::Entity::find_by_id(variant_id)
                        .filter(product_variant::Column::ProductId.eq(item.product_id))
                        .one(db)
                        .await?
                        .ok_or_else(|| {
                            ServiceError::ValidationError(format!(
                                "unknown variant {} for product {}",
                                variant_id, item.product_id
                            ))
                        })?;
                    CatalogEntry {
                        name: format!("{} {}", product_row.name, variant_row.name),
                        sku: variant_row.sku,
                        unit_price: variant_row.price,
                        stock: variant_row.stock,
                    }
                }
                None => CatalogEntry {
                    name: product_row.name.clone(),
                    sku: product_row.sku.clone(),
                    unit_price: product_row.price,
                    stock: product_row.stock,
                },
            };

            catalog.insert(item.product_id, item.variant_id, entry);
            lines.push(CartLine {
                product_id: item.product_id,
                variant_id: item.variant_id,
                quantity: item.quantity,
            });
        }

        Ok((catalog, lines))
    }

    /// Cancels an order. Legal only while it is still `received` or
    /// `packing`; releases reserved stock exactly once.
    #[instrument(skip(self, actor), fields(order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        actor: &AuthUser,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let order_row = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {} not found", order_id)))?;

        if order_row.customer_id != actor.user_id && !actor.is_admin() {
            return Err(ServiceError::Forbidden(
                "only the order owner may cancel it".into(),
            ));
        }

        if !matches!(
            order_row.status,
            OrderStatus::Received | OrderStatus::Packing
        ) {
            return Err(ServiceError::InvalidOperation(format!(
                "invalid state transition: cannot cancel a {} order",
                order_row.status.as_str()
            )));
        }

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;
        let released = inventory::release(&txn, order_id, &items).await?;

        let old_status = order_row.status;
        let mut active: order::ActiveModel = order_row.into();
        active.status = Set(OrderStatus::Canceled);
        active.updated_at = Set(Some(Utc::now()));
        let version = *active.version.as_ref();
        active.version = Set(version + 1);
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        info!(
            order_id = %order_id,
            old_status = old_status.as_str(),
            "order canceled"
        );
        if let Err(e) = self.event_sender.send(Event::OrderCancelled(order_id)).await {
            warn!(error = %e, "failed to emit order cancelled event");
        }
        if released {
            let _ = self.event_sender.send(Event::StockReleased(order_id)).await;
        }

        Ok(updated)
    }

    /// Fetches an order with its items, enforcing ownership.
    #[instrument(skip(self, actor), fields(order_id = %order_id))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
        actor: &AuthUser,
    ) -> Result<(order::Model, Vec<order_item::Model>), ServiceError> {
        let order_row = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {} not found", order_id)))?;

        if order_row.customer_id != actor.user_id && !actor.is_admin() {
            return Err(ServiceError::Forbidden(
                "only the order owner may view it".into(),
            ));
        }

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;
        Ok((order_row, items))
    }

    /// Lists the caller's orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        customer_id: Uuid,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        if page == 0 {
            return Err(ServiceError::ValidationError(
                "page number must be greater than 0".into(),
            ));
        }
        let paginator = order::Entity::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, limit.clamp(1, 100));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page - 1).await?;
        Ok((orders, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_coupons_resolve_case_insensitively() {
        assert_eq!(resolve_coupon("welcome50").unwrap(), dec!(50));
        assert_eq!(resolve_coupon(" SAVE20 ").unwrap(), dec!(20));
    }

    #[test]
    fn unknown_coupons_are_rejected() {
        assert!(matches!(
            resolve_coupon("EXPIRED99"),
            Err(ServiceError::ValidationError(_))
        ));
    }
}
