//! Stock reservation and release.
//!
//! Every stock mutation in the system goes through these two functions,
//! always inside the caller's transaction. Decrements and increments are
//! conditional `UPDATE`s, so the non-negative invariant holds under
//! concurrent checkouts without application-level queuing: of two carts
//! racing for the last unit, exactly one sees `rows_affected == 1`.

use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::{order, order_item, product, product_variant};
use crate::errors::ServiceError;

/// One line to reserve; mirrors an order item.
#[derive(Debug, Clone)]
pub struct ReservationLine {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub name: String,
    pub quantity: i32,
}

/// Atomically decrements stock for every line, or fails the transaction.
///
/// Each line runs `stock = stock - q WHERE stock >= q`; a miss returns
/// `InsufficientStock` and the caller's rollback undoes any lines already
/// decremented, so partial reservation is never observable.
pub async fn reserve<C: ConnectionTrait>(
    conn: &C,
    lines: &[ReservationLine],
) -> Result<(), ServiceError> {
    for line in lines {
        let rows_affected = match line.variant_id {
            Some(variant_id) => {
                product_variant::Entity::update_many()
                    .col_expr(
                        product_variant::Column::Stock,
                        Expr::col(product_variant::Column::Stock).sub(line.quantity),
                    )
                    .filter(product_variant::Column::Id.eq(variant_id))
                    .filter(product_variant::Column::Stock.gte(line.quantity))
                    .exec(conn)
                    .await?
                    .rows_affected
            }
            None => {
                product::Entity::update_many()
                    .col_expr(
                        product::Column::Stock,
                        Expr::col(product::Column::Stock).sub(line.quantity),
                    )
                    .filter(product::Column::Id.eq(line.product_id))
                    .filter(product::Column::Stock.gte(line.quantity))
                    .exec(conn)
                    .await?
                    .rows_affected
            }
        };

        if rows_affected == 0 {
            warn!(
                product_id = %line.product_id,
                quantity = line.quantity,
                "reservation failed: insufficient stock"
            );
            return Err(ServiceError::InsufficientStock(format!(
                "{} (requested {})",
                line.name, line.quantity
            )));
        }
    }
    Ok(())
}

/// Credits reserved stock back for an order, exactly once.
///
/// The `orders.stock_released` flag is compare-and-set first; if another
/// release (e.g. a duplicate failure callback) already claimed it, this is
/// a no-op and returns `false`.
pub async fn release<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    items: &[order_item::Model],
) -> Result<bool, ServiceError> {
    let claimed = order::Entity::update_many()
        .col_expr(order::Column::StockReleased, Expr::value(true))
        .filter(order::Column::Id.eq(order_id))
        .filter(order::Column::StockReleased.eq(false))
        .exec(conn)
        .await?
        .rows_affected;

    if claimed == 0 {
        info!(order_id = %order_id, "stock already released; skipping");
        return Ok(false);
    }

    for item in items {
        match item.variant_id {
            Some(variant_id) => {
                product_variant::Entity::update_many()
                    .col_expr(
                        product_variant::Column::Stock,
                        Expr::col(product_variant::Column::Stock).add(item.quantity),
                    )
                    .filter(product_variant::Column::Id.eq(variant_id))
                    .exec(conn)
                    .await?;
            }
            None => {
                product::Entity::update_many()
                    .col_expr(
                        product::Column::Stock,
                        Expr::col(product::Column::Stock).add(item.quantity),
                    )
                    .filter(product::Column::Id.eq(item.product_id))
                    .exec(conn)
                    .await?;
            }
        }
    }

    info!(order_id = %order_id, items = items.len(), "released reserved stock");
    Ok(true)
}
