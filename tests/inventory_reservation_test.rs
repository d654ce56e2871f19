mod common;

use chrono::Utc;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set, TransactionTrait};
use uuid::Uuid;

use common::TestApp;
use freshbasket_api::entities::{order, order_item, OrderStatus, PaymentMethod, PaymentStatus};
use freshbasket_api::errors::ServiceError;
use freshbasket_api::services::inventory::{self, ReservationLine};

fn line(app: &TestApp, quantity: i32) -> ReservationLine {
    ReservationLine {
        product_id: app.bananas_id,
        variant_id: None,
        name: "Organic Bananas".to_string(),
        quantity,
    }
}

/// Inserts a bare order row so release has a flag row to claim.
async fn seed_order(app: &TestApp) -> (Uuid, Vec<order_item::Model>) {
    let now = Utc::now();
    let order_id = Uuid::new_v4();
    order::ActiveModel {
        id: Set(order_id),
        order_number: Set(format!(
            "ORD-{}",
            order_id.simple().to_string()[..8].to_uppercase()
        )),
        customer_id: Set(app.customer_id),
        status: Set(OrderStatus::Received),
        payment_status: Set(PaymentStatus::Pending),
        payment_method: Set(PaymentMethod::Cod),
        delivery_slot: Set("today-6pm-8pm".to_string()),
        coupon_code: Set(None),
        subtotal: Set(dec!(144)),
        discount: Set(dec!(0)),
        delivery_fee: Set(dec!(29)),
        handling_charge: Set(dec!(5)),
        platform_fee: Set(dec!(3)),
        gst: Set(dec!(7.20)),
        total: Set(dec!(188.20)),
        savings: Set(dec!(0)),
        currency: Set("INR".to_string()),
        shipping_address: Set("{}".to_string()),
        stock_released: Set(false),
        notes: Set(None),
        created_at: Set(now),
        updated_at: Set(Some(now)),
        version: Set(1),
    }
    .insert(&*app.state.db)
    .await
    .unwrap();

    let item = order_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        product_id: Set(app.bananas_id),
        variant_id: Set(None),
        name: Set("Organic Bananas".to_string()),
        sku: Set("FRU-BAN-1".to_string()),
        quantity: Set(3),
        unit_price: Set(dec!(48)),
        line_total: Set(dec!(144)),
        created_at: Set(now),
    }
    .insert(&*app.state.db)
    .await
    .unwrap();

    (order_id, vec![item])
}

#[tokio::test]
async fn reserve_decrements_until_stock_runs_out() {
    let app = TestApp::new().await;

    let txn = app.state.db.begin().await.unwrap();
    inventory::reserve(&txn, &[line(&app, 6)]).await.unwrap();
    inventory::reserve(&txn, &[line(&app, 4)]).await.unwrap();

    // 10 units are gone; one more unit must fail.
    let err = inventory::reserve(&txn, &[line(&app, 1)]).await.unwrap_err();
    assert!(matches!(err, ServiceError::InsufficientStock(_)));
    txn.commit().await.unwrap();

    assert_eq!(app.product_stock(app.bananas_id).await, 0);
}

#[tokio::test]
async fn failed_multi_line_reserve_rolls_back_entirely() {
    let app = TestApp::new().await;

    let txn = app.state.db.begin().await.unwrap();
    let result = inventory::reserve(
        &txn,
        &[
            line(&app, 4),
            ReservationLine {
                product_id: app.milk_id,
                variant_id: None,
                name: "Whole Milk".to_string(),
                quantity: 50,
            },
        ],
    )
    .await;
    assert!(matches!(result, Err(ServiceError::InsufficientStock(_))));
    txn.rollback().await.unwrap();

    // The bananas decrement from the first line was rolled back with it.
    assert_eq!(app.product_stock(app.bananas_id).await, 10);
    assert_eq!(app.product_stock(app.milk_id).await, 5);
}

#[tokio::test]
async fn reserve_then_release_round_trips_stock() {
    let app = TestApp::new().await;
    let (order_id, items) = seed_order(&app).await;

    let txn = app.state.db.begin().await.unwrap();
    inventory::reserve(&txn, &[line(&app, 3)]).await.unwrap();
    txn.commit().await.unwrap();
    assert_eq!(app.product_stock(app.bananas_id).await, 7);

    let txn = app.state.db.begin().await.unwrap();
    let released = inventory::release(&txn, order_id, &items).await.unwrap();
    txn.commit().await.unwrap();
    assert!(released);
    assert_eq!(app.product_stock(app.bananas_id).await, 10);
}

#[tokio::test]
async fn release_credits_exactly_once() {
    let app = TestApp::new().await;
    let (order_id, items) = seed_order(&app).await;

    let txn = app.state.db.begin().await.unwrap();
    inventory::reserve(&txn, &[line(&app, 3)]).await.unwrap();
    txn.commit().await.unwrap();

    for round in 0..3 {
        let txn = app.state.db.begin().await.unwrap();
        let released = inventory::release(&txn, order_id, &items).await.unwrap();
        txn.commit().await.unwrap();
        assert_eq!(released, round == 0, "only the first release may credit");
    }

    assert_eq!(app.product_stock(app.bananas_id).await, 10);
}

#[tokio::test]
async fn variant_reservation_leaves_the_parent_product_alone() {
    let app = TestApp::new().await;

    let txn = app.state.db.begin().await.unwrap();
    inventory::reserve(
        &txn,
        &[ReservationLine {
            product_id: app.milk_id,
            variant_id: Some(app.milk_500_id),
            name: "Whole Milk 500ml".to_string(),
            quantity: 2,
        }],
    )
    .await
    .unwrap();
    txn.commit().await.unwrap();

    assert_eq!(app.variant_stock(app.milk_500_id).await, 5);
    assert_eq!(app.product_stock(app.milk_id).await, 5);
}
