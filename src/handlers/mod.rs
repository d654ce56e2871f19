pub mod admin;
pub mod health;
pub mod orders;
pub mod payments;

use std::sync::Arc;

use crate::{
    auth::AuthService,
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{
        order_status::OrderStatusService,
        orders::OrderService,
        payment_sweep::PaymentSweepService,
        payu::{PayuConfig, PayuService},
        pricing::PricingConfig,
        reconciliation::ReconciliationService,
    },
};

/// Services layer behind the HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub order_status: Arc<OrderStatusService>,
    pub payu: Arc<PayuService>,
    pub reconciliation: Arc<ReconciliationService>,
    pub payment_sweep: Arc<PaymentSweepService>,
    pub auth: Arc<AuthService>,
}

impl AppServices {
    pub fn new(db: Arc<DbPool>, cfg: &AppConfig, event_sender: EventSender) -> Self {
        let auth = Arc::new(AuthService::new(
            cfg.jwt_secret.clone(),
            cfg.jwt_expiration_secs,
        ));
        let payu = Arc::new(PayuService::new(PayuConfig::from_app_config(cfg)));
        let orders = Arc::new(OrderService::new(
            db.clone(),
            payu.clone(),
            PricingConfig::from_app_config(cfg),
            event_sender.clone(),
        ));
        let order_status = Arc::new(OrderStatusService::new(
            db.clone(),
            orders.clone(),
            event_sender.clone(),
        ));
        let reconciliation = Arc::new(ReconciliationService::new(
            db.clone(),
            payu.clone(),
            event_sender,
        ));
        let payment_sweep = Arc::new(PaymentSweepService::new(
            db,
            payu.clone(),
            reconciliation.clone(),
            cfg,
        ));

        Self {
            orders,
            order_status,
            payu,
            reconciliation,
            payment_sweep,
            auth,
        }
    }
}
