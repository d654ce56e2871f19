#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use freshbasket_api::{
    app_router,
    config::AppConfig,
    db,
    entities::{customer_address, product, product_variant},
    events::{self, EventSender},
    handlers::AppServices,
    notifications::LogNotificationService,
    services::payu,
    AppState,
};

pub const CUSTOMER_EMAIL: &str = "asha@example.com";
pub const CUSTOMER_NAME: &str = "Asha Rao";

/// Test harness: app state over a fresh in-memory SQLite database, seeded
/// with a small catalog and one delivery address.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub customer_id: Uuid,
    pub admin_id: Uuid,
    pub customer_token: String,
    pub admin_token: String,
    pub address_id: Uuid,
    /// "Organic Bananas", price 48, stock 10
    pub bananas_id: Uuid,
    /// "Paneer", price 125, stock 10
    pub paneer_id: Uuid,
    /// "Whole Milk", price 60, stock 5
    pub milk_id: Uuid,
    /// Milk "500ml" variant, price 32, stock 7
    pub milk_500_id: Uuid,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::new_with_config(|_| {}).await
    }

    /// Like `new`, with a hook to adjust the configuration first (e.g. to
    /// point the gateway verify URL at a mock server).
    pub async fn new_with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "test_secret_key_for_testing_purposes_only_32chars".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        adjust(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(64);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(
            event_rx,
            Arc::new(LogNotificationService::new()),
        ));

        let services = AppServices::new(db.clone(), &cfg, event_sender.clone());
        let customer_id = Uuid::new_v4();
        let admin_id = Uuid::new_v4();
        let customer_token = services
            .auth
            .issue_token(
                customer_id,
                Some(CUSTOMER_EMAIL),
                Some(CUSTOMER_NAME),
                &["customer"],
            )
            .expect("failed to issue customer token");
        let admin_token = services
            .auth
            .issue_token(admin_id, Some("ops@freshbasket.in"), Some("Ops"), &["admin"])
            .expect("failed to issue admin token");

        let state = AppState {
            db: db.clone(),
            config: cfg,
            event_sender,
            services,
        };
        let router = app_router(state.clone());

        let mut app = Self {
            router,
            state,
            customer_id,
            admin_id,
            customer_token,
            admin_token,
            address_id: Uuid::new_v4(),
            bananas_id: Uuid::new_v4(),
            paneer_id: Uuid::new_v4(),
            milk_id: Uuid::new_v4(),
            milk_500_id: Uuid::new_v4(),
            _event_task: event_task,
        };
        app.seed().await;
        app
    }

    async fn seed(&mut self) {
        let now = Utc::now();
        let db = &*self.state.db;

        for (id, name, sku, price, stock) in [
            (self.bananas_id, "Organic Bananas", "FRU-BAN-1", dec!(48), 10),
            (self.paneer_id, "Paneer", "DAI-PAN-200", dec!(125), 10),
            (self.milk_id, "Whole Milk", "DAI-MLK-1L", dec!(60), 5),
        ] {
            product::ActiveModel {
                id: Set(id),
                name: Set(name.to_string()),
                sku: Set(sku.to_string()),
                price: Set(price),
                stock: Set(stock),
                is_active: Set(true),
                created_at: Set(now),
                updated_at: Set(Some(now)),
            }
            .insert(db)
            .await
            .expect("failed to seed product");
        }

        product_variant::ActiveModel {
            id: Set(self.milk_500_id),
            product_id: Set(self.milk_id),
            name: Set("500ml".to_string()),
            sku: Set("DAI-MLK-500".to_string()),
            price: Set(dec!(32)),
            stock: Set(7),
            position: Set(1),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(db)
        .await
        .expect("failed to seed variant");

        customer_address::ActiveModel {
            id: Set(self.address_id),
            customer_id: Set(self.customer_id),
            line1: Set("14 Lake View Road".to_string()),
            line2: Set(None),
            city: Set("Bengaluru".to_string()),
            state: Set("Karnataka".to_string()),
            postal_code: Set("560001".to_string()),
            phone: Set("9876543210".to_string()),
            created_at: Set(now),
        }
        .insert(db)
        .await
        .expect("failed to seed address");
    }

    /// Sends a JSON request through the router and returns status + body.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("request failed");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::String(
                String::from_utf8_lossy(&bytes).into_owned(),
            ))
        };
        (status, value)
    }

    /// Posts a form-encoded body (the gateway's content type).
    pub async fn post_form<K: AsRef<str>, V: AsRef<str>>(
        &self,
        uri: &str,
        fields: &[(K, V)],
    ) -> (StatusCode, String) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(form_encode(fields)))
            .unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("request failed");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Creates an order through the API; panics on non-201.
    pub async fn create_order(&self, body: Value) -> Value {
        let (status, response) = self
            .request(
                Method::POST,
                "/api/v1/orders",
                Some(&self.customer_token),
                Some(body),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "order creation failed: {response}");
        response["data"].clone()
    }

    /// Builds a correctly signed gateway callback form for an order created
    /// through this app's payment config.
    pub fn signed_callback(
        &self,
        status: &str,
        txnid: &str,
        amount: &str,
        order_number: &str,
    ) -> Vec<(String, String)> {
        let firstname = CUSTOMER_NAME.split_whitespace().next().unwrap();
        let hash = payu::response_hash(
            &self.state.config.payu_merchant_key,
            &self.state.config.payu_merchant_salt,
            status,
            CUSTOMER_EMAIL,
            firstname,
            order_number,
            amount,
            txnid,
        );
        vec![
            ("status".to_string(), status.to_string()),
            ("txnid".to_string(), txnid.to_string()),
            ("amount".to_string(), amount.to_string()),
            ("productinfo".to_string(), order_number.to_string()),
            ("firstname".to_string(), firstname.to_string()),
            ("email".to_string(), CUSTOMER_EMAIL.to_string()),
            ("hash".to_string(), hash),
            ("mihpayid".to_string(), "403993715521".to_string()),
        ]
    }

    pub async fn product_stock(&self, product_id: Uuid) -> i32 {
        product::Entity::find_by_id(product_id)
            .one(&*self.state.db)
            .await
            .unwrap()
            .expect("product missing")
            .stock
    }

    pub async fn variant_stock(&self, variant_id: Uuid) -> i32 {
        product_variant::Entity::find_by_id(variant_id)
            .one(&*self.state.db)
            .await
            .unwrap()
            .expect("variant missing")
            .stock
    }
}

/// Minimal x-www-form-urlencoded encoder for test bodies.
pub fn form_encode<K: AsRef<str>, V: AsRef<str>>(fields: &[(K, V)]) -> String {
    fn encode(value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        for byte in value.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                    out.push(byte as char)
                }
                b' ' => out.push('+'),
                _ => out.push_str(&format!("%{byte:02X}")),
            }
        }
        out
    }
    fields
        .iter()
        .map(|(k, v)| format!("{}={}", encode(k.as_ref()), encode(v.as_ref())))
        .collect::<Vec<_>>()
        .join("&")
}

/// Parses a Decimal out of a JSON value that may be a string or number.
pub fn decimal_of(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("not a decimal string"),
        Value::Number(n) => n.to_string().parse().expect("not a decimal number"),
        other => panic!("expected decimal, got {other}"),
    }
}
