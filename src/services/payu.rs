//! PayU gateway adapter.
//!
//! Builds the signed redirect payload posted to the hosted payment page and
//! verifies the signature on everything the gateway sends back. Both hash
//! directions are SHA-512 over pipe-joined fields; field order and the
//! number of empty segments are fixed by the gateway and must match
//! byte-for-byte, or the gateway (outbound) or this service (inbound)
//! rejects the exchange.

use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectionTrait, Set};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    entities::{order, payment, PaymentStatus},
    errors::ServiceError,
    services::pricing::round_money,
};

/// Gateway credentials and endpoints.
#[derive(Debug, Clone)]
pub struct PayuConfig {
    pub merchant_key: String,
    pub merchant_salt: String,
    pub payment_url: String,
    pub verify_url: String,
    pub callback_url: String,
}

impl PayuConfig {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self {
            merchant_key: cfg.payu_merchant_key.clone(),
            merchant_salt: cfg.payu_merchant_salt.clone(),
            payment_url: cfg.payu_payment_url.clone(),
            verify_url: cfg.payu_verify_url.clone(),
            callback_url: cfg.payment_callback_url(),
        }
    }
}

/// Customer fields carried into the signed payload.
#[derive(Debug, Clone)]
pub struct CustomerContact {
    pub first_name: String,
    pub email: String,
    pub phone: String,
}

/// Fields the storefront posts to the hosted payment page.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RedirectPayload {
    pub key: String,
    pub txnid: String,
    pub amount: String,
    pub productinfo: String,
    pub firstname: String,
    pub email: String,
    pub phone: String,
    pub surl: String,
    pub furl: String,
    pub hash: String,
    pub service_provider: String,
    /// Where the browser posts this payload
    pub payment_url: String,
}

/// Form body the gateway posts to the callback and webhook routes.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GatewayCallback {
    pub status: String,
    pub txnid: String,
    pub amount: String,
    pub productinfo: String,
    pub firstname: String,
    pub email: String,
    pub hash: String,
    #[serde(default)]
    pub mihpayid: Option<String>,
    #[serde(default, rename = "error_Message")]
    pub error_message: Option<String>,
}

/// Gateway-reported outcome, parsed from the verified `status` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    Success,
    Failure,
    Pending,
}

impl GatewayStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "success" => Some(Self::Success),
            "failure" | "failed" => Some(Self::Failure),
            "pending" | "in progress" => Some(Self::Pending),
            _ => None,
        }
    }
}

/// Serializes an amount the way the gateway echoes it back: integral values
/// without decimals, fractional values with exactly two. The request hash is
/// computed over this exact string.
pub fn format_amount(amount: Decimal) -> String {
    let amount = round_money(amount);
    if amount.is_integer() {
        amount.normalize().to_string()
    } else {
        format!("{:.2}", amount)
    }
}

fn sha512_hex(input: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Request-side hash:
/// `key|txnid|amount|productinfo|firstname|email|udf1..udf5|<6 empty>|salt`.
pub fn request_hash(
    key: &str,
    salt: &str,
    txnid: &str,
    amount: &str,
    productinfo: &str,
    firstname: &str,
    email: &str,
) -> String {
    let mut fields: Vec<&str> = vec![key, txnid, amount, productinfo, firstname, email];
    // udf1..udf5, unused by this storefront, plus six reserved fields.
    fields.extend(std::iter::repeat("").take(11));
    fields.push(salt);
    sha512_hex(&fields.join("|"))
}

/// Response-side hash, the request construction reversed:
/// `salt|status|<10 empty>|email|firstname|productinfo|amount|txnid|key`.
pub fn response_hash(
    key: &str,
    salt: &str,
    status: &str,
    email: &str,
    firstname: &str,
    productinfo: &str,
    amount: &str,
    txnid: &str,
) -> String {
    let mut fields: Vec<&str> = vec![salt, status];
    fields.extend(std::iter::repeat("").take(10));
    fields.extend([email, firstname, productinfo, amount, txnid, key]);
    sha512_hex(&fields.join("|"))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

/// Gateway adapter: payment initiation and callback verification.
#[derive(Debug, Clone)]
pub struct PayuService {
    config: PayuConfig,
}

impl PayuService {
    pub fn new(config: PayuConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PayuConfig {
        &self.config
    }

    fn generate_transaction_id() -> String {
        let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
        format!("TXN{}{:06}", Utc::now().timestamp_millis(), suffix)
    }

    /// Creates the PENDING payment row and the signed redirect payload, in
    /// that order, inside the caller's transaction. The row exists before
    /// the payload can leave the building, so a callback can never arrive
    /// for an unknown transaction id on the success path.
    #[instrument(skip(self, conn, order, contact), fields(order_id = %order.id))]
    pub async fn initiate<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: &order::Model,
        contact: &CustomerContact,
    ) -> Result<(payment::Model, RedirectPayload), ServiceError> {
        let txnid = Self::generate_transaction_id();
        let amount = format_amount(order.total);

        let payment_model = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            transaction_id: Set(txnid.clone()),
            amount: Set(order.total),
            status: Set(PaymentStatus::Pending),
            gateway_txn_id: Set(None),
            gateway_response: Set(None),
            failure_reason: Set(None),
            created_at: Set(Utc::now()),
            completed_at: Set(None),
        };
        let payment_row = payment_model.insert(conn).await?;

        let hash = request_hash(
            &self.config.merchant_key,
            &self.config.merchant_salt,
            &txnid,
            &amount,
            &order.order_number,
            &contact.first_name,
            &contact.email,
        );

        info!(transaction_id = %txnid, amount = %amount, "initiated gateway payment");

        let payload = RedirectPayload {
            key: self.config.merchant_key.clone(),
            txnid,
            amount,
            productinfo: order.order_number.clone(),
            firstname: contact.first_name.clone(),
            email: contact.email.clone(),
            phone: contact.phone.clone(),
            surl: self.config.callback_url.clone(),
            furl: self.config.callback_url.clone(),
            hash,
            service_provider: "payu_paisa".to_string(),
            payment_url: self.config.payment_url.clone(),
        };

        Ok((payment_row, payload))
    }

    /// Recomputes the response-side hash and compares it constant-time
    /// against the gateway-supplied one. Any mismatch is a hard failure;
    /// the caller discards the callback without touching state.
    pub fn verify_callback(&self, callback: &GatewayCallback) -> Result<(), ServiceError> {
        let expected = response_hash(
            &self.config.merchant_key,
            &self.config.merchant_salt,
            &callback.status,
            &callback.email,
            &callback.firstname,
            &callback.productinfo,
            &callback.amount,
            &callback.txnid,
        );
        if !constant_time_eq(&expected, &callback.hash.to_ascii_lowercase()) {
            warn!(
                transaction_id = %callback.txnid,
                "gateway callback signature mismatch"
            );
            return Err(ServiceError::Unauthorized(
                "gateway signature verification failed".into(),
            ));
        }
        Ok(())
    }

    /// Hash for the server-to-server `verify_payment` command:
    /// `key|command|var1|salt`.
    pub fn verification_command_hash(&self, txnid: &str) -> String {
        sha512_hex(&format!(
            "{}|verify_payment|{}|{}",
            self.config.merchant_key, txnid, self.config.merchant_salt
        ))
    }
}
