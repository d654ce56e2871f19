//! Stale-payment sweep.
//!
//! A checkout abandoned after redirect leaves its payment PENDING and its
//! stock reserved forever, since no callback ever arrives. This task
//! periodically polls the gateway's verify endpoint for payments pending
//! past the timeout window and resolves them through the same
//! reconciliation path the callbacks use. A payment is never failed without
//! a gateway verdict; an unreachable gateway just defers to the next tick.

use chrono::{Duration, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::{
    config::AppConfig,
    entities::{payment, PaymentStatus},
    errors::ServiceError,
    services::{
        payu::{GatewayStatus, PayuService},
        reconciliation::{ReconciliationOutcome, ReconciliationService},
    },
};

const SWEEP_BATCH_SIZE: u64 = 50;

/// Counts from one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub confirmed: usize,
    pub failed: usize,
    pub still_pending: usize,
    pub errors: usize,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    status: i64,
    #[serde(default)]
    transaction_details: HashMap<String, TransactionDetail>,
}

#[derive(Debug, Deserialize)]
struct TransactionDetail {
    status: String,
    #[serde(default)]
    mihpayid: Option<String>,
    #[serde(default, rename = "error_Message")]
    error_message: Option<String>,
}

#[derive(Clone)]
pub struct PaymentSweepService {
    db: Arc<DatabaseConnection>,
    payu: Arc<PayuService>,
    reconciliation: Arc<ReconciliationService>,
    http: reqwest::Client,
    timeout_window: Duration,
    interval: std::time::Duration,
}

impl PaymentSweepService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        payu: Arc<PayuService>,
        reconciliation: Arc<ReconciliationService>,
        cfg: &AppConfig,
    ) -> Self {
        Self {
            db,
            payu,
            reconciliation,
            http: reqwest::Client::new(),
            timeout_window: Duration::minutes(cfg.pending_payment_timeout_mins as i64),
            interval: std::time::Duration::from_secs(cfg.payment_sweep_interval_secs),
        }
    }

    /// Runs the sweep until the process shuts down.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.sweep_once().await {
                Ok(report) if report.examined > 0 => {
                    info!(?report, "payment sweep pass complete");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "payment sweep pass failed"),
            }
        }
    }

    /// One pass: find stale PENDING payments and resolve each against the
    /// gateway verdict.
    #[instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<SweepReport, ServiceError> {
        let cutoff = Utc::now() - self.timeout_window;
        let stale = payment::Entity::find()
            .filter(payment::Column::Status.eq(PaymentStatus::Pending))
            .filter(payment::Column::CreatedAt.lt(cutoff))
            .order_by_asc(payment::Column::CreatedAt)
            .limit(SWEEP_BATCH_SIZE)
            .all(&*self.db)
            .await?;

        let mut report = SweepReport {
            examined: stale.len(),
            ..Default::default()
        };

        for row in stale {
            match self.resolve_payment(&row).await {
                Ok(Some(ReconciliationOutcome::Confirmed)) => report.confirmed += 1,
                Ok(Some(ReconciliationOutcome::Failed)) => report.failed += 1,
                Ok(_) => report.still_pending += 1,
                Err(e) => {
                    report.errors += 1;
                    warn!(
                        transaction_id = %row.transaction_id,
                        error = %e,
                        "failed to resolve stale payment"
                    );
                }
            }
        }

        Ok(report)
    }

    async fn resolve_payment(
        &self,
        row: &payment::Model,
    ) -> Result<Option<ReconciliationOutcome>, ServiceError> {
        let verdict = self.query_gateway(&row.transaction_id).await?;

        let Some((status, mihpayid, reason, raw)) = verdict else {
            info!(
                transaction_id = %row.transaction_id,
                "gateway has no verdict yet; leaving payment pending"
            );
            return Ok(None);
        };

        let outcome = self
            .reconciliation
            .apply_gateway_status(&row.transaction_id, status, mihpayid, reason, raw, None)
            .await?;
        Ok(Some(outcome))
    }

    /// Polls the gateway's `verify_payment` command for one transaction.
    /// Returns `None` while the gateway is still processing.
    async fn query_gateway(
        &self,
        transaction_id: &str,
    ) -> Result<Option<(GatewayStatus, Option<String>, Option<String>, String)>, ServiceError>
    {
        let config = self.payu.config();
        let hash = self.payu.verification_command_hash(transaction_id);
        let form = [
            ("key", config.merchant_key.as_str()),
            ("command", "verify_payment"),
            ("var1", transaction_id),
            ("hash", hash.as_str()),
        ];

        let response = self
            .http
            .post(&config.verify_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("gateway verify: {e}")))?;
        let body = response
            .text()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("gateway verify: {e}")))?;

        let parsed: VerifyResponse = serde_json::from_str(&body).map_err(|e| {
            ServiceError::ExternalServiceError(format!("gateway verify returned malformed body: {e}"))
        })?;

        if parsed.status != 1 {
            return Err(ServiceError::ExternalServiceError(
                "gateway verify command rejected".into(),
            ));
        }

        let Some(detail) = parsed.transaction_details.get(transaction_id) else {
            // The command succeeded but the txn is absent: it never reached
            // the gateway. That is a verdict; release the reservation.
            return Ok(Some((
                GatewayStatus::Failure,
                None,
                Some("transaction not found at gateway".to_string()),
                body,
            )));
        };

        match GatewayStatus::parse(&detail.status) {
            Some(GatewayStatus::Success) => Ok(Some((
                GatewayStatus::Success,
                detail.mihpayid.clone(),
                None,
                body,
            ))),
            Some(GatewayStatus::Failure) => Ok(Some((
                GatewayStatus::Failure,
                detail.mihpayid.clone(),
                detail
                    .error_message
                    .clone()
                    .or_else(|| Some("payment declined by gateway".to_string())),
                body,
            ))),
            Some(GatewayStatus::Pending) => Ok(None),
            None if detail.status.eq_ignore_ascii_case("not found") => Ok(Some((
                GatewayStatus::Failure,
                None,
                Some("transaction not found at gateway".to_string()),
                body,
            ))),
            None => {
                warn!(
                    transaction_id,
                    status = %detail.status,
                    "gateway verify returned unrecognised status; deferring"
                );
                Ok(None)
            }
        }
    }
}
