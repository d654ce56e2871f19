use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::info;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Application configuration with validation.
///
/// Values come from `config/{default,<env>}.toml` when present, overridden by
/// `APP__*` environment variables (e.g. `APP__PAYU_MERCHANT_KEY`).
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// JWT secret key (minimum 32 characters)
    #[validate(length(min = 32))]
    pub jwt_secret: String,

    /// JWT expiration time in seconds
    #[serde(default = "default_jwt_expiration_secs")]
    pub jwt_expiration_secs: u64,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    // --- Payment gateway (PayU) ---
    /// Merchant key issued by the gateway
    #[validate(length(min = 1))]
    pub payu_merchant_key: String,

    /// Merchant salt used in both hash directions
    #[validate(length(min = 1))]
    pub payu_merchant_salt: String,

    /// Hosted payment page the redirect payload is posted to
    #[serde(default = "default_payu_payment_url")]
    pub payu_payment_url: String,

    /// Server-to-server verification endpoint used by the stale-payment sweep
    #[serde(default = "default_payu_verify_url")]
    pub payu_verify_url: String,

    /// Public base URL of this service; callback routes are appended to it
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Minutes a payment may sit PENDING before the sweep polls the gateway
    #[serde(default = "default_pending_payment_timeout_mins")]
    pub pending_payment_timeout_mins: u64,

    /// Seconds between sweep runs
    #[serde(default = "default_payment_sweep_interval_secs")]
    pub payment_sweep_interval_secs: u64,

    // --- Pricing constants ---
    /// Subtotal at or above which delivery is free
    #[serde(default = "default_free_delivery_threshold")]
    pub free_delivery_threshold: Decimal,

    /// Flat delivery fee below the threshold
    #[serde(default = "default_delivery_fee")]
    pub delivery_fee: Decimal,

    /// Flat handling charge per order
    #[serde(default = "default_handling_charge")]
    pub handling_charge: Decimal,

    /// Flat platform fee per order
    #[serde(default = "default_platform_fee")]
    pub platform_fee: Decimal,

    /// GST percentage applied to the discounted subtotal
    #[serde(default = "default_gst_rate_percent")]
    pub gst_rate_percent: Decimal,

    /// Capacity of the in-process event channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_jwt_expiration_secs() -> u64 {
    3600
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_payu_payment_url() -> String {
    "https://secure.payu.in/_payment".to_string()
}
fn default_payu_verify_url() -> String {
    "https://info.payu.in/merchant/postservice.php?form=2".to_string()
}
fn default_public_base_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_pending_payment_timeout_mins() -> u64 {
    30
}
fn default_payment_sweep_interval_secs() -> u64 {
    300
}
fn default_free_delivery_threshold() -> Decimal {
    dec!(199)
}
fn default_delivery_fee() -> Decimal {
    dec!(29)
}
fn default_handling_charge() -> Decimal {
    dec!(5)
}
fn default_platform_fee() -> Decimal {
    dec!(3)
}
fn default_gst_rate_percent() -> Decimal {
    dec!(5)
}
fn default_event_channel_capacity() -> usize {
    1024
}

impl AppConfig {
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Success/failure return URL handed to the gateway. Both point at the
    /// same callback route; only the verified status field is trusted.
    pub fn payment_callback_url(&self) -> String {
        format!(
            "{}/api/v1/payments/callback",
            self.public_base_url.trim_end_matches('/')
        )
    }

    /// Construct a configuration programmatically (used by tests).
    pub fn new(
        database_url: String,
        jwt_secret: String,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            jwt_secret,
            jwt_expiration_secs: default_jwt_expiration_secs(),
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            payu_merchant_key: "gtKFFx".to_string(),
            payu_merchant_salt: "eCwWELxi".to_string(),
            payu_payment_url: default_payu_payment_url(),
            payu_verify_url: default_payu_verify_url(),
            public_base_url: default_public_base_url(),
            pending_payment_timeout_mins: default_pending_payment_timeout_mins(),
            payment_sweep_interval_secs: default_payment_sweep_interval_secs(),
            free_delivery_threshold: default_free_delivery_threshold(),
            delivery_fee: default_delivery_fee(),
            handling_charge: default_handling_charge(),
            platform_fee: default_platform_fee(),
            gst_rate_percent: default_gst_rate_percent(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Load configuration for the current environment.
///
/// `jwt_secret` and the gateway credentials have no defaults; they must be
/// provided via config file or environment.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    let mut builder = Config::builder()
        .set_default("database_url", "sqlite://freshbasket.db?mode=rwc")?
        .set_default("environment", run_env.clone())?;

    if Path::new(CONFIG_DIR).exists() {
        builder = builder
            .add_source(File::with_name(&format!("{CONFIG_DIR}/default")).required(false))
            .add_source(File::with_name(&format!("{CONFIG_DIR}/{run_env}")).required(false));
    } else {
        info!(
            "Config directory '{}' not found; relying on defaults and environment variables",
            CONFIG_DIR
        );
    }

    let cfg: AppConfig = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?
        .try_deserialize()?;

    cfg.validate()?;
    Ok(cfg)
}

/// Initialise the tracing subscriber. `RUST_LOG` wins over the configured
/// level when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("freshbasket_api={level},tower_http=info");
    let filter = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(EnvFilter::new(filter)).json().try_init();
    } else {
        let _ = fmt().with_env_filter(EnvFilter::new(filter)).try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn programmatic_config_passes_validation() {
        let cfg = AppConfig::new(
            "sqlite::memory:".into(),
            "a_test_secret_that_is_long_enough_for_validation".into(),
            "127.0.0.1".into(),
            8080,
            "test".into(),
        );
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.free_delivery_threshold, dec!(199));
        assert_eq!(
            cfg.payment_callback_url(),
            "http://localhost:8080/api/v1/payments/callback"
        );
    }

    #[test]
    fn short_jwt_secret_fails_validation() {
        let cfg = AppConfig::new(
            "sqlite::memory:".into(),
            "short".into(),
            "127.0.0.1".into(),
            8080,
            "test".into(),
        );
        assert!(cfg.validate().is_err());
    }
}
