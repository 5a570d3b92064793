//! Stripe client configuration

use stripe::Client;

use crate::error::{BillingError, BillingResult};

/// Default tolerance for webhook signature timestamps (5 minutes)
const DEFAULT_WEBHOOK_TOLERANCE_SECS: i64 = 300;

/// Configuration for the Stripe payment processor
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Stripe secret API key
    pub secret_key: String,
    /// Stripe webhook signing secret. Signature checking is skipped when unset.
    pub webhook_secret: Option<String>,
    /// Whether the processor runs against Stripe test mode
    pub test_mode: bool,
    /// Re-fetch every inbound event from Stripe before trusting it
    pub verify_events: bool,
    /// Receipt override applied to every contribution this process records
    pub send_receipt: Option<bool>,
    /// Ledger id of the payment processor record
    pub payment_processor_id: i64,
    /// Allowed clock skew for signed webhook deliveries
    pub webhook_tolerance_secs: i64,
}

impl StripeConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            secret_key: std::env::var("STRIPE_SECRET_KEY")
                .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?,
            webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            test_mode: env_flag("STRIPE_TEST_MODE").unwrap_or(false),
            verify_events: env_flag("STRIPE_VERIFY_EVENTS").unwrap_or(true),
            send_receipt: env_flag("STRIPE_SEND_RECEIPT"),
            payment_processor_id: match std::env::var("PAYMENT_PROCESSOR_ID") {
                Ok(v) => v.parse().map_err(|_| {
                    BillingError::Config(format!("PAYMENT_PROCESSOR_ID is not an integer: {}", v))
                })?,
                Err(_) => 1,
            },
            webhook_tolerance_secs: std::env::var("STRIPE_WEBHOOK_TOLERANCE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_WEBHOOK_TOLERANCE_SECS),
        })
    }

    /// Label used when acknowledging processor test webhooks
    pub fn mode_label(&self) -> &'static str {
        if self.test_mode {
            "(Test processor)"
        } else {
            "(Live processor)"
        }
    }
}

/// Parse a boolean environment variable ("1"/"true"/"yes" and "0"/"false"/"no")
fn env_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Stripe billing client
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

impl StripeClient {
    /// Create a new Stripe client from config
    pub fn new(config: StripeConfig) -> Self {
        let client = Client::new(config.secret_key.clone());
        Self { client, config }
    }

    /// Create a client that talks to a different API host (mock servers, proxies)
    pub fn with_base_url(config: StripeConfig, base_url: &str) -> Self {
        let client = Client::from_url(base_url, config.secret_key.clone());
        Self { client, config }
    }

    /// Create a new Stripe client from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let config = StripeConfig::from_env()?;
        Ok(Self::new(config))
    }

    /// Get the inner Stripe client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get the config
    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}
