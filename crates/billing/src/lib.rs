//! Ledgerhook Billing
//!
//! Reconciles Stripe webhook events with the local subscription and
//! contribution ledger, and confirms card payments that need customer
//! authentication.
//!
//! Processing of a webhook delivery:
//!
//! 1. [`signature`] checks the `Stripe-Signature` header when a secret is set
//! 2. [`verifier`] re-fetches the event from Stripe (or trusts it in
//!    unverified mode) and short-circuits processor test webhooks
//! 3. [`normalizer`] extracts the canonical fields, with [`amounts`]
//!    resolving gross, fee and net from the charge
//! 4. [`resolver`] finds the recurring subscription and its latest contribution
//! 5. [`reconcile`] applies the event's ledger mutations

use std::sync::Arc;

use sqlx::PgPool;

pub mod accessor;
pub mod amounts;
pub mod client;
pub mod error;
pub mod event;
pub mod ledger;
pub mod normalizer;
pub mod payment_intent;
pub mod processor;
pub mod receipt;
pub mod reconcile;
pub mod resolver;
pub mod signature;
pub mod verifier;
pub mod webhooks;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{StripeClient, StripeConfig};
pub use error::{BillingError, BillingResult};
pub use event::InboundEvent;
pub use ledger::{IntentLog, Ledger, PgLedger};
pub use payment_intent::{ConfirmPaymentRequest, ConfirmPaymentResponse, PaymentConfirmationService};
pub use processor::{PaymentIntents, Processor, StripeProcessor};
pub use reconcile::{EngineSettings, Reconciliation, ReconciliationEngine};
pub use webhooks::{SignaturePolicy, WebhookAck, WebhookHandler};

/// Main billing service that wires the Stripe and Postgres collaborators together
#[derive(Clone)]
pub struct BillingService {
    pub webhooks: WebhookHandler,
    pub payments: PaymentConfirmationService,
    stripe: StripeClient,
}

impl BillingService {
    /// Create a new billing service
    pub fn new(config: StripeConfig, pool: PgPool, default_currency: String) -> Self {
        Self::with_client(StripeClient::new(config), pool, default_currency)
    }

    /// Create a billing service around an existing Stripe client
    pub fn with_client(stripe: StripeClient, pool: PgPool, default_currency: String) -> Self {
        let config = stripe.config().clone();
        let processor = Arc::new(StripeProcessor::new(stripe.clone()));
        let ledger = Arc::new(PgLedger::new(pool));

        let verifier = verifier::EventVerifier::new(
            processor.clone(),
            config.verify_events,
            config.mode_label(),
        );
        let engine =
            ReconciliationEngine::new(ledger.clone(), processor.clone(), EngineSettings::from(&config));
        let webhooks = WebhookHandler::new(
            verifier,
            engine,
            SignaturePolicy {
                secret: config.webhook_secret.clone(),
                tolerance_secs: config.webhook_tolerance_secs,
            },
        );
        let payments = PaymentConfirmationService::new(
            processor,
            ledger,
            config.payment_processor_id,
            default_currency,
        );

        tracing::info!(
            test_mode = config.test_mode,
            verify_events = config.verify_events,
            signature_check = config.webhook_secret.is_some(),
            "Billing service initialized"
        );

        Self {
            webhooks,
            payments,
            stripe,
        }
    }

    /// Get the Stripe client
    pub fn stripe(&self) -> &StripeClient {
        &self.stripe
    }
}
