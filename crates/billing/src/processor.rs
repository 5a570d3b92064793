//! Payment processor collaborator
//!
//! The reconciliation engine only needs three read calls from the processor
//! (event, charge, balance transaction); the confirmation flow additionally
//! drives payment intents.
//!
//! The Stripe implementation requests raw JSON and deserializes into the
//! narrow snapshots below rather than the SDK's full object graph.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::StripeClient;
use crate::error::BillingResult;

/// The parts of a processor charge the engine reads
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Charge {
    pub id: String,
    /// Gross amount in minor units
    #[serde(default)]
    pub amount: i64,
    /// Absent when the charge was declined and never settled
    #[serde(default)]
    pub balance_transaction: Option<String>,
    #[serde(default)]
    pub invoice: Option<String>,
}

/// Settlement record for a charge
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BalanceTransaction {
    pub id: String,
    #[serde(default)]
    pub amount: i64,
    /// Processor fee in minor units
    #[serde(default)]
    pub fee: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NextAction {
    #[serde(rename = "type", default)]
    pub type_: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentError {
    #[serde(default)]
    pub message: Option<String>,
}

/// The parts of a payment intent the confirmation flow reads
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub next_action: Option<NextAction>,
    #[serde(default)]
    pub last_payment_error: Option<PaymentError>,
}

impl PaymentIntent {
    /// The customer must complete an authentication step in the browser
    pub fn requires_sdk_action(&self) -> bool {
        self.status == "requires_action"
            && self
                .next_action
                .as_ref()
                .map(|a| a.type_ == "use_stripe_sdk")
                .unwrap_or(false)
    }
}

/// Parameters for a manual-confirmation, manual-capture payment intent
#[derive(Debug, Clone, Serialize)]
pub struct CreatePaymentIntent {
    pub payment_method: String,
    /// Amount in minor units
    pub amount: i64,
    pub currency: String,
    pub confirmation_method: &'static str,
    pub capture_method: &'static str,
    pub setup_future_usage: &'static str,
    pub confirm: bool,
}

impl CreatePaymentIntent {
    /// Authorize now, capture later, and keep the card for off-session reuse
    pub fn authorize_only(payment_method: String, amount: i64, currency: String) -> Self {
        Self {
            payment_method,
            amount,
            currency,
            confirmation_method: "manual",
            capture_method: "manual",
            setup_future_usage: "off_session",
            confirm: true,
        }
    }
}

/// Read access to the processor's source of truth
#[async_trait]
pub trait Processor: Send + Sync {
    /// Fetch a full event envelope by id
    async fn fetch_event(&self, event_id: &str) -> BillingResult<Value>;

    async fn fetch_charge(&self, charge_id: &str) -> BillingResult<Charge>;

    async fn fetch_balance_transaction(&self, id: &str) -> BillingResult<BalanceTransaction>;
}

/// Payment intent operations used by the confirmation flow
#[async_trait]
pub trait PaymentIntents: Send + Sync {
    async fn retrieve_payment_intent(&self, id: &str) -> BillingResult<PaymentIntent>;

    async fn confirm_payment_intent(&self, id: &str) -> BillingResult<PaymentIntent>;

    async fn capture_payment_intent(&self, id: &str) -> BillingResult<PaymentIntent>;

    async fn create_payment_intent(&self, params: CreatePaymentIntent)
        -> BillingResult<PaymentIntent>;
}

/// Stripe-backed processor
#[derive(Clone)]
pub struct StripeProcessor {
    stripe: StripeClient,
}

impl StripeProcessor {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> BillingResult<T> {
        let value: Value = self.stripe.inner().get(path).await?;
        decode(path, value)
    }

    async fn post<T: serde::de::DeserializeOwned, F: Serialize + Send + Sync + 'static>(
        &self,
        path: &str,
        form: F,
    ) -> BillingResult<T> {
        let value: Value = self.stripe.inner().post_form(path, form).await?;
        decode(path, value)
    }
}

fn decode<T: serde::de::DeserializeOwned>(path: &str, value: Value) -> BillingResult<T> {
    serde_json::from_value(value).map_err(|e| {
        crate::error::BillingError::UpstreamUnavailable(format!(
            "Unexpected response shape from {}: {}",
            path, e
        ))
    })
}

#[async_trait]
impl Processor for StripeProcessor {
    async fn fetch_event(&self, event_id: &str) -> BillingResult<Value> {
        let event: Value = self
            .stripe
            .inner()
            .get(&format!("/events/{}", event_id))
            .await?;
        Ok(event)
    }

    async fn fetch_charge(&self, charge_id: &str) -> BillingResult<Charge> {
        self.get(&format!("/charges/{}", charge_id)).await
    }

    async fn fetch_balance_transaction(&self, id: &str) -> BillingResult<BalanceTransaction> {
        self.get(&format!("/balance_transactions/{}", id)).await
    }
}

#[async_trait]
impl PaymentIntents for StripeProcessor {
    async fn retrieve_payment_intent(&self, id: &str) -> BillingResult<PaymentIntent> {
        self.get(&format!("/payment_intents/{}", id)).await
    }

    async fn confirm_payment_intent(&self, id: &str) -> BillingResult<PaymentIntent> {
        self.post(
            &format!("/payment_intents/{}/confirm", id),
            HashMap::<String, String>::new(),
        )
        .await
    }

    async fn capture_payment_intent(&self, id: &str) -> BillingResult<PaymentIntent> {
        self.post(
            &format!("/payment_intents/{}/capture", id),
            HashMap::<String, String>::new(),
        )
        .await
    }

    async fn create_payment_intent(
        &self,
        params: CreatePaymentIntent,
    ) -> BillingResult<PaymentIntent> {
        self.post("/payment_intents", params).await
    }
}
