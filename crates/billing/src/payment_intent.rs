//! Payment confirmation for authorizations that need customer authentication
//!
//! The browser either sends a payment method (we create and confirm a
//! manual-capture intent) or an intent it already authenticated (we confirm
//! and optionally capture it). The resulting intent is recorded through
//! [`IntentLog`] and translated into a small JSON response for the client.

use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{BillingError, BillingResult};
use crate::ledger::{IntentLog, PaymentIntentRecord};
use crate::processor::{CreatePaymentIntent, PaymentIntent, PaymentIntents};

/// Currencies the processor expects in whole units
const ZERO_DECIMAL_CURRENCIES: &[&str] = &[
    "bif", "clp", "djf", "gnf", "jpy", "kmf", "krw", "mga", "pyg", "rwf", "ugx", "vnd", "vuv",
    "xaf", "xof", "xpf",
];

/// Convert a major-unit amount into the processor's integer amount
pub fn to_minor_units(amount: Decimal, currency: &str) -> BillingResult<i64> {
    let scaled = if ZERO_DECIMAL_CURRENCIES.contains(&currency.to_lowercase().as_str()) {
        amount
    } else {
        amount * Decimal::ONE_HUNDRED
    };
    scaled
        .round()
        .to_i64()
        .ok_or_else(|| BillingError::InvalidInput(format!("Amount out of range: {}", amount)))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfirmPaymentRequest {
    #[serde(default)]
    pub payment_method_id: Option<String>,
    #[serde(default)]
    pub payment_intent_id: Option<String>,
    #[serde(default)]
    pub capture: bool,
    /// Major units as a decimal string
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub payment_processor_id: i64,
    #[serde(default)]
    pub referrer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmPaymentResponse {
    /// The client must run the processor SDK's authentication step
    RequiresAction { client_secret: String },
    Success { payment_intent_id: String },
    Failed { message: String },
}

impl ConfirmPaymentResponse {
    pub fn from_intent(intent: &PaymentIntent) -> Self {
        if intent.requires_sdk_action() {
            if let Some(secret) = &intent.client_secret {
                return Self::RequiresAction {
                    client_secret: secret.clone(),
                };
            }
        }

        match intent.status.as_str() {
            "requires_capture" | "requires_confirmation" | "succeeded" => Self::Success {
                payment_intent_id: intent.id.clone(),
            },
            _ => Self::Failed {
                message: match intent
                    .last_payment_error
                    .as_ref()
                    .and_then(|e| e.message.as_deref())
                {
                    Some(message) => format!("Payment failed: {}", message),
                    None => "Payment failed.".to_string(),
                },
            },
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::RequiresAction { client_secret } => json!({
                "requires_action": true,
                "payment_intent_client_secret": client_secret,
            }),
            Self::Success { payment_intent_id } => json!({
                "success": true,
                "paymentIntent": {"id": payment_intent_id},
            }),
            Self::Failed { message } => json!({
                "error": {"message": message},
            }),
        }
    }
}

#[derive(Clone)]
pub struct PaymentConfirmationService {
    intents: Arc<dyn PaymentIntents>,
    log: Arc<dyn IntentLog>,
    payment_processor_id: i64,
    default_currency: String,
}

impl PaymentConfirmationService {
    pub fn new(
        intents: Arc<dyn PaymentIntents>,
        log: Arc<dyn IntentLog>,
        payment_processor_id: i64,
        default_currency: String,
    ) -> Self {
        Self {
            intents,
            log,
            payment_processor_id,
            default_currency,
        }
    }

    pub async fn confirm(
        &self,
        request: ConfirmPaymentRequest,
    ) -> BillingResult<ConfirmPaymentResponse> {
        if request.payment_processor_id != self.payment_processor_id {
            return Err(BillingError::InvalidInput(format!(
                "Unknown payment processor: {}",
                request.payment_processor_id
            )));
        }

        let amount = match request.amount.as_deref().filter(|a| !a.trim().is_empty()) {
            Some(raw) => {
                let amount = Decimal::from_str(raw.trim())
                    .map_err(|_| BillingError::InvalidInput(format!("Invalid amount: {}", raw)))?;
                if amount <= Decimal::ZERO {
                    return Err(BillingError::InvalidInput(format!(
                        "Amount must be positive: {}",
                        raw
                    )));
                }
                Some(amount)
            }
            None if request.capture => None,
            None => return Err(BillingError::InvalidInput("amount is required".to_string())),
        };

        let title = request.description.clone().unwrap_or_default();

        let intent = match (&request.payment_intent_id, &request.payment_method_id) {
            (Some(intent_id), _) => self.advance(intent_id, request.capture).await?,
            (None, Some(method_id)) => {
                let currency = request
                    .currency
                    .clone()
                    .unwrap_or_else(|| self.default_currency.clone())
                    .to_lowercase();
                let Some(amount) = amount else {
                    return Err(BillingError::InvalidInput("amount is required".to_string()));
                };
                let params = CreatePaymentIntent::authorize_only(
                    method_id.clone(),
                    to_minor_units(amount, &currency)?,
                    currency,
                );

                match self.intents.create_payment_intent(params).await {
                    Ok(intent) => intent,
                    Err(err) => return self.creation_failed(err, &title, &request).await,
                }
            }
            (None, None) => {
                return Err(BillingError::InvalidInput(
                    "payment_method_id or payment_intent_id is required".to_string(),
                ))
            }
        };

        self.log
            .record_payment_intent(PaymentIntentRecord {
                paymentintent_id: intent.id.clone(),
                payment_processor_id: self.payment_processor_id,
                status: intent.status.clone(),
                description: format!(";{}", title),
                referrer: request.referrer.clone(),
            })
            .await?;

        let response = ConfirmPaymentResponse::from_intent(&intent);
        tracing::info!(
            payment_intent_id = %intent.id,
            status = %intent.status,
            "Payment intent processed"
        );
        Ok(response)
    }

    /// Confirm and, when asked, capture an existing intent
    async fn advance(&self, intent_id: &str, capture: bool) -> BillingResult<PaymentIntent> {
        let mut intent = self.intents.retrieve_payment_intent(intent_id).await?;
        if intent.status == "requires_confirmation" {
            intent = self.intents.confirm_payment_intent(intent_id).await?;
        }
        if capture && intent.status == "requires_capture" {
            intent = self.intents.capture_payment_intent(intent_id).await?;
        }
        Ok(intent)
    }

    async fn creation_failed(
        &self,
        err: BillingError,
        title: &str,
        request: &ConfirmPaymentRequest,
    ) -> BillingResult<ConfirmPaymentResponse> {
        let message = match err {
            BillingError::CardDeclined {
                ref message,
                ref decline_code,
            } => {
                if decline_code.as_deref() == Some("fraudulent") {
                    tracing::warn!(
                        referrer = ?request.referrer,
                        "Fraudulent card decline on payment confirmation"
                    );
                }
                message.clone()
            }
            BillingError::ProcessorRejected(_) => "Invalid request".to_string(),
            other => return Err(other),
        };

        self.log
            .record_payment_intent(PaymentIntentRecord {
                paymentintent_id: "null".to_string(),
                payment_processor_id: self.payment_processor_id,
                status: "failed".to_string(),
                description: format!("{};{}", err, title),
                referrer: request.referrer.clone(),
            })
            .await?;

        tracing::warn!(error = %err, "Payment intent creation failed");
        Ok(ConfirmPaymentResponse::Failed { message })
    }
}
