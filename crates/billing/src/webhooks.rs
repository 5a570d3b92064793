//! Webhook delivery handling
//!
//! signature check → verification → reconciliation → acknowledgement

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::reconcile::{Reconciliation, ReconciliationEngine};
use crate::signature::verify_signature;
use crate::verifier::{EventVerifier, Verified};

/// Body returned to the processor for an accepted delivery
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WebhookAck {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Signature settings for raw deliveries
#[derive(Debug, Clone)]
pub struct SignaturePolicy {
    pub secret: Option<String>,
    pub tolerance_secs: i64,
}

#[derive(Clone)]
pub struct WebhookHandler {
    verifier: EventVerifier,
    engine: ReconciliationEngine,
    signature: SignaturePolicy,
}

impl WebhookHandler {
    pub fn new(
        verifier: EventVerifier,
        engine: ReconciliationEngine,
        signature: SignaturePolicy,
    ) -> Self {
        Self {
            verifier,
            engine,
            signature,
        }
    }

    /// Handle a raw delivery body and its `Stripe-Signature` header
    pub async fn handle_delivery(
        &self,
        body: &str,
        signature: Option<&str>,
    ) -> BillingResult<WebhookAck> {
        if let Some(secret) = &self.signature.secret {
            let header = signature.ok_or_else(|| {
                tracing::warn!("Webhook delivery without signature header");
                BillingError::VerificationFailed("Missing Stripe-Signature header".to_string())
            })?;
            verify_signature(
                body,
                header,
                secret,
                self.signature.tolerance_secs,
                OffsetDateTime::now_utc().unix_timestamp(),
            )?;
        }

        let payload: Value = serde_json::from_str(body).map_err(|e| {
            tracing::warn!(parse_error = %e, "Failed to parse webhook payload");
            BillingError::InvalidInput(format!("Invalid JSON payload: {}", e))
        })?;

        self.handle_payload(payload).await
    }

    /// Handle an already-parsed delivery
    pub async fn handle_payload(&self, payload: Value) -> BillingResult<WebhookAck> {
        let event = match self.verifier.verify(payload).await {
            Ok(Verified::Sentinel { message }) => {
                return Ok(WebhookAck {
                    received: true,
                    event_id: None,
                    event_type: None,
                    outcome: "test",
                    message: Some(message),
                })
            }
            Ok(Verified::Event(event)) => event,
            Err(e) => {
                tracing::error!(error = %e, "Webhook verification failed");
                return Err(e);
            }
        };

        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            livemode = event.livemode,
            "Processing webhook event"
        );

        match self.engine.reconcile(&event).await {
            Ok(outcome) => {
                if outcome != Reconciliation::Ignored {
                    tracing::info!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        outcome = outcome.as_str(),
                        "Webhook event reconciled"
                    );
                }
                Ok(WebhookAck {
                    received: true,
                    event_id: Some(event.id.clone()),
                    event_type: Some(event.event_type.to_string()),
                    outcome: outcome.as_str(),
                    message: None,
                })
            }
            Err(e) => {
                tracing::error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %e,
                    "Webhook event processing failed"
                );
                Err(e)
            }
        }
    }
}
