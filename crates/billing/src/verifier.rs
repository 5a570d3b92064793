//! Event verification against the processor's source of truth

use std::sync::Arc;

use serde_json::Value;

use crate::event::{self, InboundEvent};
use crate::error::{BillingError, BillingResult};
use crate::processor::Processor;

/// Suffix the processor uses on ids of dashboard-triggered test webhooks
const TEST_SENTINEL_SUFFIX: &str = "_00000000000000";

/// Outcome of verification
#[derive(Debug, Clone)]
pub enum Verified {
    /// A processor test webhook. Acknowledge with `message` and stop.
    Sentinel { message: String },
    Event(InboundEvent),
}

pub fn is_test_sentinel(event_id: &str) -> bool {
    event_id.len() >= TEST_SENTINEL_SUFFIX.len() && event_id.ends_with(TEST_SENTINEL_SUFFIX)
}

/// Authenticates deliveries by re-fetching them, or trusts them in unverified mode
#[derive(Clone)]
pub struct EventVerifier {
    processor: Arc<dyn Processor>,
    verify: bool,
    mode_label: &'static str,
}

impl EventVerifier {
    pub fn new(processor: Arc<dyn Processor>, verify: bool, mode_label: &'static str) -> Self {
        Self {
            processor,
            verify,
            mode_label,
        }
    }

    pub async fn verify(&self, delivered: Value) -> BillingResult<Verified> {
        let event_id = event::envelope_id(&delivered)?;

        if is_test_sentinel(&event_id) {
            tracing::info!(event_id = %event_id, "Processor test webhook acknowledged");
            return Ok(Verified::Sentinel {
                message: format!(
                    "Test webhook from Stripe ({}) received successfully {}.",
                    event_id, self.mode_label
                ),
            });
        }

        let envelope = if self.verify {
            self.processor.fetch_event(&event_id).await.map_err(|e| {
                tracing::warn!(event_id = %event_id, error = %e, "Event re-fetch failed");
                BillingError::VerificationFailed(format!(
                    "Could not retrieve event {}: {}",
                    event_id, e
                ))
            })?
        } else {
            delivered
        };

        let event = InboundEvent::from_envelope(envelope)?;
        if event.id != event_id {
            return Err(BillingError::VerificationFailed(format!(
                "Processor returned event {} for {}",
                event.id, event_id
            )));
        }

        Ok(Verified::Event(event))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::FakeProcessor;
    use serde_json::json;

    #[test]
    fn test_sentinel_pattern() {
        assert!(is_test_sentinel("evt_00000000000000"));
        assert!(!is_test_sentinel("evt_1NqXb2LkdIwHu7ix"));
        assert!(!is_test_sentinel("00000000000000"));
    }

    #[tokio::test]
    async fn test_sentinel_short_circuits_without_fetch() {
        let processor = Arc::new(FakeProcessor::default());
        let verifier = EventVerifier::new(processor.clone(), true, "(Test processor)");

        let verified = verifier
            .verify(json!({"id": "evt_00000000000000", "type": "invoice.payment_succeeded"}))
            .await
            .unwrap();

        match verified {
            Verified::Sentinel { message } => {
                assert_eq!(
                    message,
                    "Test webhook from Stripe (evt_00000000000000) received successfully (Test processor)."
                );
            }
            other => panic!("expected sentinel, got {:?}", other),
        }
        assert_eq!(processor.calls(), 0);
    }

    #[tokio::test]
    async fn test_verified_mode_uses_fetched_event() {
        let processor = Arc::new(FakeProcessor::default());
        processor.add_event(json!({
            "id": "evt_1",
            "type": "charge.succeeded",
            "data": {"object": {"id": "ch_real"}}
        }));
        let verifier = EventVerifier::new(processor.clone(), true, "(Live processor)");

        let verified = verifier
            .verify(json!({"id": "evt_1", "type": "charge.succeeded", "data": {"object": {"id": "ch_spoofed"}}}))
            .await
            .unwrap();

        match verified {
            Verified::Event(event) => assert_eq!(event.object()["id"], "ch_real"),
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_failure_is_verification_failure() {
        let processor = Arc::new(FakeProcessor::default());
        let verifier = EventVerifier::new(processor, true, "(Live processor)");

        let err = verifier
            .verify(json!({"id": "evt_unknown", "type": "charge.succeeded"}))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::VerificationFailed(_)));
    }

    #[tokio::test]
    async fn test_unverified_mode_trusts_payload() {
        let processor = Arc::new(FakeProcessor::default());
        let verifier = EventVerifier::new(processor.clone(), false, "(Test processor)");

        let verified = verifier
            .verify(json!({"id": "evt_2", "type": "foo.bar"}))
            .await
            .unwrap();
        assert!(matches!(verified, Verified::Event(_)));
        assert_eq!(processor.calls(), 0);
    }
}
