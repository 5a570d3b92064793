//! Inbound event envelope

use ledgerhook_shared::EventType;
use serde_json::Value;

use crate::accessor;
use crate::error::{BillingError, BillingResult};

/// A processor event as delivered or re-fetched. Never mutated after parsing.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub id: String,
    pub event_type: EventType,
    pub livemode: bool,
    payload: Value,
}

impl InboundEvent {
    /// Parse an `{ id, type, data: { object } }` envelope
    pub fn from_envelope(payload: Value) -> BillingResult<Self> {
        let id = accessor::required_str(&payload, "id", "id")?;
        let event_type = EventType::from(accessor::required_str(&payload, "type", "type")?.as_str());
        let livemode = accessor::opt_bool(&payload, "livemode").unwrap_or(false);

        Ok(Self {
            id,
            event_type,
            livemode,
            payload,
        })
    }

    /// The event-type-specific object under `data.object`
    pub fn object(&self) -> &Value {
        accessor::lookup(&self.payload, "data.object").unwrap_or(&Value::Null)
    }

    /// Attribute values before the change, present on `*.updated` events
    pub fn previous_attributes(&self) -> &Value {
        accessor::lookup(&self.payload, "data.previous_attributes").unwrap_or(&Value::Null)
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }
}

/// Read only the `id` of a raw delivery, without requiring the rest of the envelope
pub fn envelope_id(payload: &Value) -> BillingResult<String> {
    accessor::required_str(payload, "id", "id")
        .map_err(|_| BillingError::VerificationFailed("Event has no id".to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_envelope() {
        let event = InboundEvent::from_envelope(json!({
            "id": "evt_1",
            "type": "invoice.payment_succeeded",
            "livemode": true,
            "data": {"object": {"id": "in_1"}, "previous_attributes": {"plan": {"id": "p_old"}}}
        }))
        .unwrap();

        assert_eq!(event.id, "evt_1");
        assert_eq!(event.event_type, EventType::InvoicePaymentSucceeded);
        assert!(event.livemode);
        assert_eq!(event.object()["id"], "in_1");
        assert_eq!(event.previous_attributes()["plan"]["id"], "p_old");
    }

    #[test]
    fn test_unknown_type_is_kept() {
        let event =
            InboundEvent::from_envelope(json!({"id": "evt_2", "type": "foo.bar"})).unwrap();
        assert_eq!(event.event_type, EventType::Other("foo.bar".to_string()));
        assert!(event.object().is_null());
    }

    #[test]
    fn test_envelope_requires_type() {
        let err = InboundEvent::from_envelope(json!({"id": "evt_3"})).unwrap_err();
        assert!(matches!(err, BillingError::MissingField(ref f) if f == "type"));
    }

    #[test]
    fn test_envelope_id_missing_is_verification_failure() {
        let err = envelope_id(&json!({"type": "charge.failed"})).unwrap_err();
        assert!(matches!(err, BillingError::VerificationFailed(_)));
    }
}
