//! Canonical field extraction from processor event payloads
//!
//! The processor nests different objects under `data.object` depending on
//! the event type. Each shape has its own path table; a field may list
//! several paths, tried in order, to cover older and newer API versions.

use ledgerhook_shared::{minor_to_major, EventType};
use rust_decimal::Decimal;
use serde_json::Value;
use time::OffsetDateTime;

use crate::accessor;
use crate::amounts::AmountResolver;
use crate::error::BillingResult;
use crate::event::InboundEvent;

/// Which processor object an event carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectShape {
    Invoice,
    Charge,
    Subscription,
}

impl ObjectShape {
    pub fn for_event(event_type: &EventType) -> Option<Self> {
        match event_type {
            EventType::InvoicePaymentSucceeded | EventType::InvoicePaymentFailed => {
                Some(Self::Invoice)
            }
            EventType::ChargeFailed | EventType::ChargeRefunded | EventType::ChargeSucceeded => {
                Some(Self::Charge)
            }
            EventType::SubscriptionDeleted | EventType::SubscriptionUpdated => {
                Some(Self::Subscription)
            }
            EventType::Other(_) => None,
        }
    }
}

/// Canonical fields read from the event object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    CustomerId,
    SubscriptionId,
    InvoiceId,
    ChargeId,
    PlanId,
    PlanAmount,
    FrequencyUnit,
    FrequencyInterval,
    PlanName,
    PlanStart,
    ReceiveDate,
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Field::CustomerId => "customer_id",
            Field::SubscriptionId => "subscription_id",
            Field::InvoiceId => "invoice_id",
            Field::ChargeId => "charge_id",
            Field::PlanId => "plan_id",
            Field::PlanAmount => "plan_amount",
            Field::FrequencyUnit => "frequency_unit",
            Field::FrequencyInterval => "frequency_interval",
            Field::PlanName => "plan_name",
            Field::PlanStart => "plan_start",
            Field::ReceiveDate => "receive_date",
        }
    }
}

/// Extraction paths for a field on a given object shape
pub fn paths(shape: ObjectShape, field: Field) -> &'static [&'static str] {
    use Field::*;
    use ObjectShape::*;

    match (shape, field) {
        (_, CustomerId) => &["customer"],

        (Invoice, SubscriptionId) => &["subscription", "parent.subscription_details.subscription"],
        (Invoice, InvoiceId) => &["id"],
        (Invoice, ChargeId) => &["charge", "payments.data.0.payment.charge"],
        (Invoice, PlanId) => &["lines.data.0.plan.id", "lines.data.0.price.id"],
        (Invoice, PlanAmount) => &["lines.data.0.plan.amount", "lines.data.0.price.unit_amount"],
        (Invoice, FrequencyUnit) => &[
            "lines.data.0.plan.interval",
            "lines.data.0.price.recurring.interval",
        ],
        (Invoice, FrequencyInterval) => &[
            "lines.data.0.plan.interval_count",
            "lines.data.0.price.recurring.interval_count",
        ],
        (Invoice, PlanName) => &["lines.data.0.plan.nickname", "lines.data.0.price.nickname"],
        (Invoice, PlanStart) => &["period_start"],
        (Invoice, ReceiveDate) => &["status_transitions.paid_at", "created"],

        (Charge, SubscriptionId) => &["invoice.subscription"],
        (Charge, InvoiceId) => &["invoice"],
        (Charge, ChargeId) => &["id"],
        (Charge, PlanId | PlanAmount | FrequencyUnit | FrequencyInterval | PlanName) => &[],
        (Charge, PlanStart) => &[],
        (Charge, ReceiveDate) => &["created"],

        (Subscription, SubscriptionId) => &["id"],
        (Subscription, InvoiceId) => &["latest_invoice"],
        (Subscription, ChargeId) => &[],
        (Subscription, PlanId) => &["plan.id", "items.data.0.plan.id", "items.data.0.price.id"],
        (Subscription, PlanAmount) => &[
            "plan.amount",
            "items.data.0.plan.amount",
            "items.data.0.price.unit_amount",
        ],
        (Subscription, FrequencyUnit) => &[
            "plan.interval",
            "items.data.0.plan.interval",
            "items.data.0.price.recurring.interval",
        ],
        (Subscription, FrequencyInterval) => &[
            "plan.interval_count",
            "items.data.0.plan.interval_count",
            "items.data.0.price.recurring.interval_count",
        ],
        (Subscription, PlanName) => &["plan.nickname", "items.data.0.plan.nickname"],
        (Subscription, PlanStart) => &["start_date"],
        (Subscription, ReceiveDate) => &["current_period_start", "created"],
    }
}

/// Where a subscription change records the plan it replaced
const PREVIOUS_PLAN_PATHS: &[&str] = &["plan.id", "items.data.0.plan.id", "items.data.0.price.id"];

fn read_str(object: &Value, shape: ObjectShape, field: Field) -> Option<String> {
    paths(shape, field)
        .iter()
        .find_map(|path| accessor::opt_str(object, path))
}

fn read_i64(object: &Value, shape: ObjectShape, field: Field) -> Option<i64> {
    paths(shape, field)
        .iter()
        .find_map(|path| accessor::opt_i64(object, path))
}

fn read_timestamp(object: &Value, shape: ObjectShape, field: Field) -> Option<OffsetDateTime> {
    read_i64(object, shape, field).and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
}

/// Fields of one event in canonical form. Amounts are in major units.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEventData {
    pub customer_id: String,
    pub subscription_id: Option<String>,
    pub invoice_id: Option<String>,
    pub charge_id: Option<String>,
    pub previous_plan_id: Option<String>,
    pub plan_id: Option<String>,
    pub plan_amount: Decimal,
    pub frequency_interval: i32,
    pub frequency_unit: Option<String>,
    pub plan_name: Option<String>,
    pub plan_start: Option<OffsetDateTime>,
    pub receive_date: OffsetDateTime,
    pub gross_amount: Decimal,
    pub fee_amount: Decimal,
    pub net_amount: Decimal,
}

/// Pure extraction, without amount resolution
pub fn extract(event: &InboundEvent, shape: ObjectShape) -> BillingResult<NormalizedEventData> {
    let object = event.object();

    let customer_id = paths(shape, Field::CustomerId)
        .iter()
        .find_map(|path| accessor::opt_str(object, path))
        .ok_or_else(|| {
            crate::error::BillingError::MissingField(Field::CustomerId.name().to_string())
        })?;

    let previous_plan_id = PREVIOUS_PLAN_PATHS
        .iter()
        .find_map(|path| accessor::opt_str(event.previous_attributes(), path));

    let receive_date = read_timestamp(object, shape, Field::ReceiveDate)
        .or_else(|| {
            accessor::opt_i64(event.payload(), "created")
                .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
        })
        .unwrap_or_else(OffsetDateTime::now_utc);

    Ok(NormalizedEventData {
        customer_id,
        subscription_id: read_str(object, shape, Field::SubscriptionId),
        invoice_id: read_str(object, shape, Field::InvoiceId),
        charge_id: read_str(object, shape, Field::ChargeId),
        previous_plan_id,
        plan_id: read_str(object, shape, Field::PlanId),
        plan_amount: read_i64(object, shape, Field::PlanAmount)
            .map(minor_to_major)
            .unwrap_or(Decimal::ZERO),
        frequency_interval: read_i64(object, shape, Field::FrequencyInterval)
            .and_then(|n| i32::try_from(n).ok())
            .unwrap_or(1),
        frequency_unit: read_str(object, shape, Field::FrequencyUnit),
        plan_name: read_str(object, shape, Field::PlanName),
        plan_start: read_timestamp(object, shape, Field::PlanStart),
        receive_date,
        gross_amount: Decimal::ZERO,
        fee_amount: Decimal::ZERO,
        net_amount: Decimal::ZERO,
    })
}

/// Charge id of a charge-keyed event
pub fn charge_id(event: &InboundEvent) -> BillingResult<String> {
    accessor::required_str(event.object(), "id", Field::ChargeId.name())
}

/// Failure code and message of a `charge.failed` event
pub fn charge_failure(event: &InboundEvent) -> BillingResult<(String, String)> {
    let object = event.object();
    Ok((
        accessor::required_str(object, "failure_code", "failure_code")?,
        accessor::required_str(object, "failure_message", "failure_message")?,
    ))
}

/// Cumulative refunded amount of a `charge.refunded` event, in major units
pub fn charge_refund(event: &InboundEvent) -> BillingResult<Decimal> {
    accessor::required_i64(event.object(), "amount_refunded", "amount_refunded")
        .map(minor_to_major)
}

/// Produces [`NormalizedEventData`] with amounts resolved from the charge
#[derive(Clone)]
pub struct EventNormalizer {
    amounts: AmountResolver,
}

impl EventNormalizer {
    pub fn new(amounts: AmountResolver) -> Self {
        Self { amounts }
    }

    pub async fn normalize(
        &self,
        event: &InboundEvent,
        shape: ObjectShape,
    ) -> BillingResult<NormalizedEventData> {
        let mut data = extract(event, shape)?;

        let amounts = self.amounts.resolve(data.charge_id.as_deref()).await?;
        data.gross_amount = amounts.gross;
        data.fee_amount = amounts.fee;
        data.net_amount = amounts.net;

        Ok(data)
    }
}
