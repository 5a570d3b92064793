//! Reconciliation of processor events onto the ledger
//!
//! Dispatch is on event type; there is no state between events other than
//! the ledger itself. Every branch is written so that a redelivery of an
//! event already applied converges on the same ledger state:
//!
//! - successful payments either complete the pending contribution, append a
//!   contribution for a new invoice, or do nothing when the invoice is
//!   already recorded
//! - failed payments are recorded once per charge
//! - cancellations, plan changes and refunds set absolute values

use std::sync::Arc;

use ledgerhook_shared::{
    Contribution, ContributionId, ContributionStatus, EventType, RecurId, RecurStatus,
};
use rust_decimal::Decimal;
use time::OffsetDateTime;

use crate::amounts::AmountResolver;
use crate::client::StripeConfig;
use crate::error::{BillingError, BillingResult};
use crate::event::InboundEvent;
use crate::ledger::{
    CompletePayment, ContributionUpdate, Ledger, RecurringUpdate, RefundPayment, RepeatPayment,
};
use crate::normalizer::{self, EventNormalizer, NormalizedEventData, ObjectShape};
use crate::processor::Processor;
use crate::receipt::ReceiptPreference;
use crate::resolver::{LedgerResolver, LedgerState};

/// What an event did to the ledger
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// A pending contribution was completed
    Completed { contribution_id: ContributionId },
    /// A new contribution was appended for a new billing cycle
    Repeated {
        contribution_id: ContributionId,
        status: ContributionStatus,
    },
    MarkedFailed { contribution_id: ContributionId },
    Refunded {
        contribution_id: ContributionId,
        amount_refunded: Decimal,
    },
    Cancelled { recur_id: RecurId },
    PlanChanged { recur_id: RecurId },
    /// Handled event type, nothing left to change
    Unchanged,
    /// Event type outside the handled set
    Ignored,
}

impl Reconciliation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reconciliation::Completed { .. } => "completed",
            Reconciliation::Repeated { .. } => "repeated",
            Reconciliation::MarkedFailed { .. } => "marked_failed",
            Reconciliation::Refunded { .. } => "refunded",
            Reconciliation::Cancelled { .. } => "cancelled",
            Reconciliation::PlanChanged { .. } => "plan_changed",
            Reconciliation::Unchanged => "unchanged",
            Reconciliation::Ignored => "ignored",
        }
    }
}

/// Decision for `invoice.payment_succeeded`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SucceededAction {
    CompletePending(ContributionId),
    RepeatCompleted,
    AlreadyRecorded,
}

pub fn decide_payment_succeeded(
    latest: Option<&Contribution>,
    invoice_id: Option<&str>,
) -> SucceededAction {
    match latest {
        Some(c) if c.status.is_pending() => SucceededAction::CompletePending(c.id),
        // A failed attempt on the same invoice still needs its success recorded.
        Some(c)
            if c.status != ContributionStatus::Failed
                && c.invoice_id.as_deref() == invoice_id =>
        {
            SucceededAction::AlreadyRecorded
        }
        _ => SucceededAction::RepeatCompleted,
    }
}

/// Decision for `invoice.payment_failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedAction {
    MarkPendingFailed(ContributionId),
    RepeatFailed,
    AlreadyRecorded,
}

pub fn decide_payment_failed(
    latest: Option<&Contribution>,
    invoice_id: Option<&str>,
    charge_id: Option<&str>,
) -> FailedAction {
    match latest {
        Some(c)
            if c.status == ContributionStatus::Failed
                && charge_id.is_some()
                && c.trxn_id.as_deref() == charge_id =>
        {
            FailedAction::AlreadyRecorded
        }
        Some(c) if c.status.is_pending() && c.invoice_id.as_deref() == invoice_id => {
            FailedAction::MarkPendingFailed(c.id)
        }
        _ => FailedAction::RepeatFailed,
    }
}

/// Process-level settings the engine needs
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub test_mode: bool,
    pub receipt_override: Option<bool>,
    pub payment_processor_id: i64,
}

impl From<&StripeConfig> for EngineSettings {
    fn from(config: &StripeConfig) -> Self {
        Self {
            test_mode: config.test_mode,
            receipt_override: config.send_receipt,
            payment_processor_id: config.payment_processor_id,
        }
    }
}

#[derive(Clone)]
pub struct ReconciliationEngine {
    ledger: Arc<dyn Ledger>,
    normalizer: EventNormalizer,
    resolver: LedgerResolver,
    settings: EngineSettings,
}

impl ReconciliationEngine {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        processor: Arc<dyn Processor>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            normalizer: EventNormalizer::new(AmountResolver::new(processor.clone())),
            resolver: LedgerResolver::new(ledger.clone(), processor, settings.test_mode),
            ledger,
            settings,
        }
    }

    /// Apply one verified event to the ledger
    pub async fn reconcile(&self, event: &InboundEvent) -> BillingResult<Reconciliation> {
        let Some(shape) = ObjectShape::for_event(&event.event_type) else {
            tracing::info!(
                event_id = %event.id,
                event_type = %event.event_type,
                "Unhandled event type, acknowledging"
            );
            return Ok(Reconciliation::Ignored);
        };

        match event.event_type {
            EventType::ChargeFailed => return self.charge_failed(event).await,
            EventType::ChargeRefunded => return self.charge_refunded(event).await,
            _ => {}
        }

        let data = self.normalizer.normalize(event, shape).await?;

        // Charge-keyed events reaching this point resolve without a subscription
        if !event.event_type.requires_subscription() {
            return self.charge_succeeded(&data).await;
        }

        let subscription_id = data
            .subscription_id
            .as_deref()
            .ok_or_else(|| BillingError::MissingField("subscription_id".to_string()))?;
        let state = self.resolver.resolve(subscription_id).await?;

        match event.event_type {
            EventType::InvoicePaymentSucceeded => self.payment_succeeded(&data, state).await,
            EventType::InvoicePaymentFailed => self.payment_failed(&data, state).await,
            EventType::SubscriptionDeleted => self.subscription_deleted(state).await,
            EventType::SubscriptionUpdated => self.subscription_updated(&data, state).await,
            _ => Ok(Reconciliation::Ignored),
        }
    }

    fn receipt_for(&self, recur_id: Option<RecurId>) -> ReceiptPreference {
        ReceiptPreference::new(self.settings.receipt_override, recur_id)
    }

    async fn payment_succeeded(
        &self,
        data: &NormalizedEventData,
        state: LedgerState,
    ) -> BillingResult<Reconciliation> {
        let recur_id = state.recurring.id;
        let mut receipt = self.receipt_for(Some(recur_id));

        let action =
            decide_payment_succeeded(state.contribution.as_ref(), data.invoice_id.as_deref());

        let outcome = match action {
            SucceededAction::CompletePending(contribution_id) => {
                let send_receipt = receipt.get(self.ledger.as_ref()).await?;
                self.ledger
                    .complete_contribution(
                        contribution_id,
                        CompletePayment {
                            invoice_id: data.invoice_id.clone(),
                            trxn_id: data.charge_id.clone(),
                            trxn_date: data.receive_date,
                            total_amount: data.gross_amount,
                            fee_amount: data.fee_amount,
                            net_amount: data.net_amount,
                            payment_processor_id: self.settings.payment_processor_id,
                            send_receipt,
                        },
                    )
                    .await?;
                Reconciliation::Completed { contribution_id }
            }
            SucceededAction::RepeatCompleted => {
                let send_receipt = receipt.get(self.ledger.as_ref()).await?;
                let created = self
                    .ledger
                    .repeat_contribution(
                        recur_id,
                        RepeatPayment {
                            status: ContributionStatus::Completed,
                            receive_date: data.receive_date,
                            invoice_id: data.invoice_id.clone(),
                            trxn_id: data.charge_id.clone(),
                            total_amount: data.gross_amount,
                            fee_amount: data.fee_amount,
                            send_receipt,
                            is_test: self.settings.test_mode,
                        },
                    )
                    .await?;
                Reconciliation::Repeated {
                    contribution_id: created.id,
                    status: ContributionStatus::Completed,
                }
            }
            SucceededAction::AlreadyRecorded => Reconciliation::Unchanged,
        };

        self.ledger
            .update_recurring(
                recur_id,
                RecurringUpdate {
                    status: Some(RecurStatus::InProgress),
                    failure_count: Some(0),
                    ..Default::default()
                },
            )
            .await?;

        tracing::info!(
            recur_id = recur_id,
            invoice_id = ?data.invoice_id,
            charge_id = ?data.charge_id,
            outcome = outcome.as_str(),
            "Recurring payment succeeded"
        );
        Ok(outcome)
    }

    async fn payment_failed(
        &self,
        data: &NormalizedEventData,
        state: LedgerState,
    ) -> BillingResult<Reconciliation> {
        let recur_id = state.recurring.id;
        let fail_date = OffsetDateTime::now_utc();

        let action = decide_payment_failed(
            state.contribution.as_ref(),
            data.invoice_id.as_deref(),
            data.charge_id.as_deref(),
        );

        let outcome = match action {
            FailedAction::AlreadyRecorded => {
                tracing::info!(
                    recur_id = recur_id,
                    charge_id = ?data.charge_id,
                    "Payment failure already recorded"
                );
                return Ok(Reconciliation::Unchanged);
            }
            FailedAction::MarkPendingFailed(contribution_id) => {
                self.ledger
                    .update_contribution(
                        contribution_id,
                        ContributionUpdate {
                            status: Some(ContributionStatus::Failed),
                            receive_date: Some(fail_date),
                            trxn_id: data.charge_id.clone(),
                            is_email_receipt: Some(false),
                            ..Default::default()
                        },
                    )
                    .await?;
                Reconciliation::MarkedFailed { contribution_id }
            }
            FailedAction::RepeatFailed => {
                let created = self
                    .ledger
                    .repeat_contribution(
                        recur_id,
                        RepeatPayment {
                            status: ContributionStatus::Failed,
                            receive_date: fail_date,
                            invoice_id: data.invoice_id.clone(),
                            trxn_id: data.charge_id.clone(),
                            total_amount: data.gross_amount,
                            fee_amount: Decimal::ZERO,
                            send_receipt: false,
                            is_test: self.settings.test_mode,
                        },
                    )
                    .await?;
                Reconciliation::Repeated {
                    contribution_id: created.id,
                    status: ContributionStatus::Failed,
                }
            }
        };

        let failure_count = state.recurring.failure_count.saturating_add(1);
        self.ledger
            .update_recurring(
                recur_id,
                RecurringUpdate {
                    status: Some(RecurStatus::Failed),
                    failure_count: Some(failure_count),
                    modified_date: Some(fail_date),
                    ..Default::default()
                },
            )
            .await?;

        tracing::warn!(
            recur_id = recur_id,
            invoice_id = ?data.invoice_id,
            charge_id = ?data.charge_id,
            failure_count = failure_count,
            outcome = outcome.as_str(),
            "Recurring payment failed"
        );
        Ok(outcome)
    }

    async fn subscription_deleted(&self, state: LedgerState) -> BillingResult<Reconciliation> {
        let recur_id = state.recurring.id;
        self.ledger.cancel_recurring(recur_id).await?;

        tracing::info!(recur_id = recur_id, "Recurring subscription cancelled");
        Ok(Reconciliation::Cancelled { recur_id })
    }

    async fn subscription_updated(
        &self,
        data: &NormalizedEventData,
        state: LedgerState,
    ) -> BillingResult<Reconciliation> {
        if data.previous_plan_id.is_none() {
            tracing::debug!(recur_id = state.recurring.id, "Subscription update is not a plan change");
            return Ok(Reconciliation::Unchanged);
        }

        let recur_id = state.recurring.id;
        self.ledger
            .update_recurring(
                recur_id,
                RecurringUpdate {
                    amount: Some(data.plan_amount),
                    auto_renew: Some(true),
                    created_date: data.plan_start,
                    frequency_unit: data.frequency_unit.clone(),
                    frequency_interval: Some(data.frequency_interval),
                    ..Default::default()
                },
            )
            .await?;

        // The current contribution follows the new plan whatever its status.
        if let Some(contribution) = &state.contribution {
            self.ledger
                .update_contribution(
                    contribution.id,
                    ContributionUpdate {
                        total_amount: Some(data.plan_amount),
                        contribution_recur_id: Some(recur_id),
                        ..Default::default()
                    },
                )
                .await?;
        }

        tracing::info!(
            recur_id = recur_id,
            previous_plan_id = ?data.previous_plan_id,
            plan_id = ?data.plan_id,
            amount = %data.plan_amount,
            "Subscription plan changed"
        );
        Ok(Reconciliation::PlanChanged { recur_id })
    }

    async fn contribution_for_charge(&self, charge_id: &str) -> BillingResult<Contribution> {
        self.ledger
            .find_contribution_by_trxn(charge_id)
            .await?
            .ok_or_else(|| BillingError::ContributionNotFound(charge_id.to_string()))
    }

    async fn charge_failed(&self, event: &InboundEvent) -> BillingResult<Reconciliation> {
        let (failure_code, failure_message) = normalizer::charge_failure(event)?;
        let charge_id = normalizer::charge_id(event)?;
        let contribution = self.contribution_for_charge(&charge_id).await?;

        if contribution.status == ContributionStatus::Failed {
            return Ok(Reconciliation::Unchanged);
        }

        self.ledger
            .update_contribution(
                contribution.id,
                ContributionUpdate {
                    status: Some(ContributionStatus::Failed),
                    note: Some(format!("{} : {}", failure_code, failure_message)),
                    ..Default::default()
                },
            )
            .await?;

        tracing::warn!(
            contribution_id = contribution.id,
            charge_id = %charge_id,
            failure_code = %failure_code,
            "Charge failed"
        );
        Ok(Reconciliation::MarkedFailed {
            contribution_id: contribution.id,
        })
    }

    async fn charge_refunded(&self, event: &InboundEvent) -> BillingResult<Reconciliation> {
        let charge_id = normalizer::charge_id(event)?;
        let amount_refunded = normalizer::charge_refund(event)?;
        let contribution = self.contribution_for_charge(&charge_id).await?;

        self.ledger
            .record_refund(
                contribution.id,
                RefundPayment {
                    amount_refunded,
                    refund_date: OffsetDateTime::now_utc(),
                },
            )
            .await?;

        tracing::info!(
            contribution_id = contribution.id,
            charge_id = %charge_id,
            amount_refunded = %amount_refunded,
            "Charge refunded"
        );
        Ok(Reconciliation::Refunded {
            contribution_id: contribution.id,
            amount_refunded,
        })
    }

    async fn charge_succeeded(&self, data: &NormalizedEventData) -> BillingResult<Reconciliation> {
        let (contribution, recur_id) = match data.subscription_id.as_deref() {
            Some(subscription_id) => {
                let state = self.resolver.resolve(subscription_id).await?;
                (state.contribution, Some(state.recurring.id))
            }
            None => match data.charge_id.as_deref() {
                Some(charge_id) => {
                    let found = self.ledger.find_contribution_by_trxn(charge_id).await?;
                    let recur_id = found.as_ref().and_then(|c| c.contribution_recur_id);
                    (found, recur_id)
                }
                None => (None, None),
            },
        };

        let Some(contribution) = contribution.filter(|c| c.status.is_pending()) else {
            return Ok(Reconciliation::Unchanged);
        };

        let send_receipt = self.receipt_for(recur_id).get(self.ledger.as_ref()).await?;
        self.ledger
            .complete_contribution(
                contribution.id,
                CompletePayment {
                    invoice_id: data.invoice_id.clone(),
                    trxn_id: data.charge_id.clone(),
                    trxn_date: data.receive_date,
                    total_amount: data.gross_amount,
                    fee_amount: data.fee_amount,
                    net_amount: data.net_amount,
                    payment_processor_id: self.settings.payment_processor_id,
                    send_receipt,
                },
            )
            .await?;

        tracing::info!(
            contribution_id = contribution.id,
            charge_id = ?data.charge_id,
            "Charge succeeded, contribution completed"
        );
        Ok(Reconciliation::Completed {
            contribution_id: contribution.id,
        })
    }
}
