//! Locates the ledger rows an event applies to

use std::sync::Arc;

use ledgerhook_shared::{Contribution, RecurringSubscription};

use crate::error::{BillingError, BillingResult};
use crate::ledger::Ledger;
use crate::processor::Processor;

/// Recurring subscription and its most recent contribution
#[derive(Debug, Clone)]
pub struct LedgerState {
    pub recurring: RecurringSubscription,
    /// Latest contribution in the current test/live mode. A missing
    /// `invoice_id` is filled from its originating charge when it has one.
    pub contribution: Option<Contribution>,
}

#[derive(Clone)]
pub struct LedgerResolver {
    ledger: Arc<dyn Ledger>,
    processor: Arc<dyn Processor>,
    test_mode: bool,
}

impl LedgerResolver {
    pub fn new(ledger: Arc<dyn Ledger>, processor: Arc<dyn Processor>, test_mode: bool) -> Self {
        Self {
            ledger,
            processor,
            test_mode,
        }
    }

    pub async fn resolve(&self, subscription_id: &str) -> BillingResult<LedgerState> {
        let recurring = self
            .ledger
            .find_recurring_by_subscription_trxn(subscription_id)
            .await?
            .ok_or_else(|| BillingError::RecurringNotFound(subscription_id.to_string()))?;

        let mut contribution = self
            .ledger
            .find_latest_contribution(recurring.id, self.test_mode)
            .await?;

        if let Some(latest) = contribution.as_mut().filter(|c| c.invoice_id.is_none()) {
            if let Some(trxn_id) = latest.trxn_id.as_deref() {
                let charge = self.processor.fetch_charge(trxn_id).await.map_err(|e| {
                    BillingError::UpstreamUnavailable(format!(
                        "Could not fetch charge {} for contribution {}: {}",
                        trxn_id, latest.id, e
                    ))
                })?;
                latest.invoice_id = charge.invoice;
            }
        }

        tracing::debug!(
            recur_id = recurring.id,
            contribution_id = contribution.as_ref().map(|c| c.id),
            "Resolved ledger state"
        );

        Ok(LedgerState {
            recurring,
            contribution,
        })
    }
}
