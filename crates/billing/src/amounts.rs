//! Gross, fee and net amounts for a charge

use std::sync::Arc;

use ledgerhook_shared::minor_to_major;
use rust_decimal::Decimal;

use crate::error::{BillingError, BillingResult};
use crate::processor::Processor;

/// Settled amounts in major units. `net == gross - fee` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChargeAmounts {
    pub gross: Decimal,
    pub fee: Decimal,
    pub net: Decimal,
}

impl ChargeAmounts {
    pub fn from_minor(gross: i64, fee: i64) -> Self {
        let gross = minor_to_major(gross);
        let fee = minor_to_major(fee);
        Self {
            gross,
            fee,
            net: gross - fee,
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }
}

#[derive(Clone)]
pub struct AmountResolver {
    processor: Arc<dyn Processor>,
}

impl AmountResolver {
    pub fn new(processor: Arc<dyn Processor>) -> Self {
        Self { processor }
    }

    /// Resolve amounts for an optional charge reference.
    ///
    /// No charge (credits, adjustments) and a declined charge with no
    /// balance transaction both yield zeros. Fetch errors are fatal.
    pub async fn resolve(&self, charge_id: Option<&str>) -> BillingResult<ChargeAmounts> {
        let Some(charge_id) = charge_id else {
            return Ok(ChargeAmounts::zero());
        };

        let failed = |e: BillingError| BillingError::AmountResolutionFailed {
            charge_id: charge_id.to_string(),
            reason: e.to_string(),
        };

        let charge = self.processor.fetch_charge(charge_id).await.map_err(failed)?;

        let Some(txn_id) = charge.balance_transaction.as_deref() else {
            tracing::info!(charge_id = %charge_id, "Charge has no balance transaction, amounts are zero");
            return Ok(ChargeAmounts::zero());
        };

        let txn = self
            .processor
            .fetch_balance_transaction(txn_id)
            .await
            .map_err(failed)?;

        Ok(ChargeAmounts::from_minor(charge.amount, txn.fee))
    }
}
