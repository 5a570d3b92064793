//! Email receipt preference for one event's processing

use ledgerhook_shared::RecurId;

use crate::error::BillingResult;
use crate::ledger::Ledger;

/// An explicit override wins. Otherwise the subscription's stored preference
/// is read on first use and reused for the rest of the event.
#[derive(Debug, Clone)]
pub struct ReceiptPreference {
    override_value: Option<bool>,
    recur_id: Option<RecurId>,
    cached: Option<bool>,
}

impl ReceiptPreference {
    pub fn new(override_value: Option<bool>, recur_id: Option<RecurId>) -> Self {
        Self {
            override_value,
            recur_id,
            cached: None,
        }
    }

    pub async fn get(&mut self, ledger: &dyn Ledger) -> BillingResult<bool> {
        if let Some(value) = self.override_value {
            return Ok(value);
        }
        if let Some(value) = self.cached {
            return Ok(value);
        }

        let value = match self.recur_id {
            Some(id) => ledger.get_recurring_email_receipt_pref(id).await?,
            None => false,
        };
        self.cached = Some(value);
        Ok(value)
    }
}
