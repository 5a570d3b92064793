//! In-memory collaborators for engine tests

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use ledgerhook_shared::{
    Contribution, ContributionId, ContributionStatus, RecurId, RecurStatus,
    RecurringSubscription,
};
use rust_decimal::Decimal;
use serde_json::Value;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::ledger::{
    CompletePayment, ContributionUpdate, IntentLog, Ledger, NewContribution, PaymentIntentRecord,
    RecurringUpdate, RefundPayment, RepeatPayment,
};
use crate::processor::{
    BalanceTransaction, Charge, CreatePaymentIntent, PaymentIntent, PaymentIntents, Processor,
};

pub fn recurring(trxn_id: &str, is_test: bool) -> RecurringSubscription {
    RecurringSubscription {
        id: 0,
        contact_id: Some(42),
        trxn_id: trxn_id.to_string(),
        status: RecurStatus::InProgress,
        failure_count: 0,
        amount: Decimal::new(2500, 2),
        currency: "usd".to_string(),
        frequency_unit: "month".to_string(),
        frequency_interval: 1,
        auto_renew: false,
        is_email_receipt: true,
        is_test,
        created_date: OffsetDateTime::UNIX_EPOCH,
        modified_date: None,
        cancel_date: None,
    }
}

pub fn contribution(recur_id: RecurId, status: ContributionStatus, is_test: bool) -> Contribution {
    Contribution {
        id: 0,
        contact_id: Some(42),
        contribution_recur_id: Some(recur_id),
        status,
        invoice_id: None,
        trxn_id: None,
        total_amount: Decimal::new(2500, 2),
        fee_amount: Decimal::ZERO,
        net_amount: Decimal::new(2500, 2),
        refunded_amount: Decimal::ZERO,
        currency: "usd".to_string(),
        receive_date: OffsetDateTime::UNIX_EPOCH,
        is_test,
        note: None,
    }
}

#[derive(Default)]
struct LedgerState {
    next_id: i64,
    recurring: Vec<RecurringSubscription>,
    contributions: Vec<Contribution>,
    intents: Vec<PaymentIntentRecord>,
    mutations: usize,
    receipt_pref_reads: usize,
    receipts_sent: usize,
}

impl LedgerState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn latest(&self, recur_id: RecurId, test_mode: bool) -> Option<&Contribution> {
        self.contributions
            .iter()
            .filter(|c| c.contribution_recur_id == Some(recur_id) && c.is_test == test_mode)
            .max_by_key(|c| c.id)
    }

    fn contribution_mut(&mut self, id: ContributionId) -> BillingResult<&mut Contribution> {
        self.contributions
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| BillingError::ContributionNotFound(id.to_string()))
    }

    fn recurring_mut(&mut self, id: RecurId) -> BillingResult<&mut RecurringSubscription> {
        self.recurring
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| BillingError::RecurringNotFound(id.to_string()))
    }
}

/// Ledger over `Mutex`-guarded vectors, mirroring the Postgres semantics
#[derive(Default)]
pub struct FakeLedger {
    state: Mutex<LedgerState>,
}

#[allow(clippy::unwrap_used)]
impl FakeLedger {
    pub fn insert_recurring(&self, mut recur: RecurringSubscription) -> RecurringSubscription {
        let mut state = self.state.lock().unwrap();
        recur.id = state.next_id();
        state.recurring.push(recur.clone());
        recur
    }

    pub fn insert_contribution(&self, mut contribution: Contribution) -> Contribution {
        let mut state = self.state.lock().unwrap();
        contribution.id = state.next_id();
        state.contributions.push(contribution.clone());
        contribution
    }

    pub fn recurring(&self, id: RecurId) -> RecurringSubscription {
        let state = self.state.lock().unwrap();
        state.recurring.iter().find(|r| r.id == id).cloned().unwrap()
    }

    pub fn contributions(&self) -> Vec<Contribution> {
        self.state.lock().unwrap().contributions.clone()
    }

    pub fn intents(&self) -> Vec<PaymentIntentRecord> {
        self.state.lock().unwrap().intents.clone()
    }

    /// Number of mutating ledger calls made through the trait
    pub fn mutations(&self) -> usize {
        self.state.lock().unwrap().mutations
    }

    pub fn receipt_pref_reads(&self) -> usize {
        self.state.lock().unwrap().receipt_pref_reads
    }

    /// Completions and repeats recorded with a receipt requested
    pub fn receipts_sent(&self) -> usize {
        self.state.lock().unwrap().receipts_sent
    }
}

#[allow(clippy::unwrap_used)]
#[async_trait]
impl Ledger for FakeLedger {
    async fn find_recurring_by_subscription_trxn(
        &self,
        trxn_id: &str,
    ) -> BillingResult<Option<RecurringSubscription>> {
        let state = self.state.lock().unwrap();
        let mut matches: Vec<&RecurringSubscription> = state
            .recurring
            .iter()
            .filter(|r| r.trxn_id == trxn_id)
            .collect();
        matches.sort_by_key(|r| (r.status == RecurStatus::Cancelled, std::cmp::Reverse(r.id)));
        Ok(matches.first().map(|r| (*r).clone()))
    }

    async fn find_latest_contribution(
        &self,
        recur_id: RecurId,
        test_mode: bool,
    ) -> BillingResult<Option<Contribution>> {
        let state = self.state.lock().unwrap();
        Ok(state.latest(recur_id, test_mode).cloned())
    }

    async fn find_contribution_by_trxn(
        &self,
        trxn_id: &str,
    ) -> BillingResult<Option<Contribution>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .contributions
            .iter()
            .filter(|c| c.trxn_id.as_deref() == Some(trxn_id))
            .max_by_key(|c| c.id)
            .cloned())
    }

    async fn create_contribution(&self, fields: NewContribution) -> BillingResult<Contribution> {
        let mut state = self.state.lock().unwrap();
        state.mutations += 1;
        if fields.is_email_receipt {
            state.receipts_sent += 1;
        }
        let contribution = Contribution {
            id: state.next_id(),
            contact_id: fields.contact_id,
            contribution_recur_id: fields.contribution_recur_id,
            status: fields.status,
            invoice_id: fields.invoice_id,
            trxn_id: fields.trxn_id,
            total_amount: fields.total_amount,
            fee_amount: fields.fee_amount,
            net_amount: fields.net_amount,
            refunded_amount: Decimal::ZERO,
            currency: fields.currency,
            receive_date: fields.receive_date,
            is_test: fields.is_test,
            note: None,
        };
        state.contributions.push(contribution.clone());
        Ok(contribution)
    }

    async fn update_contribution(
        &self,
        id: ContributionId,
        fields: ContributionUpdate,
    ) -> BillingResult<()> {
        let mut state = self.state.lock().unwrap();
        state.mutations += 1;
        let c = state.contribution_mut(id)?;
        if let Some(status) = fields.status {
            c.status = status;
        }
        if let Some(date) = fields.receive_date {
            c.receive_date = date;
        }
        if let Some(trxn_id) = fields.trxn_id {
            c.trxn_id = Some(trxn_id);
        }
        if let Some(total) = fields.total_amount {
            c.total_amount = total;
            c.net_amount = total - c.fee_amount;
        }
        if let Some(recur_id) = fields.contribution_recur_id {
            c.contribution_recur_id = Some(recur_id);
        }
        if let Some(note) = fields.note {
            c.note = Some(note);
        }
        Ok(())
    }

    async fn complete_contribution(
        &self,
        id: ContributionId,
        fields: CompletePayment,
    ) -> BillingResult<()> {
        let mut state = self.state.lock().unwrap();
        state.mutations += 1;
        let c = state.contribution_mut(id)?;
        if !c.status.is_pending() {
            return Ok(());
        }
        c.status = ContributionStatus::Completed;
        if fields.trxn_id.is_some() {
            c.trxn_id = fields.trxn_id;
        }
        if fields.invoice_id.is_some() {
            c.invoice_id = fields.invoice_id;
        }
        c.receive_date = fields.trxn_date;
        c.total_amount = fields.total_amount;
        c.fee_amount = fields.fee_amount;
        c.net_amount = fields.net_amount;
        if fields.send_receipt {
            state.receipts_sent += 1;
        }
        Ok(())
    }

    async fn repeat_contribution(
        &self,
        recur_id: RecurId,
        fields: RepeatPayment,
    ) -> BillingResult<Contribution> {
        let (contact_id, currency) = {
            let state = self.state.lock().unwrap();
            let recur = state
                .recurring
                .iter()
                .find(|r| r.id == recur_id)
                .ok_or_else(|| BillingError::RecurringNotFound(recur_id.to_string()))?;
            match state.latest(recur_id, fields.is_test) {
                Some(t) => (t.contact_id, t.currency.clone()),
                None => (recur.contact_id, recur.currency.clone()),
            }
        };

        self.create_contribution(NewContribution {
            contact_id,
            contribution_recur_id: Some(recur_id),
            status: fields.status,
            invoice_id: fields.invoice_id,
            trxn_id: fields.trxn_id,
            total_amount: fields.total_amount,
            fee_amount: fields.fee_amount,
            net_amount: fields.total_amount - fields.fee_amount,
            currency,
            receive_date: fields.receive_date,
            is_test: fields.is_test,
            is_email_receipt: fields.send_receipt,
        })
        .await
    }

    async fn record_refund(&self, id: ContributionId, fields: RefundPayment) -> BillingResult<()> {
        let mut state = self.state.lock().unwrap();
        state.mutations += 1;
        let c = state.contribution_mut(id)?;
        c.refunded_amount = fields.amount_refunded;
        c.status = if fields.amount_refunded >= c.total_amount {
            ContributionStatus::Refunded
        } else {
            ContributionStatus::PartiallyRefunded
        };
        Ok(())
    }

    async fn update_recurring(&self, id: RecurId, fields: RecurringUpdate) -> BillingResult<()> {
        let mut state = self.state.lock().unwrap();
        state.mutations += 1;
        let r = state.recurring_mut(id)?;
        if let Some(status) = fields.status {
            r.status = status;
        }
        if let Some(count) = fields.failure_count {
            r.failure_count = count;
        }
        r.modified_date = Some(fields.modified_date.unwrap_or_else(OffsetDateTime::now_utc));
        if let Some(amount) = fields.amount {
            r.amount = amount;
        }
        if let Some(unit) = fields.frequency_unit {
            r.frequency_unit = unit;
        }
        if let Some(interval) = fields.frequency_interval {
            r.frequency_interval = interval;
        }
        if let Some(created) = fields.created_date {
            r.created_date = created;
        }
        if let Some(auto_renew) = fields.auto_renew {
            r.auto_renew = auto_renew;
        }
        Ok(())
    }

    async fn cancel_recurring(&self, id: RecurId) -> BillingResult<()> {
        let mut state = self.state.lock().unwrap();
        state.mutations += 1;
        let r = state.recurring_mut(id)?;
        if r.status != RecurStatus::Cancelled {
            let now = OffsetDateTime::now_utc();
            r.status = RecurStatus::Cancelled;
            r.cancel_date = Some(now);
            r.modified_date = Some(now);
        }
        Ok(())
    }

    async fn get_recurring_email_receipt_pref(&self, id: RecurId) -> BillingResult<bool> {
        let mut state = self.state.lock().unwrap();
        state.receipt_pref_reads += 1;
        let pref = state.recurring_mut(id)?.is_email_receipt;
        Ok(pref)
    }
}

#[allow(clippy::unwrap_used)]
#[async_trait]
impl IntentLog for FakeLedger {
    async fn record_payment_intent(&self, record: PaymentIntentRecord) -> BillingResult<()> {
        self.state.lock().unwrap().intents.push(record);
        Ok(())
    }
}

#[derive(Default)]
struct ProcessorState {
    events: HashMap<String, Value>,
    charges: HashMap<String, Charge>,
    balance_transactions: HashMap<String, BalanceTransaction>,
    payment_intents: HashMap<String, PaymentIntent>,
    next_create: Option<BillingResult<PaymentIntent>>,
    created: Vec<CreatePaymentIntent>,
    calls: usize,
}

/// Processor backed by registered objects; anything unregistered is "No such ..."
#[derive(Default)]
pub struct FakeProcessor {
    state: Mutex<ProcessorState>,
}

#[allow(clippy::unwrap_used)]
impl FakeProcessor {
    pub fn add_event(&self, event: Value) {
        let id = event["id"].as_str().unwrap().to_string();
        self.state.lock().unwrap().events.insert(id, event);
    }

    pub fn add_charge(&self, charge: Charge) {
        self.state
            .lock()
            .unwrap()
            .charges
            .insert(charge.id.clone(), charge);
    }

    pub fn add_balance_transaction(&self, txn: BalanceTransaction) {
        self.state
            .lock()
            .unwrap()
            .balance_transactions
            .insert(txn.id.clone(), txn);
    }

    pub fn add_payment_intent(&self, intent: PaymentIntent) {
        self.state
            .lock()
            .unwrap()
            .payment_intents
            .insert(intent.id.clone(), intent);
    }

    /// Result returned by the next `create_payment_intent`
    pub fn on_create(&self, result: BillingResult<PaymentIntent>) {
        self.state.lock().unwrap().next_create = Some(result);
    }

    pub fn created(&self) -> Vec<CreatePaymentIntent> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn payment_intent(&self, id: &str) -> Option<PaymentIntent> {
        self.state.lock().unwrap().payment_intents.get(id).cloned()
    }

    /// Number of processor calls made through the traits
    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().calls
    }

    fn transition(&self, id: &str, from: &str, to: &str) -> BillingResult<PaymentIntent> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        let intent = state
            .payment_intents
            .get_mut(id)
            .ok_or_else(|| BillingError::ProcessorRejected(format!("No such payment_intent: '{}'", id)))?;
        if intent.status != from {
            return Err(BillingError::ProcessorRejected(format!(
                "PaymentIntent {} has status {}",
                id, intent.status
            )));
        }
        intent.status = to.to_string();
        Ok(intent.clone())
    }
}

#[allow(clippy::unwrap_used)]
#[async_trait]
impl Processor for FakeProcessor {
    async fn fetch_event(&self, event_id: &str) -> BillingResult<Value> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        state
            .events
            .get(event_id)
            .cloned()
            .ok_or_else(|| BillingError::ProcessorRejected(format!("No such event: '{}'", event_id)))
    }

    async fn fetch_charge(&self, charge_id: &str) -> BillingResult<Charge> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        state
            .charges
            .get(charge_id)
            .cloned()
            .ok_or_else(|| BillingError::ProcessorRejected(format!("No such charge: '{}'", charge_id)))
    }

    async fn fetch_balance_transaction(&self, id: &str) -> BillingResult<BalanceTransaction> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        state.balance_transactions.get(id).cloned().ok_or_else(|| {
            BillingError::ProcessorRejected(format!("No such balance_transaction: '{}'", id))
        })
    }
}

#[allow(clippy::unwrap_used)]
#[async_trait]
impl PaymentIntents for FakeProcessor {
    async fn retrieve_payment_intent(&self, id: &str) -> BillingResult<PaymentIntent> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        state.payment_intents.get(id).cloned().ok_or_else(|| {
            BillingError::ProcessorRejected(format!("No such payment_intent: '{}'", id))
        })
    }

    async fn confirm_payment_intent(&self, id: &str) -> BillingResult<PaymentIntent> {
        self.transition(id, "requires_confirmation", "requires_capture")
    }

    async fn capture_payment_intent(&self, id: &str) -> BillingResult<PaymentIntent> {
        self.transition(id, "requires_capture", "succeeded")
    }

    async fn create_payment_intent(
        &self,
        params: CreatePaymentIntent,
    ) -> BillingResult<PaymentIntent> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        state.created.push(params);
        state.next_create.take().unwrap_or_else(|| {
            Err(BillingError::UpstreamUnavailable(
                "no create response registered".to_string(),
            ))
        })
    }
}
