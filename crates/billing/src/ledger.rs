//! Ledger collaborator
//!
//! The reconciliation engine reads and mutates recurring subscriptions and
//! contributions only through [`Ledger`]. Every mutation here is written so
//! that applying it twice leaves the same end state as applying it once:
//! completions only touch pending rows, status/amount updates set absolute
//! values, cancellation is a no-op on a cancelled row and refunds record the
//! processor's cumulative refunded figure.

use async_trait::async_trait;
use ledgerhook_shared::{
    Contribution, ContributionId, ContributionStatus, RecurId, RecurStatus,
    RecurringSubscription,
};
use rust_decimal::Decimal;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};

/// Fields for a brand-new contribution row
#[derive(Debug, Clone)]
pub struct NewContribution {
    pub contact_id: Option<i64>,
    pub contribution_recur_id: Option<RecurId>,
    pub status: ContributionStatus,
    pub invoice_id: Option<String>,
    pub trxn_id: Option<String>,
    pub total_amount: Decimal,
    pub fee_amount: Decimal,
    pub net_amount: Decimal,
    pub currency: String,
    pub receive_date: OffsetDateTime,
    pub is_test: bool,
    pub is_email_receipt: bool,
}

/// Partial update of a contribution; `None` leaves the column untouched
#[derive(Debug, Clone, Default)]
pub struct ContributionUpdate {
    pub status: Option<ContributionStatus>,
    pub receive_date: Option<OffsetDateTime>,
    pub trxn_id: Option<String>,
    pub total_amount: Option<Decimal>,
    pub contribution_recur_id: Option<RecurId>,
    pub note: Option<String>,
    pub is_email_receipt: Option<bool>,
}

/// Completion of a pending contribution with settled amounts
#[derive(Debug, Clone)]
pub struct CompletePayment {
    pub invoice_id: Option<String>,
    pub trxn_id: Option<String>,
    pub trxn_date: OffsetDateTime,
    pub total_amount: Decimal,
    pub fee_amount: Decimal,
    pub net_amount: Decimal,
    pub payment_processor_id: i64,
    pub send_receipt: bool,
}

/// A new billing cycle recorded by repeating the subscription's last payment
#[derive(Debug, Clone)]
pub struct RepeatPayment {
    pub status: ContributionStatus,
    pub receive_date: OffsetDateTime,
    pub invoice_id: Option<String>,
    pub trxn_id: Option<String>,
    pub total_amount: Decimal,
    pub fee_amount: Decimal,
    pub send_receipt: bool,
    /// Mode the row is written in; must match the mode later lookups scope by
    pub is_test: bool,
}

/// Cumulative refund reported by the processor
#[derive(Debug, Clone)]
pub struct RefundPayment {
    pub amount_refunded: Decimal,
    pub refund_date: OffsetDateTime,
}

/// Partial update of a recurring subscription; `None` leaves the column untouched
#[derive(Debug, Clone, Default)]
pub struct RecurringUpdate {
    pub status: Option<RecurStatus>,
    pub failure_count: Option<i32>,
    pub modified_date: Option<OffsetDateTime>,
    pub amount: Option<Decimal>,
    pub frequency_unit: Option<String>,
    pub frequency_interval: Option<i32>,
    pub created_date: Option<OffsetDateTime>,
    pub auto_renew: Option<bool>,
}

/// A payment intent as seen by the confirmation flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntentRecord {
    pub paymentintent_id: String,
    pub payment_processor_id: i64,
    pub status: String,
    pub description: String,
    pub referrer: Option<String>,
}

/// Local subscription/contribution ledger
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn find_recurring_by_subscription_trxn(
        &self,
        trxn_id: &str,
    ) -> BillingResult<Option<RecurringSubscription>>;

    /// Most recent contribution of a subscription within one test/live mode
    async fn find_latest_contribution(
        &self,
        recur_id: RecurId,
        test_mode: bool,
    ) -> BillingResult<Option<Contribution>>;

    async fn find_contribution_by_trxn(&self, trxn_id: &str)
        -> BillingResult<Option<Contribution>>;

    async fn create_contribution(&self, fields: NewContribution) -> BillingResult<Contribution>;

    async fn update_contribution(
        &self,
        id: ContributionId,
        fields: ContributionUpdate,
    ) -> BillingResult<()>;

    /// Complete a pending contribution. Rows that are no longer pending are left alone.
    async fn complete_contribution(
        &self,
        id: ContributionId,
        fields: CompletePayment,
    ) -> BillingResult<()>;

    /// Append a contribution for the subscription, copying the previous one
    async fn repeat_contribution(
        &self,
        recur_id: RecurId,
        fields: RepeatPayment,
    ) -> BillingResult<Contribution>;

    async fn record_refund(&self, id: ContributionId, fields: RefundPayment) -> BillingResult<()>;

    async fn update_recurring(&self, id: RecurId, fields: RecurringUpdate) -> BillingResult<()>;

    /// Cancel a subscription. Cancelling a cancelled subscription changes nothing.
    async fn cancel_recurring(&self, id: RecurId) -> BillingResult<()>;

    async fn get_recurring_email_receipt_pref(&self, id: RecurId) -> BillingResult<bool>;
}

/// Storage for the confirmation flow's payment intent trail
#[async_trait]
pub trait IntentLog: Send + Sync {
    async fn record_payment_intent(&self, record: PaymentIntentRecord) -> BillingResult<()>;
}

const RECUR_COLUMNS: &str = "id, contact_id, trxn_id, status, failure_count, amount, currency, \
     frequency_unit, frequency_interval, auto_renew, is_email_receipt, is_test, \
     created_date, modified_date, cancel_date";

const CONTRIBUTION_COLUMNS: &str = "id, contact_id, contribution_recur_id, status, invoice_id, \
     trxn_id, total_amount, fee_amount, net_amount, refunded_amount, currency, receive_date, \
     is_test, note";

/// Postgres-backed ledger
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn get_recurring(&self, id: RecurId) -> BillingResult<RecurringSubscription> {
        let recur: Option<RecurringSubscription> = sqlx::query_as(&format!(
            "SELECT {} FROM contribution_recur WHERE id = $1",
            RECUR_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        recur.ok_or_else(|| BillingError::RecurringNotFound(id.to_string()))
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn find_recurring_by_subscription_trxn(
        &self,
        trxn_id: &str,
    ) -> BillingResult<Option<RecurringSubscription>> {
        // Prefer the live row; a cancelled one still resolves so that
        // redelivered cancellations acknowledge cleanly.
        let recur: Option<RecurringSubscription> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM contribution_recur
            WHERE trxn_id = $1
            ORDER BY (status = 'cancelled') ASC, id DESC
            LIMIT 1
            "#,
            RECUR_COLUMNS
        ))
        .bind(trxn_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(recur)
    }

    async fn find_latest_contribution(
        &self,
        recur_id: RecurId,
        test_mode: bool,
    ) -> BillingResult<Option<Contribution>> {
        let contribution: Option<Contribution> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM contributions
            WHERE contribution_recur_id = $1 AND is_test = $2
            ORDER BY id DESC
            LIMIT 1
            "#,
            CONTRIBUTION_COLUMNS
        ))
        .bind(recur_id)
        .bind(test_mode)
        .fetch_optional(&self.pool)
        .await?;

        Ok(contribution)
    }

    async fn find_contribution_by_trxn(
        &self,
        trxn_id: &str,
    ) -> BillingResult<Option<Contribution>> {
        let contribution: Option<Contribution> = sqlx::query_as(&format!(
            "SELECT {} FROM contributions WHERE trxn_id = $1 ORDER BY id DESC LIMIT 1",
            CONTRIBUTION_COLUMNS
        ))
        .bind(trxn_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(contribution)
    }

    async fn create_contribution(&self, fields: NewContribution) -> BillingResult<Contribution> {
        let contribution: Contribution = sqlx::query_as(&format!(
            r#"
            INSERT INTO contributions (
                contact_id, contribution_recur_id, status, trxn_id,
                total_amount, fee_amount, net_amount, currency,
                receive_date, is_test, is_email_receipt, invoice_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {}
            "#,
            CONTRIBUTION_COLUMNS
        ))
        .bind(fields.contact_id)
        .bind(fields.contribution_recur_id)
        .bind(fields.status)
        .bind(&fields.trxn_id)
        .bind(fields.total_amount)
        .bind(fields.fee_amount)
        .bind(fields.net_amount)
        .bind(&fields.currency)
        .bind(fields.receive_date)
        .bind(fields.is_test)
        .bind(fields.is_email_receipt)
        .bind(&fields.invoice_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(contribution)
    }

    async fn update_contribution(
        &self,
        id: ContributionId,
        fields: ContributionUpdate,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE contributions SET
                status = COALESCE($2, status),
                receive_date = COALESCE($3, receive_date),
                trxn_id = COALESCE($4, trxn_id),
                total_amount = COALESCE($5, total_amount),
                net_amount = COALESCE($5 - fee_amount, net_amount),
                contribution_recur_id = COALESCE($6, contribution_recur_id),
                note = COALESCE($7, note),
                is_email_receipt = COALESCE($8, is_email_receipt)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(fields.status)
        .bind(fields.receive_date)
        .bind(&fields.trxn_id)
        .bind(fields.total_amount)
        .bind(fields.contribution_recur_id)
        .bind(&fields.note)
        .bind(fields.is_email_receipt)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn complete_contribution(
        &self,
        id: ContributionId,
        fields: CompletePayment,
    ) -> BillingResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE contributions SET
                status = 'completed',
                trxn_id = COALESCE($2, trxn_id),
                receive_date = $3,
                total_amount = $4,
                fee_amount = $5,
                net_amount = $6,
                payment_processor_id = $7,
                is_email_receipt = $8,
                invoice_id = COALESCE($9, invoice_id)
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(&fields.trxn_id)
        .bind(fields.trxn_date)
        .bind(fields.total_amount)
        .bind(fields.fee_amount)
        .bind(fields.net_amount)
        .bind(fields.payment_processor_id)
        .bind(fields.send_receipt)
        .bind(&fields.invoice_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::info!(
                contribution_id = id,
                "Contribution already settled, completion skipped"
            );
        }

        Ok(())
    }

    async fn repeat_contribution(
        &self,
        recur_id: RecurId,
        fields: RepeatPayment,
    ) -> BillingResult<Contribution> {
        let recur = self.get_recurring(recur_id).await?;
        let template = self.find_latest_contribution(recur_id, fields.is_test).await?;

        let (contact_id, currency) = match &template {
            Some(t) => (t.contact_id.or(recur.contact_id), t.currency.clone()),
            None => (recur.contact_id, recur.currency.clone()),
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
        sqlx::query(
            r#"
            UPDATE contributions SET
                refunded_amount = $2,
                status = CASE WHEN $2 >= total_amount THEN 'refunded' ELSE 'partially_refunded' END,
                note = COALESCE(note, 'Refunded ' || to_char($3, 'YYYY-MM-DD'))
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(fields.amount_refunded)
        .bind(fields.refund_date)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_recurring(&self, id: RecurId, fields: RecurringUpdate) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE contribution_recur SET
                status = COALESCE($2, status),
                failure_count = COALESCE($3, failure_count),
                modified_date = COALESCE($4, NOW()),
                amount = COALESCE($5, amount),
                frequency_unit = COALESCE($6, frequency_unit),
                frequency_interval = COALESCE($7, frequency_interval),
                created_date = COALESCE($8, created_date),
                auto_renew = COALESCE($9, auto_renew)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(fields.status)
        .bind(fields.failure_count)
        .bind(fields.modified_date)
        .bind(fields.amount)
        .bind(&fields.frequency_unit)
        .bind(fields.frequency_interval)
        .bind(fields.created_date)
        .bind(fields.auto_renew)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn cancel_recurring(&self, id: RecurId) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE contribution_recur SET
                status = 'cancelled',
                cancel_date = NOW(),
                modified_date = NOW()
            WHERE id = $1 AND status <> 'cancelled'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_recurring_email_receipt_pref(&self, id: RecurId) -> BillingResult<bool> {
        let pref: Option<(bool,)> =
            sqlx::query_as("SELECT is_email_receipt FROM contribution_recur WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        pref.map(|(p,)| p)
            .ok_or_else(|| BillingError::RecurringNotFound(id.to_string()))
    }
}

#[async_trait]
impl IntentLog for PgLedger {
    async fn record_payment_intent(&self, record: PaymentIntentRecord) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_intents (paymentintent_id, payment_processor_id, status, description, referrer)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&record.paymentintent_id)
        .bind(record.payment_processor_id)
        .bind(&record.status)
        .bind(&record.description)
        .bind(&record.referrer)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
