//! Common types used across Ledgerhook

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

// =============================================================================
// ID Wrappers
// =============================================================================

/// Ledger row id for a recurring subscription
pub type RecurId = i64;

/// Ledger row id for a contribution
pub type ContributionId = i64;

// =============================================================================
// Money
// =============================================================================

/// Convert processor minor units (cents) into ledger major units.
///
/// The conversion is exact: 10000 becomes 100.00 and 320 becomes 3.20.
pub fn minor_to_major(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

// =============================================================================
// Enums
// =============================================================================

/// Status of a single contribution (payment instance)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContributionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
    Refunded,
    PartiallyRefunded,
}

impl Default for ContributionStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl ContributionStatus {
    /// Whether the ledger still awaits payment for this contribution
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for ContributionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Refunded => write!(f, "refunded"),
            Self::PartiallyRefunded => write!(f, "partially_refunded"),
        }
    }
}

impl std::str::FromStr for ContributionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "refunded" => Ok(Self::Refunded),
            "partially_refunded" => Ok(Self::PartiallyRefunded),
            _ => Err(format!("Invalid contribution status: {}", s)),
        }
    }
}

/// Status of a recurring subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RecurStatus {
    Pending,
    InProgress,
    Failed,
    Cancelled,
    Completed,
}

impl Default for RecurStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for RecurStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for RecurStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(' ', "_").as_str() {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Invalid recurring status: {}", s)),
        }
    }
}

/// Processor event types the reconciliation engine dispatches on.
///
/// Anything outside the handled set is kept verbatim in `Other` so it can be
/// logged and acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    InvoicePaymentSucceeded,
    InvoicePaymentFailed,
    SubscriptionDeleted,
    SubscriptionUpdated,
    ChargeFailed,
    ChargeRefunded,
    ChargeSucceeded,
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::InvoicePaymentSucceeded => "invoice.payment_succeeded",
            Self::InvoicePaymentFailed => "invoice.payment_failed",
            Self::SubscriptionDeleted => "customer.subscription.deleted",
            Self::SubscriptionUpdated => "customer.subscription.updated",
            Self::ChargeFailed => "charge.failed",
            Self::ChargeRefunded => "charge.refunded",
            Self::ChargeSucceeded => "charge.succeeded",
            Self::Other(s) => s.as_str(),
        }
    }

    /// Whether the event acts on a recurring subscription and cannot be
    /// processed without one
    pub fn requires_subscription(&self) -> bool {
        matches!(
            self,
            Self::InvoicePaymentSucceeded
                | Self::InvoicePaymentFailed
                | Self::SubscriptionDeleted
                | Self::SubscriptionUpdated
        )
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        match s {
            "invoice.payment_succeeded" => Self::InvoicePaymentSucceeded,
            "invoice.payment_failed" => Self::InvoicePaymentFailed,
            "customer.subscription.deleted" => Self::SubscriptionDeleted,
            "customer.subscription.updated" => Self::SubscriptionUpdated,
            "charge.failed" => Self::ChargeFailed,
            "charge.refunded" => Self::ChargeRefunded,
            "charge.succeeded" => Self::ChargeSucceeded,
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Database Models
// =============================================================================

/// Recurring subscription mirrored from the processor.
///
/// `trxn_id` holds the processor subscription id; at most one active row
/// exists per processor subscription.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RecurringSubscription {
    pub id: RecurId,
    pub contact_id: Option<i64>,
    pub trxn_id: String,
    pub status: RecurStatus,
    pub failure_count: i32,
    pub amount: Decimal,
    pub currency: String,
    pub frequency_unit: String,
    pub frequency_interval: i32,
    pub auto_renew: bool,
    pub is_email_receipt: bool,
    pub is_test: bool,
    pub created_date: OffsetDateTime,
    pub modified_date: Option<OffsetDateTime>,
    pub cancel_date: Option<OffsetDateTime>,
}

/// A single payment instance, optionally belonging to a recurring subscription
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Contribution {
    pub id: ContributionId,
    pub contact_id: Option<i64>,
    pub contribution_recur_id: Option<RecurId>,
    pub status: ContributionStatus,
    pub invoice_id: Option<String>,
    pub trxn_id: Option<String>,
    pub total_amount: Decimal,
    pub fee_amount: Decimal,
    pub net_amount: Decimal,
    pub refunded_amount: Decimal,
    pub currency: String,
    pub receive_date: OffsetDateTime,
    pub is_test: bool,
    pub note: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_minor_to_major() {
        assert_eq!(minor_to_major(10000).to_string(), "100.00");
        assert_eq!(minor_to_major(320).to_string(), "3.20");
        assert_eq!(minor_to_major(10000) - minor_to_major(320), Decimal::new(9680, 2));
        assert_eq!(minor_to_major(0), Decimal::ZERO);
    }

    #[test]
    fn test_contribution_status_display() {
        assert_eq!(ContributionStatus::Pending.to_string(), "pending");
        assert_eq!(
            ContributionStatus::PartiallyRefunded.to_string(),
            "partially_refunded"
        );
    }

    #[test]
    fn test_contribution_status_from_str() {
        assert_eq!(
            "Completed".parse::<ContributionStatus>().unwrap(),
            ContributionStatus::Completed
        );
        assert!("settled".parse::<ContributionStatus>().is_err());
    }

    #[test]
    fn test_recur_status_from_str() {
        assert_eq!(
            "In Progress".parse::<RecurStatus>().unwrap(),
            RecurStatus::InProgress
        );
        assert_eq!(
            "in_progress".parse::<RecurStatus>().unwrap(),
            RecurStatus::InProgress
        );
        assert!("paused".parse::<RecurStatus>().is_err());
    }

    #[test]
    fn test_event_type_round_trip_known() {
        for name in [
            "invoice.payment_succeeded",
            "invoice.payment_failed",
            "customer.subscription.deleted",
            "customer.subscription.updated",
            "charge.failed",
            "charge.refunded",
            "charge.succeeded",
        ] {
            let parsed = EventType::from(name);
            assert!(!matches!(parsed, EventType::Other(_)), "{} should be known", name);
            assert_eq!(parsed.to_string(), name);
        }
    }

    #[test]
    fn test_event_type_unknown_is_preserved() {
        let parsed = EventType::from("foo.bar");
        assert_eq!(parsed, EventType::Other("foo.bar".to_string()));
        assert_eq!(parsed.as_str(), "foo.bar");
        assert!(!parsed.requires_subscription());
    }

    #[test]
    fn test_requires_subscription() {
        assert!(EventType::InvoicePaymentSucceeded.requires_subscription());
        assert!(EventType::SubscriptionUpdated.requires_subscription());
        assert!(!EventType::ChargeSucceeded.requires_subscription());
        assert!(!EventType::ChargeRefunded.requires_subscription());
    }
}
