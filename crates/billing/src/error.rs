//! Billing error types

use thiserror::Error;

/// Errors that abort processing of a webhook event or payment request.
///
/// Every variant is terminal for the current event. Redelivery by the
/// processor is the only retry path.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Event verification failed: {0}")]
    VerificationFailed(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("No recurring subscription found for subscription ID: {0}")]
    RecurringNotFound(String),

    #[error("No contribution found for transaction ID: {0}")]
    ContributionNotFound(String),

    #[error("Cannot get contribution amounts for charge {charge_id}: {reason}")]
    AmountResolutionFailed { charge_id: String, reason: String },

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Card declined: {message}")]
    CardDeclined {
        message: String,
        decline_code: Option<String>,
    },

    #[error("Processor rejected request: {0}")]
    ProcessorRejected(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BillingError {
    /// Whether the failure came from an unreachable or failing collaborator
    /// rather than from the event itself
    pub fn is_upstream(&self) -> bool {
        matches!(self, BillingError::UpstreamUnavailable(_))
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        match err {
            stripe::StripeError::Stripe(req) => match req.error_type {
                stripe::ErrorType::Card => BillingError::CardDeclined {
                    message: req
                        .message
                        .unwrap_or_else(|| "Your card was declined.".to_string()),
                    decline_code: req.decline_code,
                },
                stripe::ErrorType::InvalidRequest => {
                    BillingError::ProcessorRejected(req.message.unwrap_or_default())
                }
                _ => BillingError::UpstreamUnavailable(format!(
                    "Stripe API error (status {}): {}",
                    req.http_status,
                    req.message.unwrap_or_default()
                )),
            },
            other => BillingError::UpstreamUnavailable(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::UpstreamUnavailable(format!("Database error: {}", err))
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
