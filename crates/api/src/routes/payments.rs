//! Card payment confirmation endpoint

use axum::{extract::State, Json};
use ledgerhook_billing::ConfirmPaymentRequest;
use serde_json::Value;

use crate::{error::ApiResult, state::AppState};

/// Create or advance a payment intent for a card payment
///
/// Declines and SCA challenges are part of a normal response body; only
/// malformed requests and upstream outages map to error statuses.
pub async fn confirm_payment(
    State(state): State<AppState>,
    Json(request): Json<ConfirmPaymentRequest>,
) -> ApiResult<Json<Value>> {
    let response = state.billing.payments.confirm(request).await?;
    Ok(Json(response.to_json()))
}
