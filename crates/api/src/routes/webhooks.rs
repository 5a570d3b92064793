//! Stripe webhook endpoint

use axum::{extract::State, http::HeaderMap, Json};
use ledgerhook_billing::WebhookAck;

use crate::{error::ApiResult, state::AppState};

/// Receive a Stripe webhook delivery
///
/// The body is taken raw so the signature covers exactly what Stripe sent.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<WebhookAck>> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok());

    tracing::debug!(
        body_len = body.len(),
        signed = signature.is_some(),
        "Received webhook delivery"
    );

    let ack = state
        .billing
        .webhooks
        .handle_delivery(&body, signature)
        .await?;

    Ok(Json(ack))
}
