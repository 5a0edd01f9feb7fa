//! Payment provider webhook endpoint.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use fulfillment::PaymentOutcome;

use crate::AppState;
use crate::error::ApiError;

/// Header carrying `t=<unix>,v1=<hex>`.
pub const SIGNATURE_HEADER: &str = "payment-signature";

/// POST /webhooks/payment — verify and apply a payment event.
///
/// The raw body is passed through untouched; the signature covers its bytes.
#[tracing::instrument(skip_all)]
pub async fn payment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PaymentOutcome>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest(format!("missing {SIGNATURE_HEADER} header")))?;

    let outcome = state.processor.handle(&body, signature).await?;
    Ok(Json(outcome))
}
