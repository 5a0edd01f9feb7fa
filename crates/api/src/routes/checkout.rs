//! Storefront checkout and shipping quote endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use domain::ShippingQuote;
use fulfillment::{CartLine, CheckoutRequest, CheckoutResult};
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct QuoteRequest {
    pub items: Vec<CartLine>,
}

/// POST /checkout — price the cart and create a pending order.
#[tracing::instrument(skip_all)]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutResult>), ApiError> {
    let result = state.checkout.create_order(&req).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

/// POST /shipping/quote — resolve the shipping charge for a cart.
#[tracing::instrument(skip_all)]
pub async fn quote(
    State(state): State<Arc<AppState>>,
    Json(req): Json<QuoteRequest>,
) -> Result<Json<ShippingQuote>, ApiError> {
    Ok(Json(state.checkout.quote_shipping(&req.items).await?))
}
