//! Order status endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::OrderId;
use domain::{FulfillmentStatus, OrderItem, PaymentStatus, ShippingMethod};
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub order_number: String,
    pub payment_status: PaymentStatus,
    pub fulfillment_status: FulfillmentStatus,
    pub items: Vec<OrderItemResponse>,
    pub subtotal_cents: i64,
    pub shipping_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
    pub shipping_method: Option<ShippingMethod>,
    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
    pub carrier: Option<String>,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct OrderItemResponse {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

impl From<&OrderItem> for OrderItemResponse {
    fn from(item: &OrderItem) -> Self {
        Self {
            product_id: item.product_id.to_string(),
            product_name: item.product_name.clone(),
            quantity: item.quantity,
            unit_price_cents: item.unit_price.cents(),
        }
    }
}

/// GET /orders/{id} — order status and tracking.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;

    let order = state
        .store
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;
    let items = state.store.get_items(order_id).await?;

    Ok(Json(OrderResponse {
        id: order.id.to_string(),
        order_number: order.order_number,
        payment_status: order.payment_status,
        fulfillment_status: order.fulfillment_status,
        items: items.iter().map(OrderItemResponse::from).collect(),
        subtotal_cents: order.subtotal.cents(),
        shipping_cents: order.shipping_cost.cents(),
        discount_cents: order.discount_amount.cents(),
        total_cents: order.total.cents(),
        shipping_method: order.shipping_method,
        tracking_number: order.tracking_number,
        tracking_url: order.tracking_url,
        carrier: order.carrier,
        created_at: order.created_at.to_rfc3339(),
    }))
}

pub(crate) fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    OrderId::parse(id).map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
