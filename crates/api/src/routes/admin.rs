//! Admin endpoints: tracking reconciliation, manual re-dispatch, outbox
//! flush and supplier stock lookup.
//!
//! Callers authenticate with `?secret=<CRON_SECRET>` (the scheduler) or
//! `Authorization: Bearer <ADMIN_API_TOKEN>` (admin sessions).

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use fulfillment::{DispatchOutcome, ReconcileReport, RelayReport};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;
use crate::routes::orders::parse_order_id;

const DEFAULT_FLUSH_LIMIT: usize = 50;

#[derive(Debug, Clone, Default)]
pub struct AdminAuth {
    pub cron_secret: Option<String>,
    pub admin_api_token: Option<String>,
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let diff = a.bytes().zip(b.bytes()).fold(0u8, |d, (x, y)| d | (x ^ y));
    diff == 0
}

impl AdminAuth {
    /// True if either credential matches its configured value. An
    /// unconfigured credential never matches.
    pub fn authorize(&self, query_secret: Option<&str>, bearer: Option<&str>) -> bool {
        let matches = |expected: &Option<String>, given: Option<&str>| match (expected, given) {
            (Some(expected), Some(given)) => constant_time_eq(expected, given),
            _ => false,
        };
        matches(&self.cron_secret, query_secret) || matches(&self.admin_api_token, bearer)
    }

    fn check(&self, query: &AdminQuery, headers: &HeaderMap) -> Result<(), ApiError> {
        let bearer = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);
        if self.authorize(query.secret.as_deref(), bearer) {
            Ok(())
        } else {
            metrics::counter!("admin_auth_failures_total").increment(1);
            tracing::warn!("rejected admin request");
            Err(ApiError::Unauthorized)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AdminQuery {
    pub secret: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct StockResponse {
    pub product_id: String,
    pub stock: Option<u32>,
}

/// GET|POST /admin/tracking/reconcile — run one tracking reconciliation pass.
#[tracing::instrument(skip_all)]
pub async fn reconcile(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Result<Json<ReconcileReport>, ApiError> {
    state.auth.check(&query, &headers)?;
    Ok(Json(state.reconciler.run().await?))
}

/// POST /admin/orders/{id}/dispatch — retry the supplier dispatch of an order.
#[tracing::instrument(skip(state, query, headers))]
pub async fn dispatch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Result<Json<DispatchOutcome>, ApiError> {
    state.auth.check(&query, &headers)?;
    let order_id = parse_order_id(&id)?;
    Ok(Json(state.dispatcher.dispatch(order_id).await?))
}

/// POST /admin/notifications/flush — deliver pending outbox notifications.
#[tracing::instrument(skip_all)]
pub async fn flush_notifications(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Result<Json<RelayReport>, ApiError> {
    state.auth.check(&query, &headers)?;
    let limit = query.limit.unwrap_or(DEFAULT_FLUSH_LIMIT);
    Ok(Json(state.relay.flush(limit).await?))
}

/// GET /admin/supplier/stock/{pid} — supplier stock for a product.
#[tracing::instrument(skip(state, query, headers))]
pub async fn stock(
    State(state): State<Arc<AppState>>,
    Path(pid): Path<String>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Result<Json<StockResponse>, ApiError> {
    state.auth.check(&query, &headers)?;
    let stock = state.supplier.get_product_stock(&pid).await?;
    Ok(Json(StockResponse {
        product_id: pid,
        stock,
    }))
}
