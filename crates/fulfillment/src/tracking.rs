//! Tracking reconciliation job.
//!
//! Polls the supplier for every dispatched order that hasn't been delivered,
//! persists whatever tracking data came back and sends the shipping update
//! once a tracking number is known. Orders are processed one at a time; the
//! supplier client's rate limiter spaces the calls.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use domain::{FulfillmentStatus, NotificationKind, Order};
use order_store::{OrderStore, TrackingUpdate};
use serde::Serialize;

use crate::error::{FulfillmentError, Result};
use crate::normalize;
use crate::outbox::NotificationRelay;
use crate::services::supplier::SupplierApi;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTrackingResult {
    pub order_number: String,
    pub tracking_number: Option<String>,
    pub status: FulfillmentStatus,
    pub updated: bool,
    pub emailed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub checked: usize,
    pub updated: usize,
    pub emailed: usize,
    pub results: Vec<OrderTrackingResult>,
}

pub struct TrackingReconciler {
    store: Arc<dyn OrderStore>,
    supplier: Arc<dyn SupplierApi>,
    relay: Arc<NotificationRelay>,
}

impl TrackingReconciler {
    pub fn new(
        store: Arc<dyn OrderStore>,
        supplier: Arc<dyn SupplierApi>,
        relay: Arc<NotificationRelay>,
    ) -> Self {
        Self {
            store,
            supplier,
            relay,
        }
    }

    /// Runs one reconciliation pass over all orders awaiting tracking.
    ///
    /// A failure on one order is recorded in its result and doesn't stop the
    /// pass; only failing to list the orders is an error.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self) -> Result<ReconcileReport> {
        let started = Instant::now();
        let orders = self.store.orders_awaiting_tracking().await?;
        let mut report = ReconcileReport::default();

        for order in orders {
            report.checked += 1;
            let result = match self.reconcile(&order).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(
                        order_number = %order.order_number,
                        error = %e,
                        "tracking check failed"
                    );
                    metrics::counter!("tracking_reconcile_failures_total").increment(1);
                    OrderTrackingResult {
                        order_number: order.order_number.clone(),
                        tracking_number: order.tracking_number.clone(),
                        status: order.fulfillment_status,
                        updated: false,
                        emailed: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            report.updated += usize::from(result.updated);
            report.emailed += usize::from(result.emailed);
            report.results.push(result);
        }

        metrics::histogram!("tracking_reconcile_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(
            checked = report.checked,
            updated = report.updated,
            emailed = report.emailed,
            "tracking reconciliation finished"
        );
        Ok(report)
    }

    async fn reconcile(&self, order: &Order) -> Result<OrderTrackingResult> {
        let number = order.supplier_order_number.as_deref().ok_or_else(|| {
            FulfillmentError::SupplierService("order has no supplier order number".to_string())
        })?;

        let payload = self.supplier.get_tracking(number).await?;
        let fields = normalize::extract_tracking(normalize::select_tracking_record(&payload));
        let next_status = normalize::derive_next_status(order.fulfillment_status, &fields);

        let update = TrackingUpdate {
            tracking_number: fields.tracking_number,
            tracking_url: fields.tracking_url,
            carrier: fields.carrier,
            supplier_status: fields.status,
            next_status,
        };
        let outcome = self
            .store
            .record_tracking(order.id, &update, Utc::now())
            .await?;

        let tracking_number = update
            .tracking_number
            .or_else(|| order.tracking_number.clone());
        let email_due = outcome.notification_queued
            || (tracking_number.is_some() && order.shipping_email_sent_at.is_none());

        let emailed = if email_due {
            match self.relay.deliver_for_order(order.id).await {
                Ok(report) => report.delivered(NotificationKind::ShippingUpdate),
                Err(e) => {
                    tracing::warn!(
                        order_number = %order.order_number,
                        error = %e,
                        "shipping update relay failed"
                    );
                    false
                }
            }
        } else {
            false
        };

        if outcome.changed {
            tracing::info!(
                order_number = %order.order_number,
                status = %outcome.status,
                "tracking updated"
            );
        }

        Ok(OrderTrackingResult {
            order_number: order.order_number.clone(),
            tracking_number,
            status: outcome.status,
            updated: outcome.changed,
            emailed,
            error: None,
        })
    }
}
