//! Notification outbox relay.
//!
//! State transitions only record that a notification is due; the relay
//! renders and sends it, then marks the record delivered (which stamps the
//! order's `*_email_sent_at` guard) or counts the failed attempt. Records
//! whose attempts reach `max_attempts` are left for a human.

use std::sync::Arc;

use chrono::Utc;
use common::OrderId;
use domain::{NotificationKind, Order, OutboxNotification, ProductId};
use order_store::OrderStore;
use serde::Serialize;

use crate::catalog;
use crate::error::FulfillmentError;
use crate::services::notifier::{
    DownloadLink, NotificationLine, Notifier, OrderConfirmation, ShippingUpdate,
};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// What one relay pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelayReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    pub delivered_kinds: Vec<NotificationKind>,
}

impl RelayReport {
    pub fn delivered(&self, kind: NotificationKind) -> bool {
        self.delivered_kinds.contains(&kind)
    }
}

pub struct NotificationRelay {
    store: Arc<dyn OrderStore>,
    notifier: Arc<dyn Notifier>,
    site_url: String,
    max_attempts: u32,
}

impl NotificationRelay {
    pub fn new(
        store: Arc<dyn OrderStore>,
        notifier: Arc<dyn Notifier>,
        site_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            notifier,
            site_url: site_url.into().trim_end_matches('/').to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Delivers every pending notification of one order.
    #[tracing::instrument(skip(self))]
    pub async fn deliver_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<RelayReport, FulfillmentError> {
        let pending = self
            .store
            .pending_notifications_for_order(order_id, self.max_attempts)
            .await?;
        self.deliver_all(pending).await
    }

    /// Delivers up to `limit` pending notifications across all orders, oldest first.
    #[tracing::instrument(skip(self))]
    pub async fn flush(&self, limit: usize) -> Result<RelayReport, FulfillmentError> {
        let pending = self
            .store
            .pending_notifications(limit, self.max_attempts)
            .await?;
        self.deliver_all(pending).await
    }

    async fn deliver_all(
        &self,
        pending: Vec<OutboxNotification>,
    ) -> Result<RelayReport, FulfillmentError> {
        let mut report = RelayReport::default();

        for record in pending {
            report.attempted += 1;
            match self.deliver(&record).await {
                Ok(()) => {
                    self.store
                        .mark_notification_delivered(record.id, Utc::now())
                        .await?;
                    metrics::counter!(
                        "notifications_sent_total",
                        "kind" => record.kind.as_str(),
                        "result" => "delivered"
                    )
                    .increment(1);
                    report.delivered += 1;
                    report.delivered_kinds.push(record.kind);
                }
                Err(e) => {
                    tracing::warn!(
                        order_id = %record.order_id,
                        kind = %record.kind,
                        attempt = record.attempts + 1,
                        error = %e,
                        "notification delivery failed"
                    );
                    self.store
                        .mark_notification_failed(record.id, &e.to_string())
                        .await?;
                    metrics::counter!(
                        "notifications_sent_total",
                        "kind" => record.kind.as_str(),
                        "result" => "failed"
                    )
                    .increment(1);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn deliver(&self, record: &OutboxNotification) -> Result<(), FulfillmentError> {
        let order = self
            .store
            .get_order(record.order_id)
            .await?
            .ok_or(FulfillmentError::OrderNotFound(record.order_id))?;
        let email = order.customer_email.clone().ok_or_else(|| {
            FulfillmentError::NotificationService("order has no customer email".to_string())
        })?;
        let items = self.store.get_items(order.id).await?;
        let lines: Vec<NotificationLine> = items.iter().map(NotificationLine::from).collect();

        match record.kind {
            NotificationKind::OrderConfirmation => {
                let products = catalog::products_for(self.store.as_ref(), &items).await?;
                let composition = catalog::composition(&products, &items);
                let download_links = items
                    .iter()
                    .filter(|i| catalog::is_digital(&products, i))
                    .map(|i| DownloadLink {
                        product_name: i.product_name.clone(),
                        url: self.download_url(&order, &i.product_id),
                    })
                    .collect();

                let message = OrderConfirmation {
                    order_number: order.order_number.clone(),
                    customer_email: email,
                    items: lines,
                    subtotal: order.subtotal,
                    shipping_cost: order.shipping_cost,
                    discount_amount: order.discount_amount,
                    total: order.total,
                    shipping_address: composition
                        .has_physical()
                        .then(|| order.shipping_address.clone())
                        .flatten(),
                    download_links,
                };
                self.notifier.send_order_confirmation(&message).await
            }
            NotificationKind::ShippingUpdate => {
                let Some(tracking_number) = order.tracking_number.clone() else {
                    return Err(FulfillmentError::NotificationService(
                        "order has no tracking number".to_string(),
                    ));
                };
                let message = ShippingUpdate {
                    order_number: order.order_number.clone(),
                    customer_email: email,
                    tracking_number,
                    tracking_url: order.tracking_url.clone(),
                    carrier: order.carrier.clone(),
                    items: lines,
                    shipping_address: order.shipping_address.clone(),
                };
                self.notifier.send_shipping_update(&message).await
            }
        }
    }

    fn download_url(&self, order: &Order, product_id: &ProductId) -> String {
        format!("{}/downloads/{}/{}", self.site_url, order.id, product_id)
    }
}
