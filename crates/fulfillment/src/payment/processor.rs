use std::sync::Arc;

use chrono::Utc;
use common::OrderId;
use domain::{FulfillmentStatus, NotificationKind, OrderComposition, PaymentStatus};
use order_store::{OrderStore, PaymentCapture};
use serde::Serialize;

use crate::catalog;
use crate::dispatcher::{DispatchOutcome, SupplierDispatcher};
use crate::error::{FulfillmentError, Result};
use crate::outbox::NotificationRelay;
use crate::payment::events::{CompletedCheckout, PaymentEvent, parse_event};
use crate::payment::signature::verify_signature;

/// What happened to a paid order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionSummary {
    pub order_id: OrderId,
    pub composition: OrderComposition,
    pub confirmation_sent: bool,
    /// Present when the order has physical items.
    pub dispatch: Option<DispatchOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentOutcome {
    /// The order was marked paid by this event.
    Completed(CompletionSummary),
    /// The order was already paid; downstream steps were retried.
    AlreadyApplied(CompletionSummary),
    /// A completion arrived for an order that can no longer be paid.
    CompletionIgnored {
        order_id: OrderId,
        payment_status: PaymentStatus,
    },
    Expired {
        order_id: OrderId,
    },
    /// The order was no longer pending when the expiry arrived.
    ExpiryIgnored {
        order_id: OrderId,
    },
    Ignored {
        event_type: String,
    },
}

/// Handles payment provider webhooks.
pub struct PaymentEventProcessor {
    store: Arc<dyn OrderStore>,
    dispatcher: Arc<SupplierDispatcher>,
    relay: Arc<NotificationRelay>,
    webhook_secret: String,
}

impl PaymentEventProcessor {
    pub fn new(
        store: Arc<dyn OrderStore>,
        dispatcher: Arc<SupplierDispatcher>,
        relay: Arc<NotificationRelay>,
        webhook_secret: impl Into<String>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            relay,
            webhook_secret: webhook_secret.into(),
        }
    }

    /// Verifies, parses and applies one webhook delivery.
    ///
    /// Only authentication, payload and unknown-order errors are returned;
    /// supplier and email failures are recorded on the order and logged.
    #[tracing::instrument(skip_all, fields(bytes = payload.len()))]
    pub async fn handle(&self, payload: &[u8], signature_header: &str) -> Result<PaymentOutcome> {
        if let Err(e) = verify_signature(
            payload,
            signature_header,
            &self.webhook_secret,
            Utc::now().timestamp(),
        ) {
            metrics::counter!("payment_events_total", "type" => "rejected").increment(1);
            tracing::warn!(error = %e, "webhook rejected");
            return Err(e);
        }

        let event = parse_event(payload)?;
        metrics::counter!("payment_events_total", "type" => event.kind()).increment(1);

        match event {
            PaymentEvent::CheckoutCompleted(checkout) => self.complete(checkout).await,
            PaymentEvent::CheckoutExpired { order_id } => self.expire(order_id).await,
            PaymentEvent::Ignored { event_type } => {
                tracing::debug!(%event_type, "ignoring payment event");
                Ok(PaymentOutcome::Ignored { event_type })
            }
        }
    }

    async fn complete(&self, checkout: CompletedCheckout) -> Result<PaymentOutcome> {
        let order_id = checkout.order_id;
        let capture = PaymentCapture {
            session_id: checkout.session_id,
            payment_intent_id: checkout.payment_intent_id,
            customer_email: checkout.customer_email,
            shipping_address: checkout.shipping_address,
            discount_code: checkout.discount_code,
        };
        let applied = self
            .store
            .record_payment(order_id, &capture, Utc::now())
            .await?
            .is_applied();

        if !applied {
            let order = self
                .store
                .get_order(order_id)
                .await?
                .ok_or(FulfillmentError::OrderNotFound(order_id))?;
            if order.payment_status != PaymentStatus::Paid {
                tracing::warn!(
                    %order_id,
                    status = %order.payment_status,
                    "completion for an unpayable order"
                );
                return Ok(PaymentOutcome::CompletionIgnored {
                    order_id,
                    payment_status: order.payment_status,
                });
            }
            tracing::info!(%order_id, "payment already recorded, retrying downstream steps");
        }

        let items = self.store.get_items(order_id).await?;
        let products = catalog::products_for(self.store.as_ref(), &items).await?;
        let composition = catalog::composition(&products, &items);
        if checkout.is_all_digital != (composition == OrderComposition::AllDigital) {
            tracing::warn!(
                %order_id,
                claimed_all_digital = checkout.is_all_digital,
                ?composition,
                "checkout metadata disagrees with catalog"
            );
        }

        let confirmation_sent = match self.relay.deliver_for_order(order_id).await {
            Ok(report) => report.delivered(NotificationKind::OrderConfirmation),
            Err(e) => {
                tracing::warn!(%order_id, error = %e, "confirmation relay failed");
                false
            }
        };

        let dispatch = match composition {
            OrderComposition::AllDigital => {
                self.store
                    .advance_fulfillment(order_id, FulfillmentStatus::Delivered, Utc::now())
                    .await?;
                None
            }
            OrderComposition::Mixed | OrderComposition::AllPhysical => {
                if composition == OrderComposition::Mixed {
                    self.store
                        .mark_digital_delivered(order_id, Utc::now())
                        .await?;
                }
                match self.dispatcher.dispatch(order_id).await {
                    Ok(outcome) => Some(outcome),
                    Err(e) => {
                        tracing::error!(%order_id, error = %e, "dispatch errored");
                        None
                    }
                }
            }
        };

        let summary = CompletionSummary {
            order_id,
            composition,
            confirmation_sent,
            dispatch,
        };
        Ok(if applied {
            PaymentOutcome::Completed(summary)
        } else {
            PaymentOutcome::AlreadyApplied(summary)
        })
    }

    async fn expire(&self, order_id: OrderId) -> Result<PaymentOutcome> {
        let outcome = self.store.expire_payment(order_id, Utc::now()).await?;
        if outcome.is_applied() {
            tracing::info!(%order_id, "checkout expired, order cancelled");
            Ok(PaymentOutcome::Expired { order_id })
        } else {
            tracing::info!(%order_id, "expiry for a settled order ignored");
            Ok(PaymentOutcome::ExpiryIgnored { order_id })
        }
    }
}
