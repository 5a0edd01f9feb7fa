use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::OrderId;
use domain::{
    CatalogProduct, Discount, FulfillmentStatus, NotificationKind, Order, OrderItem,
    OutboxNotification, PaymentStatus, ProductId,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    Result, StoreError,
    store::{
        OrderStore, PaymentCapture, SupplierOrderRef, TrackingOutcome, TrackingUpdate,
        TransitionOutcome,
    },
};

#[derive(Debug, Default)]
struct State {
    orders: HashMap<OrderId, Order>,
    items: HashMap<OrderId, Vec<OrderItem>>,
    products: HashMap<ProductId, CatalogProduct>,
    /// Keyed by upper-cased code.
    discounts: HashMap<String, Discount>,
    outbox: Vec<OutboxNotification>,
    fail_on_complete_dispatch: bool,
}

impl State {
    fn order_mut(&mut self, order_id: OrderId) -> Result<&mut Order> {
        self.orders
            .get_mut(&order_id)
            .ok_or(StoreError::OrderNotFound(order_id))
    }

    /// Queues a notification unless one of that kind already exists for the order.
    fn enqueue(&mut self, order_id: OrderId, kind: NotificationKind, now: DateTime<Utc>) -> bool {
        if self
            .outbox
            .iter()
            .any(|n| n.order_id == order_id && n.kind == kind)
        {
            return false;
        }
        self.outbox
            .push(OutboxNotification::new(order_id, kind, now));
        true
    }
}

/// In-memory order store for tests and local runs.
///
/// Implements the same conditional semantics as the PostgreSQL store; each
/// method holds the write lock for its whole read-check-write.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a catalog product.
    pub async fn seed_product(&self, product: CatalogProduct) {
        self.state
            .write()
            .await
            .products
            .insert(product.id.clone(), product);
    }

    /// Adds or replaces a discount code.
    pub async fn seed_discount(&self, discount: Discount) {
        self.state
            .write()
            .await
            .discounts
            .insert(discount.code.to_uppercase(), discount);
    }

    /// Returns the total number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Makes `complete_dispatch` fail as if the database were unreachable.
    pub async fn set_fail_on_complete_dispatch(&self, fail: bool) {
        self.state.write().await.fail_on_complete_dispatch = fail;
    }

    /// Returns every outbox record, delivered or not.
    pub async fn outbox(&self) -> Vec<OutboxNotification> {
        self.state.read().await.outbox.clone()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert_order(&self, order: &Order, items: &[OrderItem]) -> Result<()> {
        let mut state = self.state.write().await;
        if state.orders.contains_key(&order.id)
            || state
                .orders
                .values()
                .any(|o| o.order_number == order.order_number)
        {
            return Err(StoreError::DuplicateOrder(order.order_number.clone()));
        }
        state.orders.insert(order.id, order.clone());
        state.items.insert(order.id, items.to_vec());
        Ok(())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&order_id).cloned())
    }

    async fn get_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>> {
        Ok(self
            .state
            .read()
            .await
            .items
            .get(&order_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_products(&self, product_ids: &[ProductId]) -> Result<Vec<CatalogProduct>> {
        let state = self.state.read().await;
        Ok(product_ids
            .iter()
            .filter_map(|id| state.products.get(id).cloned())
            .collect())
    }

    async fn get_discount(&self, code: &str) -> Result<Option<Discount>> {
        Ok(self
            .state
            .read()
            .await
            .discounts
            .get(&code.trim().to_uppercase())
            .cloned())
    }

    async fn record_payment(
        &self,
        order_id: OrderId,
        capture: &PaymentCapture,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        let mut state = self.state.write().await;
        let order = state.order_mut(order_id)?;

        if !order.payment_status.is_pending() {
            return Ok(TransitionOutcome::Unchanged);
        }

        order.payment_status = PaymentStatus::Paid;
        order.paid_at = Some(now);
        order.updated_at = now;
        if order.fulfillment_status == FulfillmentStatus::Unfulfilled {
            order.fulfillment_status = FulfillmentStatus::Processing;
        }
        if capture.customer_email.is_some() {
            order.customer_email = capture.customer_email.clone();
        }
        if capture.shipping_address.is_some() {
            order.shipping_address = capture.shipping_address.clone();
        }
        order.payment_session_id = capture.session_id.clone();
        order.payment_intent_id = capture.payment_intent_id.clone();
        if order.discount_code.is_none() {
            order.discount_code = capture.discount_code.clone();
        }
        let code = order.discount_code.clone();

        if let Some(code) = code
            && let Some(discount) = state.discounts.get_mut(&code.to_uppercase())
        {
            discount.usage_count += 1;
        }
        state.enqueue(order_id, NotificationKind::OrderConfirmation, now);

        Ok(TransitionOutcome::Applied)
    }

    async fn expire_payment(
        &self,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        let mut state = self.state.write().await;
        let order = state.order_mut(order_id)?;

        if !order.payment_status.is_pending()
            || !order
                .fulfillment_status
                .can_advance_to(FulfillmentStatus::Cancelled)
        {
            return Ok(TransitionOutcome::Unchanged);
        }
        order.payment_status = PaymentStatus::Expired;
        order.fulfillment_status = FulfillmentStatus::Cancelled;
        order.updated_at = now;
        Ok(TransitionOutcome::Applied)
    }

    async fn advance_fulfillment(
        &self,
        order_id: OrderId,
        target: FulfillmentStatus,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        let mut state = self.state.write().await;
        let order = state.order_mut(order_id)?;

        if !order.fulfillment_status.can_advance_to(target) {
            return Ok(TransitionOutcome::Unchanged);
        }
        order.fulfillment_status = target;
        order.updated_at = now;
        Ok(TransitionOutcome::Applied)
    }

    async fn mark_digital_delivered(&self, order_id: OrderId, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        let order = state.order_mut(order_id)?;
        if order.digital_delivered_at.is_none() {
            order.digital_delivered_at = Some(now);
            order.updated_at = now;
        }
        Ok(())
    }

    async fn set_notes(
        &self,
        order_id: OrderId,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let order = state.order_mut(order_id)?;
        order.notes = notes.map(String::from);
        order.updated_at = now;
        Ok(())
    }

    async fn try_claim_dispatch(
        &self,
        order_id: OrderId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let order = state.order_mut(order_id)?;

        let lease_free = order
            .dispatch_claimed_at
            .is_none_or(|claimed| claimed < now - lease);
        if order.supplier_order_id.is_some() || !lease_free {
            return Ok(false);
        }
        order.dispatch_claimed_at = Some(now);
        Ok(true)
    }

    async fn complete_dispatch(
        &self,
        order_id: OrderId,
        supplier: &SupplierOrderRef,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.fail_on_complete_dispatch {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        let order = state.order_mut(order_id)?;

        if order.supplier_order_id.is_some() {
            return Ok(false);
        }
        order.supplier_order_id = Some(supplier.order_id.clone());
        order.supplier_order_number = Some(supplier.order_number.clone());
        order.notes = notes.map(String::from);
        order.dispatch_claimed_at = None;
        order.updated_at = now;
        Ok(true)
    }

    async fn fail_dispatch(
        &self,
        order_id: OrderId,
        notes: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let order = state.order_mut(order_id)?;
        order.notes = Some(notes.to_string());
        order.dispatch_claimed_at = None;
        order.updated_at = now;
        Ok(())
    }

    async fn orders_awaiting_tracking(&self) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.fulfillment_status.awaits_tracking() && o.supplier_order_number.is_some())
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    async fn record_tracking(
        &self,
        order_id: OrderId,
        update: &TrackingUpdate,
        now: DateTime<Utc>,
    ) -> Result<TrackingOutcome> {
        let mut state = self.state.write().await;
        let order = state.order_mut(order_id)?;
        let mut changed = false;

        for (field, value) in [
            (&mut order.tracking_number, &update.tracking_number),
            (&mut order.tracking_url, &update.tracking_url),
            (&mut order.carrier, &update.carrier),
            (&mut order.supplier_status, &update.supplier_status),
        ] {
            if value.is_some() && *field != *value {
                *field = value.clone();
                changed = true;
            }
        }

        if let Some(next) = update.next_status
            && order.fulfillment_status.can_advance_to(next)
        {
            order.fulfillment_status = next;
            changed = true;
        }
        if changed {
            order.updated_at = now;
        }

        let status = order.fulfillment_status;
        let wants_email = order.tracking_number.is_some() && order.shipping_email_sent_at.is_none();
        let notification_queued =
            wants_email && state.enqueue(order_id, NotificationKind::ShippingUpdate, now);

        Ok(TrackingOutcome {
            changed,
            status,
            notification_queued,
        })
    }

    async fn pending_notifications(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<OutboxNotification>> {
        let state = self.state.read().await;
        let mut pending: Vec<OutboxNotification> = state
            .outbox
            .iter()
            .filter(|n| n.delivered_at.is_none() && n.attempts < max_attempts)
            .cloned()
            .collect();
        pending.sort_by_key(|n| n.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn pending_notifications_for_order(
        &self,
        order_id: OrderId,
        max_attempts: u32,
    ) -> Result<Vec<OutboxNotification>> {
        let state = self.state.read().await;
        Ok(state
            .outbox
            .iter()
            .filter(|n| {
                n.order_id == order_id && n.delivered_at.is_none() && n.attempts < max_attempts
            })
            .cloned()
            .collect())
    }

    async fn mark_notification_delivered(
        &self,
        notification_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let Some(record) = state
            .outbox
            .iter_mut()
            .find(|n| n.id == notification_id && n.delivered_at.is_none())
        else {
            return Ok(());
        };
        record.attempts += 1;
        record.delivered_at = Some(now);
        record.last_error = None;
        let (order_id, kind) = (record.order_id, record.kind);

        if let Some(order) = state.orders.get_mut(&order_id) {
            match kind {
                NotificationKind::OrderConfirmation => order.email_sent_at = Some(now),
                NotificationKind::ShippingUpdate => order.shipping_email_sent_at = Some(now),
            }
        }
        Ok(())
    }

    async fn mark_notification_failed(&self, notification_id: Uuid, error: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(record) = state
            .outbox
            .iter_mut()
            .find(|n| n.id == notification_id && n.delivered_at.is_none())
        {
            record.attempts += 1;
            record.last_error = Some(error.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::Money;

    async fn store_with_order() -> (InMemoryOrderStore, OrderId) {
        let store = InMemoryOrderStore::new();
        let order = Order::new_pending("ORD-TEST-1", Utc::now());
        let id = order.id;
        let items = vec![OrderItem::new(id, "P1", "Mug", 1, Money::from_cents(1500))];
        store.insert_order(&order, &items).await.unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_order_number() {
        let (store, _) = store_with_order().await;
        let dup = Order::new_pending("ORD-TEST-1", Utc::now());
        let result = store.insert_order(&dup, &[]).await;
        assert!(matches!(result, Err(StoreError::DuplicateOrder(_))));
    }

    #[tokio::test]
    async fn test_record_payment_is_applied_once() {
        let (store, id) = store_with_order().await;
        store
            .seed_discount(Discount {
                code: "SAVE10".to_string(),
                percent_off: 10,
                active: true,
                usage_count: 0,
                max_uses: None,
            })
            .await;
        let capture = PaymentCapture {
            discount_code: Some("save10".to_string()),
            ..Default::default()
        };

        let first = store
            .record_payment(id, &capture, Utc::now())
            .await
            .unwrap();
        let second = store
            .record_payment(id, &capture, Utc::now())
            .await
            .unwrap();

        assert_eq!(first, TransitionOutcome::Applied);
        assert_eq!(second, TransitionOutcome::Unchanged);
        let discount = store.get_discount("SAVE10").await.unwrap().unwrap();
        assert_eq!(discount.usage_count, 1);
        assert_eq!(store.outbox().await.len(), 1);

        let order = store.get_order(id).await.unwrap().unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.fulfillment_status, FulfillmentStatus::Processing);
    }

    #[tokio::test]
    async fn test_expire_does_not_touch_paid_order() {
        let (store, id) = store_with_order().await;
        store
            .record_payment(id, &PaymentCapture::default(), Utc::now())
            .await
            .unwrap();

        let outcome = store.expire_payment(id, Utc::now()).await.unwrap();
        assert_eq!(outcome, TransitionOutcome::Unchanged);
        let order = store.get_order(id).await.unwrap().unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_dispatch_claim_is_exclusive_until_lease_expires() {
        let (store, id) = store_with_order().await;
        let now = Utc::now();
        let lease = Duration::minutes(10);

        assert!(store.try_claim_dispatch(id, now, lease).await.unwrap());
        assert!(!store.try_claim_dispatch(id, now, lease).await.unwrap());
        let later = now + Duration::minutes(11);
        assert!(store.try_claim_dispatch(id, later, lease).await.unwrap());
    }

    #[tokio::test]
    async fn test_complete_dispatch_sets_supplier_order_once() {
        let (store, id) = store_with_order().await;
        let first = SupplierOrderRef {
            order_id: "S-1".to_string(),
            order_number: "SN-1".to_string(),
        };
        let second = SupplierOrderRef {
            order_id: "S-2".to_string(),
            order_number: "SN-2".to_string(),
        };

        assert!(
            store
                .complete_dispatch(id, &first, None, Utc::now())
                .await
                .unwrap()
        );
        assert!(
            !store
                .complete_dispatch(id, &second, None, Utc::now())
                .await
                .unwrap()
        );
        assert!(
            !store
                .try_claim_dispatch(id, Utc::now(), Duration::minutes(5))
                .await
                .unwrap()
        );

        let order = store.get_order(id).await.unwrap().unwrap();
        assert_eq!(order.supplier_order_id.as_deref(), Some("S-1"));
    }

    #[tokio::test]
    async fn test_record_tracking_never_regresses_or_blanks() {
        let (store, id) = store_with_order().await;
        store
            .advance_fulfillment(id, FulfillmentStatus::Shipped, Utc::now())
            .await
            .unwrap();
        store
            .record_tracking(
                id,
                &TrackingUpdate {
                    tracking_number: Some("1Z999".to_string()),
                    ..Default::default()
                },
                Utc::now(),
            )
            .await
            .unwrap();

        let outcome = store
            .record_tracking(
                id,
                &TrackingUpdate {
                    tracking_number: None,
                    next_status: Some(FulfillmentStatus::Processing),
                    ..Default::default()
                },
                Utc::now(),
            )
            .await
            .unwrap();

        assert!(!outcome.changed);
        assert_eq!(outcome.status, FulfillmentStatus::Shipped);
        let order = store.get_order(id).await.unwrap().unwrap();
        assert_eq!(order.tracking_number.as_deref(), Some("1Z999"));
    }

    #[tokio::test]
    async fn test_shipping_notification_queued_once_and_stamped_on_delivery() {
        let (store, id) = store_with_order().await;
        let update = TrackingUpdate {
            tracking_number: Some("1Z999".to_string()),
            next_status: Some(FulfillmentStatus::Shipped),
            ..Default::default()
        };

        let first = store
            .record_tracking(id, &update, Utc::now())
            .await
            .unwrap();
        let second = store
            .record_tracking(id, &update, Utc::now())
            .await
            .unwrap();
        assert!(first.notification_queued);
        assert!(!second.notification_queued);

        let pending = store.pending_notifications_for_order(id, 5).await.unwrap();
        assert_eq!(pending.len(), 1);
        store
            .mark_notification_delivered(pending[0].id, Utc::now())
            .await
            .unwrap();

        let order = store.get_order(id).await.unwrap().unwrap();
        assert!(order.shipping_email_sent_at.is_some());
        assert!(store.pending_notifications(10, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_notifications_stop_after_max_attempts() {
        let (store, id) = store_with_order().await;
        store
            .record_payment(id, &PaymentCapture::default(), Utc::now())
            .await
            .unwrap();
        let record = store.pending_notifications(10, 2).await.unwrap().remove(0);

        store
            .mark_notification_failed(record.id, "smtp down")
            .await
            .unwrap();
        assert_eq!(store.pending_notifications(10, 2).await.unwrap().len(), 1);
        store
            .mark_notification_failed(record.id, "smtp down")
            .await
            .unwrap();
        assert!(store.pending_notifications(10, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_order_is_an_error() {
        let store = InMemoryOrderStore::new();
        let result = store
            .advance_fulfillment(OrderId::new(), FulfillmentStatus::Shipped, Utc::now())
            .await;
        assert!(matches!(result, Err(StoreError::OrderNotFound(_))));
    }
}
