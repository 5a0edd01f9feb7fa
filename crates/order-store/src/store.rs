use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::OrderId;
use domain::{
    CatalogProduct, Discount, FulfillmentStatus, Order, OrderItem, OutboxNotification, ProductId,
    ShippingAddress,
};
use uuid::Uuid;

use crate::Result;

/// Result of a conditional transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The order was in the expected prior state and has been updated.
    Applied,
    /// The order was already past that state; nothing was written.
    Unchanged,
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied)
    }
}

/// Data captured from a completed checkout session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentCapture {
    pub session_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub customer_email: Option<String>,
    pub shipping_address: Option<ShippingAddress>,
    pub discount_code: Option<String>,
}

/// Identifiers of an order placed with the supplier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupplierOrderRef {
    pub order_id: String,
    pub order_number: String,
}

/// Tracking data pulled from the supplier for one order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackingUpdate {
    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
    pub carrier: Option<String>,
    pub supplier_status: Option<String>,
    /// Status the order should move to; ignored unless it is a forward step.
    pub next_status: Option<FulfillmentStatus>,
}

/// What a tracking write changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackingOutcome {
    /// Any tracking field or the status changed.
    pub changed: bool,
    /// Status after the write.
    pub status: FulfillmentStatus,
    /// A shipping-update notification was newly queued.
    pub notification_queued: bool,
}

/// Statuses from which `target` is a legal forward step.
pub(crate) fn allowed_sources(target: FulfillmentStatus) -> Vec<FulfillmentStatus> {
    [
        FulfillmentStatus::Unfulfilled,
        FulfillmentStatus::Processing,
        FulfillmentStatus::Shipped,
        FulfillmentStatus::Delivered,
        FulfillmentStatus::Cancelled,
    ]
    .into_iter()
    .filter(|s| s.can_advance_to(target))
    .collect()
}

/// Persistence for orders, their items, read-only catalog data and the
/// notification outbox.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists a new order and its items atomically.
    async fn insert_order(&self, order: &Order, items: &[OrderItem]) -> Result<()>;

    /// Loads an order. Returns None if it doesn't exist.
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Loads an order's items in checkout order.
    async fn get_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>>;

    /// Loads catalog products by ID; unknown IDs are skipped.
    async fn get_products(&self, product_ids: &[ProductId]) -> Result<Vec<CatalogProduct>>;

    /// Loads a discount code, matched case-insensitively.
    async fn get_discount(&self, code: &str) -> Result<Option<Discount>>;

    /// Marks a pending order paid.
    ///
    /// In one write, and only if `payment_status` is still pending: captures
    /// the address and payment identifiers, moves `unfulfilled` to
    /// `processing`, increments the discount code's usage counter and queues
    /// the order confirmation. A replay returns `Unchanged` and writes nothing.
    async fn record_payment(
        &self,
        order_id: OrderId,
        capture: &PaymentCapture,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome>;

    /// Marks a pending order expired and cancelled.
    async fn expire_payment(&self, order_id: OrderId, now: DateTime<Utc>)
    -> Result<TransitionOutcome>;

    /// Moves the order to `target` if that is a forward step from its current status.
    async fn advance_fulfillment(
        &self,
        order_id: OrderId,
        target: FulfillmentStatus,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome>;

    /// Stamps that the digital part of a mixed order is deliverable.
    async fn mark_digital_delivered(&self, order_id: OrderId, now: DateTime<Utc>) -> Result<()>;

    /// Replaces the operational notes.
    async fn set_notes(
        &self,
        order_id: OrderId,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Takes the dispatch lease.
    ///
    /// Succeeds only if no supplier order exists and no unexpired lease is
    /// held, so two concurrent dispatch triggers can't both place an order.
    async fn try_claim_dispatch(
        &self,
        order_id: OrderId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<bool>;

    /// Records the supplier order, replaces notes and releases the lease.
    ///
    /// Compare-and-set on `supplier_order_id IS NULL`; returns false if an
    /// id was already present.
    async fn complete_dispatch(
        &self,
        order_id: OrderId,
        supplier: &SupplierOrderRef,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Records a dispatch failure in notes and releases the lease.
    async fn fail_dispatch(&self, order_id: OrderId, notes: &str, now: DateTime<Utc>)
    -> Result<()>;

    /// Orders in processing or shipped that have a supplier order number, oldest first.
    async fn orders_awaiting_tracking(&self) -> Result<Vec<Order>>;

    /// Persists tracking data.
    ///
    /// Never blanks an existing tracking field, only moves the status
    /// forward, and queues the shipping update once a tracking number is
    /// known and no shipping email has been sent.
    async fn record_tracking(
        &self,
        order_id: OrderId,
        update: &TrackingUpdate,
        now: DateTime<Utc>,
    ) -> Result<TrackingOutcome>;

    /// Undelivered notifications with fewer than `max_attempts` attempts, oldest first.
    async fn pending_notifications(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<OutboxNotification>>;

    /// Undelivered notifications for one order.
    async fn pending_notifications_for_order(
        &self,
        order_id: OrderId,
        max_attempts: u32,
    ) -> Result<Vec<OutboxNotification>>;

    /// Marks a notification delivered and stamps the order's matching
    /// `*_email_sent_at` guard.
    async fn mark_notification_delivered(
        &self,
        notification_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Counts a failed delivery attempt.
    async fn mark_notification_failed(&self, notification_id: Uuid, error: &str) -> Result<()>;
}
