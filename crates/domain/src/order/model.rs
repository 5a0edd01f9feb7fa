//! Order, order item and catalog reference records.

use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{FulfillmentStatus, Money, PaymentStatus, ProductId, ShippingAddress};
use crate::shipping::ShippingMethod;

/// An order as persisted by the order store.
///
/// Fields are mutated only through the store's conditional transitions;
/// this struct is a snapshot of the row at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    /// Human-facing order number, e.g. `ORD-20261014-3F2A9C`.
    pub order_number: String,
    pub customer_email: Option<String>,
    pub payment_status: PaymentStatus,
    pub fulfillment_status: FulfillmentStatus,

    pub subtotal: Money,
    pub shipping_cost: Money,
    pub shipping_method: Option<ShippingMethod>,
    pub discount_amount: Money,
    pub total: Money,
    pub discount_code: Option<String>,

    pub shipping_address: Option<ShippingAddress>,
    pub payment_session_id: Option<String>,
    pub payment_intent_id: Option<String>,

    /// Assigned at most once.
    pub supplier_order_id: Option<String>,
    pub supplier_order_number: Option<String>,
    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
    pub carrier: Option<String>,
    pub supplier_status: Option<String>,

    /// Operational annotation for humans: manual-handling needs, last supplier error.
    pub notes: Option<String>,

    pub paid_at: Option<DateTime<Utc>>,
    /// Set when the digital part of a mixed order became downloadable.
    pub digital_delivered_at: Option<DateTime<Utc>>,
    pub email_sent_at: Option<DateTime<Utc>>,
    pub shipping_email_sent_at: Option<DateTime<Utc>>,
    /// Lease held while a supplier order is being placed.
    pub dispatch_claimed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates a freshly checked-out order in `pending/unfulfilled`.
    pub fn new_pending(order_number: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: OrderId::new(),
            order_number: order_number.into(),
            customer_email: None,
            payment_status: PaymentStatus::Pending,
            fulfillment_status: FulfillmentStatus::Unfulfilled,
            subtotal: Money::zero(),
            shipping_cost: Money::zero(),
            shipping_method: None,
            discount_amount: Money::zero(),
            total: Money::zero(),
            discount_code: None,
            shipping_address: None,
            payment_session_id: None,
            payment_intent_id: None,
            supplier_order_id: None,
            supplier_order_number: None,
            tracking_number: None,
            tracking_url: None,
            carrier: None,
            supplier_status: None,
            notes: None,
            paid_at: None,
            digital_delivered_at: None,
            email_sent_at: None,
            shipping_email_sent_at: None,
            dispatch_claimed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true once a supplier order has been placed for this order.
    pub fn is_dispatched(&self) -> bool {
        self.supplier_order_id.is_some()
    }
}

/// A line of an order.
///
/// Whether the line is digital is a property of the referenced product, so
/// it is looked up in the catalog rather than stored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub variant_id: Option<String>,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
    /// Supplier-side variant id captured at checkout; None defers to the catalog.
    pub supplier_variant_id: Option<String>,
}

impl OrderItem {
    /// Creates a new order item.
    pub fn new(
        order_id: OrderId,
        product_id: impl Into<ProductId>,
        product_name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            product_id: product_id.into(),
            variant_id: None,
            product_name: product_name.into(),
            quantity,
            unit_price,
            supplier_variant_id: None,
        }
    }

    /// Sets the supplier variant id.
    pub fn with_supplier_variant(mut self, vid: impl Into<String>) -> Self {
        self.supplier_variant_id = Some(vid.into());
        self
    }

    /// Returns the total price for this item (quantity * unit_price).
    pub fn total_price(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// Warehouse a physical product ships from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Warehouse {
    Us,
    Cn,
    #[default]
    Other,
}

impl Warehouse {
    pub fn as_str(&self) -> &'static str {
        match self {
            Warehouse::Us => "US",
            Warehouse::Cn => "CN",
            Warehouse::Other => "OTHER",
        }
    }

    /// Lenient parse: anything unrecognised is `Other`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "US" => Warehouse::Us,
            "CN" => Warehouse::Cn,
            _ => Warehouse::Other,
        }
    }
}

/// Read-only catalog data owned by the catalog subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogProduct {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    pub warehouse: Warehouse,
    pub weight_grams: Option<u32>,
    pub supplier_product_id: Option<String>,
    pub supplier_variant_id: Option<String>,
    /// Storage key of the downloadable file; its presence makes the product digital.
    pub digital_file: Option<String>,
}

impl CatalogProduct {
    /// Creates a physical product with no weight or supplier mapping.
    pub fn physical(id: impl Into<ProductId>, name: impl Into<String>, price: Money) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
            warehouse: Warehouse::Other,
            weight_grams: None,
            supplier_product_id: None,
            supplier_variant_id: None,
            digital_file: None,
        }
    }

    /// Creates a digital product backed by the given file.
    pub fn digital(
        id: impl Into<ProductId>,
        name: impl Into<String>,
        price: Money,
        file: impl Into<String>,
    ) -> Self {
        Self {
            digital_file: Some(file.into()),
            ..Self::physical(id, name, price)
        }
    }

    pub fn with_weight(mut self, grams: u32) -> Self {
        self.weight_grams = Some(grams);
        self
    }

    pub fn with_supplier_variant(mut self, vid: impl Into<String>) -> Self {
        self.supplier_variant_id = Some(vid.into());
        self
    }

    pub fn in_warehouse(mut self, warehouse: Warehouse) -> Self {
        self.warehouse = warehouse;
        self
    }

    pub fn is_digital(&self) -> bool {
        self.digital_file
            .as_deref()
            .is_some_and(|f| !f.trim().is_empty())
    }
}

/// Digital/physical make-up of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderComposition {
    AllDigital,
    Mixed,
    AllPhysical,
}

impl OrderComposition {
    /// Classifies items given a predicate telling whether each is digital.
    ///
    /// An empty order is treated as physical so it still reaches a human.
    pub fn classify<'a, I, F>(items: I, is_digital: F) -> Self
    where
        I: IntoIterator<Item = &'a OrderItem>,
        F: Fn(&OrderItem) -> bool,
    {
        let (mut digital, mut physical) = (0usize, 0usize);
        for item in items {
            if is_digital(item) {
                digital += 1;
            } else {
                physical += 1;
            }
        }
        match (digital, physical) {
            (d, 0) if d > 0 => OrderComposition::AllDigital,
            (0, _) => OrderComposition::AllPhysical,
            _ => OrderComposition::Mixed,
        }
    }

    pub fn has_physical(&self) -> bool {
        !matches!(self, OrderComposition::AllDigital)
    }
}

/// A discount code with a usage counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discount {
    pub code: String,
    pub percent_off: u8,
    pub active: bool,
    pub usage_count: u32,
    pub max_uses: Option<u32>,
}

impl Discount {
    /// Returns true if the code can still be applied at checkout.
    pub fn is_redeemable(&self) -> bool {
        self.active && self.max_uses.is_none_or(|max| self.usage_count < max)
    }
}

/// Kinds of transactional email the pipeline sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderConfirmation,
    ShippingUpdate,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::OrderConfirmation => "order_confirmation",
            NotificationKind::ShippingUpdate => "shipping_update",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "order_confirmation" => Some(NotificationKind::OrderConfirmation),
            "shipping_update" => Some(NotificationKind::ShippingUpdate),
            _ => None,
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An outbox record: a notification that became due in a state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxNotification {
    pub id: Uuid,
    pub order_id: OrderId,
    pub kind: NotificationKind,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl OutboxNotification {
    pub fn new(order_id: OrderId, kind: NotificationKind, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            kind,
            created_at: now,
            attempts: 0,
            last_error: None,
            delivered_at: None,
        }
    }
}
