//! Domain layer for the dropship fulfillment system.
//!
//! This crate provides:
//! - Order, order item and catalog records
//! - Payment and fulfillment state machines
//! - The shipping cost resolver used at checkout

pub mod error;
pub mod order;
pub mod shipping;

pub use error::DomainError;
pub use order::{
    CatalogProduct, Discount, FulfillmentStatus, Money, NotificationKind, Order,
    OrderComposition, OrderItem, OutboxNotification, PaymentStatus, ProductId, ShippingAddress,
    Warehouse,
};
pub use shipping::{
    FreeShippingRule, FreightItem, FreightQuoter, NoFreightQuote, ShippingConfig, ShippingItem,
    ShippingMethod, ShippingQuote, SupplierQuoteRule, WeightTier, resolve_shipping_cost,
};
