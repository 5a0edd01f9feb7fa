//! Shipping cost resolution for checkout.

mod config;
mod resolver;

pub use config::{FreeShippingRule, ShippingConfig, SupplierQuoteRule, WeightTier};
pub use resolver::{
    FreightItem, FreightQuoter, NoFreightQuote, ShippingItem, ShippingMethod, ShippingQuote,
    free_shipping_blocked_by_weight, resolve_shipping_cost, weight_based_cost,
};
