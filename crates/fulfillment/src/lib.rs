//! Order fulfillment pipeline.
//!
//! This crate provides:
//! - Payment webhook verification and the payment state transitions
//! - Supplier dispatch for the physical part of paid orders
//! - The tracking reconciliation job
//! - The notification outbox relay
//! - Checkout pricing
//!
//! Every external partner sits behind a trait ([`SupplierApi`], [`Notifier`],
//! [`domain::FreightQuoter`]) with an in-memory implementation for tests and
//! an HTTP implementation for production.

mod catalog;
pub mod checkout;
pub mod dispatcher;
pub mod error;
pub mod normalize;
pub mod outbox;
pub mod payment;
pub mod rate_limit;
pub mod retry;
pub mod services;
pub mod tracking;

pub use checkout::{CartLine, CheckoutRequest, CheckoutResult, CheckoutService, PricedCart};
pub use dispatcher::{AddressPlaceholders, AddressPolicy, DispatchOutcome, SupplierDispatcher};
pub use error::{FulfillmentError, Result};
pub use outbox::{NotificationRelay, RelayReport};
pub use payment::{PaymentEventProcessor, PaymentOutcome};
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;
pub use services::{
    EmailClientConfig, HttpNotifier, HttpSupplierClient, InMemoryNotifier, InMemorySupplier,
    Notifier, SupplierApi, SupplierClientConfig,
};
pub use tracking::{OrderTrackingResult, ReconcileReport, TrackingReconciler};
