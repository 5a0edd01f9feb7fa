//! External service traits, in-memory implementations for tests and HTTP
//! adapters for production.

pub mod http_notifier;
pub mod http_supplier;
pub mod notifier;
pub mod supplier;

pub use http_notifier::{EmailClientConfig, HttpNotifier};
pub use http_supplier::{HttpSupplierClient, SupplierClientConfig};
pub use notifier::{
    DownloadLink, InMemoryNotifier, NotificationLine, Notifier, OrderConfirmation, ShippingUpdate,
};
pub use supplier::{InMemorySupplier, ShipmentLine, ShipmentRequest, SupplierApi};
