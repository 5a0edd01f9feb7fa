//! Order records and their state machines.

mod model;
mod state;
mod value_objects;

pub use model::{
    CatalogProduct, Discount, NotificationKind, Order, OrderComposition, OrderItem,
    OutboxNotification, Warehouse,
};
pub use state::{FulfillmentStatus, PaymentStatus};
pub use value_objects::{Money, ProductId, ShippingAddress};
