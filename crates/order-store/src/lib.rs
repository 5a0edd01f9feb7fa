//! Order store for the fulfillment pipeline.
//!
//! The store is the only shared mutable resource in the system. Every
//! state-changing method is a conditional write that only applies if the
//! order is still in the expected prior state, so concurrent webhook
//! deliveries and job runs coordinate through the store instead of locks.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryOrderStore;
pub use postgres::PostgresOrderStore;
pub use store::{
    OrderStore, PaymentCapture, SupplierOrderRef, TrackingOutcome, TrackingUpdate,
    TransitionOutcome,
};
