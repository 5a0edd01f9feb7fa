//! Shared types used across the fulfillment workspace.

pub mod types;

pub use types::OrderId;
