//! Fulfillment error types.

use common::OrderId;
use order_store::StoreError;
use thiserror::Error;

/// Errors that can occur while processing payments, dispatching or reconciling.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// The webhook signature header is missing, malformed, stale or wrong.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// The webhook body is not a JSON event.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// A required identifier (e.g. the internal order id) is absent.
    #[error("Missing identifier: {0}")]
    MissingIdentifier(&'static str),

    /// No order exists with the given ID.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The shopping cart can't be priced.
    #[error("Invalid cart: {0}")]
    InvalidCart(String),

    /// Supplier API error.
    #[error("Supplier service error: {0}")]
    SupplierService(String),

    /// Email delivery error.
    #[error("Notification service error: {0}")]
    NotificationService(String),

    /// Order store error.
    #[error("Order store error: {0}")]
    Store(StoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FulfillmentError {
    /// Returns true for errors caused by the caller's input rather than by
    /// this service or its partners.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            FulfillmentError::InvalidSignature(_)
                | FulfillmentError::InvalidPayload(_)
                | FulfillmentError::MissingIdentifier(_)
                | FulfillmentError::InvalidCart(_)
        )
    }
}

impl From<StoreError> for FulfillmentError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::OrderNotFound(id) => FulfillmentError::OrderNotFound(id),
            other => FulfillmentError::Store(other),
        }
    }
}

/// Convenience type alias for fulfillment results.
pub type Result<T> = std::result::Result<T, FulfillmentError>;
