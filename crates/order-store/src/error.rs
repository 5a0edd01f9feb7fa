use common::OrderId;
use thiserror::Error;

/// Errors that can occur when interacting with the order store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No order exists with the given ID.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// An order with the same ID or order number already exists.
    #[error("Duplicate order: {0}")]
    DuplicateOrder(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row holds a value the domain doesn't recognise.
    #[error("Corrupt row: {0}")]
    Corrupt(#[from] domain::DomainError),
}

/// Result type for order store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
