//! Domain error types.

use thiserror::Error;

/// Errors raised by domain validation.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A weight-tier table or other shipping rule is malformed.
    #[error("Invalid shipping configuration: {0}")]
    InvalidShippingConfig(String),

    /// A persisted status string does not name a known state.
    #[error("Unknown {kind} status: {value}")]
    UnknownStatus { kind: &'static str, value: String },

    /// The freight quote source failed.
    #[error("Freight quote failed: {0}")]
    FreightQuote(String),
}
