//! Order payment and fulfillment state machines.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Payment state of an order.
///
/// ```text
/// Pending ──┬──► Paid
///           └──► Expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Checkout session created, awaiting the provider's completion event.
    #[default]
    Pending,

    /// Provider confirmed the payment (terminal).
    Paid,

    /// Checkout session expired without payment (terminal).
    Expired,
}

impl PaymentStatus {
    /// Returns true if a completion or expiry event may still change this order.
    pub fn is_pending(&self) -> bool {
        matches!(self, PaymentStatus::Pending)
    }

    /// Returns the state name as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "expired" => Ok(PaymentStatus::Expired),
            other => Err(DomainError::UnknownStatus {
                kind: "payment",
                value: other.to_string(),
            }),
        }
    }
}

/// Fulfillment state of an order.
///
/// State transitions:
/// ```text
/// Unfulfilled ──► Processing ──► Shipped ──► Delivered
///      │               └──────────────────────▲
///      └──► Cancelled   (payment expiry only)
/// ```
///
/// Forward jumps are allowed (an all-digital order goes straight from
/// Processing to Delivered, and a tracking poll may report delivery before
/// a shipped state was ever observed). Nothing ever moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FulfillmentStatus {
    #[default]
    Unfulfilled,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl FulfillmentStatus {
    /// Position along the forward path. Cancelled sits outside it.
    fn rank(&self) -> Option<u8> {
        match self {
            FulfillmentStatus::Unfulfilled => Some(0),
            FulfillmentStatus::Processing => Some(1),
            FulfillmentStatus::Shipped => Some(2),
            FulfillmentStatus::Delivered => Some(3),
            FulfillmentStatus::Cancelled => None,
        }
    }

    /// Returns true if moving from `self` to `next` is a legal forward step.
    ///
    /// Cancellation is only reachable from Unfulfilled.
    pub fn can_advance_to(&self, next: FulfillmentStatus) -> bool {
        match (self.rank(), next.rank()) {
            (Some(current), Some(target)) => target > current,
            (Some(0), None) => true,
            _ => false,
        }
    }

    /// Returns true if the reconciliation job should poll the supplier for this order.
    pub fn awaits_tracking(&self) -> bool {
        matches!(
            self,
            FulfillmentStatus::Processing | FulfillmentStatus::Shipped
        )
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FulfillmentStatus::Delivered | FulfillmentStatus::Cancelled
        )
    }

    /// Returns the state name as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentStatus::Unfulfilled => "unfulfilled",
            FulfillmentStatus::Processing => "processing",
            FulfillmentStatus::Shipped => "shipped",
            FulfillmentStatus::Delivered => "delivered",
            FulfillmentStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for FulfillmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FulfillmentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unfulfilled" => Ok(FulfillmentStatus::Unfulfilled),
            "processing" => Ok(FulfillmentStatus::Processing),
            "shipped" => Ok(FulfillmentStatus::Shipped),
            "delivered" => Ok(FulfillmentStatus::Delivered),
            "cancelled" => Ok(FulfillmentStatus::Cancelled),
            other => Err(DomainError::UnknownStatus {
                kind: "fulfillment",
                value: other.to_string(),
            }),
        }
    }
}
