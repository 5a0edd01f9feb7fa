//! Payment provider webhook handling.

pub mod events;
pub mod processor;
pub mod signature;

pub use events::{
    CHECKOUT_COMPLETED, CHECKOUT_EXPIRED, CompletedCheckout, PaymentEvent, parse_event,
};
pub use processor::{CompletionSummary, PaymentEventProcessor, PaymentOutcome};
pub use signature::{TOLERANCE_SECS, sign, verify_signature};
