//! Payment provider webhook events.

use std::collections::HashMap;

use common::OrderId;
use domain::ShippingAddress;
use serde::Deserialize;
use serde_json::Value;

use crate::error::FulfillmentError;

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";
pub const CHECKOUT_EXPIRED: &str = "checkout.session.expired";

/// A completed checkout session, reduced to the fields the pipeline uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedCheckout {
    pub order_id: OrderId,
    pub session_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub customer_email: Option<String>,
    pub shipping_address: Option<ShippingAddress>,
    /// The storefront's own claim; the catalog is authoritative.
    pub is_all_digital: bool,
    pub discount_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEvent {
    CheckoutCompleted(CompletedCheckout),
    CheckoutExpired { order_id: OrderId },
    /// Event types the pipeline doesn't consume; acknowledged and dropped.
    Ignored { event_type: String },
}

impl PaymentEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            PaymentEvent::CheckoutCompleted(_) => "completed",
            PaymentEvent::CheckoutExpired { .. } => "expired",
            PaymentEvent::Ignored { .. } => "ignored",
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Option<RawData>,
}

#[derive(Debug, Deserialize)]
struct RawData {
    object: RawSession,
}

#[derive(Debug, Default, Deserialize)]
struct RawSession {
    id: Option<String>,
    /// A bare id, or the expanded object.
    payment_intent: Option<Value>,
    customer_email: Option<String>,
    customer_details: Option<RawContact>,
    shipping_details: Option<RawContact>,
    #[serde(default)]
    metadata: HashMap<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawContact {
    email: Option<String>,
    name: Option<String>,
    phone: Option<String>,
    address: Option<RawAddress>,
}

#[derive(Debug, Default, Deserialize)]
struct RawAddress {
    line1: Option<String>,
    line2: Option<String>,
    city: Option<String>,
    state: Option<String>,
    postal_code: Option<String>,
    country: Option<String>,
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn metadata_str(metadata: &HashMap<String, Value>, key: &str) -> Option<String> {
    match metadata.get(key)? {
        Value::String(s) => non_blank(Some(s)),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl RawSession {
    fn order_id(&self) -> Result<OrderId, FulfillmentError> {
        let raw = metadata_str(&self.metadata, "order_id")
            .ok_or(FulfillmentError::MissingIdentifier("metadata.order_id"))?;
        OrderId::parse(&raw)
            .map_err(|_| FulfillmentError::InvalidPayload(format!("malformed order id: {raw}")))
    }

    fn payment_intent_id(&self) -> Option<String> {
        match self.payment_intent.as_ref()? {
            Value::String(s) => non_blank(Some(s)),
            Value::Object(obj) => non_blank(obj.get("id").and_then(Value::as_str)),
            _ => None,
        }
    }

    fn customer_email(&self) -> Option<String> {
        non_blank(
            self.customer_details
                .as_ref()
                .and_then(|c| c.email.as_deref()),
        )
        .or_else(|| non_blank(self.customer_email.as_deref()))
    }

    /// Shipping details win over the billing contact; each field falls back
    /// independently so a partial shipping block still picks up the phone.
    fn shipping_address(&self) -> Option<ShippingAddress> {
        let shipping = self.shipping_details.as_ref();
        let customer = self.customer_details.as_ref();
        let address = shipping
            .and_then(|s| s.address.as_ref())
            .or_else(|| customer.and_then(|c| c.address.as_ref()));

        let contact = |f: fn(&RawContact) -> Option<&str>| {
            non_blank(shipping.and_then(f)).or_else(|| non_blank(customer.and_then(f)))
        };
        let field = |f: fn(&RawAddress) -> Option<&str>| non_blank(address.and_then(f));

        let result = ShippingAddress {
            name: contact(|c| c.name.as_deref()),
            phone: contact(|c| c.phone.as_deref()),
            line1: field(|a| a.line1.as_deref()),
            line2: field(|a| a.line2.as_deref()),
            city: field(|a| a.city.as_deref()),
            state: field(|a| a.state.as_deref()),
            postal_code: field(|a| a.postal_code.as_deref()),
            country: field(|a| a.country.as_deref()).map(|c| c.to_ascii_uppercase()),
        };
        (!result.is_empty()).then_some(result)
    }
}

/// Parses a webhook body. Call only after the signature has been verified.
pub fn parse_event(payload: &[u8]) -> Result<PaymentEvent, FulfillmentError> {
    let raw: RawEvent = serde_json::from_slice(payload)
        .map_err(|e| FulfillmentError::InvalidPayload(e.to_string()))?;

    let session = match raw.event_type.as_str() {
        CHECKOUT_COMPLETED | CHECKOUT_EXPIRED => raw
            .data
            .map(|d| d.object)
            .ok_or_else(|| FulfillmentError::InvalidPayload("missing data.object".to_string()))?,
        _ => {
            return Ok(PaymentEvent::Ignored {
                event_type: raw.event_type,
            });
        }
    };

    let order_id = session.order_id()?;
    if raw.event_type == CHECKOUT_EXPIRED {
        return Ok(PaymentEvent::CheckoutExpired { order_id });
    }

    let is_all_digital = metadata_str(&session.metadata, "is_all_digital")
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));

    Ok(PaymentEvent::CheckoutCompleted(CompletedCheckout {
        order_id,
        session_id: non_blank(session.id.as_deref()),
        payment_intent_id: session.payment_intent_id(),
        customer_email: session.customer_email(),
        shipping_address: session.shipping_address(),
        is_all_digital,
        discount_code: metadata_str(&session.metadata, "discount_code"),
    }))
}
