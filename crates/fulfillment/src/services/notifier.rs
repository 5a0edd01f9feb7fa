//! Notification service trait and in-memory implementation.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use domain::{Money, OrderItem, ShippingAddress};
use serde::{Deserialize, Serialize};

use crate::error::FulfillmentError;

/// One order line as shown in an email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationLine {
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub total: Money,
}

impl From<&OrderItem> for NotificationLine {
    fn from(item: &OrderItem) -> Self {
        Self {
            product_name: item.product_name.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            total: item.total_price(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadLink {
    pub product_name: String,
    pub url: String,
}

/// Order confirmation email content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmation {
    pub order_number: String,
    pub customer_email: String,
    pub items: Vec<NotificationLine>,
    pub subtotal: Money,
    pub shipping_cost: Money,
    pub discount_amount: Money,
    pub total: Money,
    /// None for all-digital orders.
    pub shipping_address: Option<ShippingAddress>,
    pub download_links: Vec<DownloadLink>,
}

/// Shipment notification email content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingUpdate {
    pub order_number: String,
    pub customer_email: String,
    pub tracking_number: String,
    pub tracking_url: Option<String>,
    pub carrier: Option<String>,
    pub items: Vec<NotificationLine>,
    pub shipping_address: Option<ShippingAddress>,
}

/// Trait for transactional email delivery.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_order_confirmation(
        &self,
        message: &OrderConfirmation,
    ) -> Result<(), FulfillmentError>;

    async fn send_shipping_update(&self, message: &ShippingUpdate) -> Result<(), FulfillmentError>;
}

#[derive(Debug, Default)]
struct InMemoryNotifierState {
    confirmations: Vec<OrderConfirmation>,
    shipping_updates: Vec<ShippingUpdate>,
    fail_on_send: bool,
    failed_attempts: usize,
}

/// In-memory notifier for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    state: Arc<RwLock<InMemoryNotifierState>>,
}

impl InMemoryNotifier {
    /// Creates a new in-memory notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the notifier to fail every send.
    pub fn set_fail_on_send(&self, fail: bool) {
        self.state.write().unwrap().fail_on_send = fail;
    }

    pub fn confirmations(&self) -> Vec<OrderConfirmation> {
        self.state.read().unwrap().confirmations.clone()
    }

    pub fn shipping_updates(&self) -> Vec<ShippingUpdate> {
        self.state.read().unwrap().shipping_updates.clone()
    }

    /// Returns the number of sends rejected while failing.
    pub fn failed_attempts(&self) -> usize {
        self.state.read().unwrap().failed_attempts
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn send_order_confirmation(
        &self,
        message: &OrderConfirmation,
    ) -> Result<(), FulfillmentError> {
        let mut state = self.state.write().unwrap();
        if state.fail_on_send {
            state.failed_attempts += 1;
            return Err(FulfillmentError::NotificationService(
                "Email provider unavailable".to_string(),
            ));
        }
        state.confirmations.push(message.clone());
        Ok(())
    }

    async fn send_shipping_update(&self, message: &ShippingUpdate) -> Result<(), FulfillmentError> {
        let mut state = self.state.write().unwrap();
        if state.fail_on_send {
            state.failed_attempts += 1;
            return Err(FulfillmentError::NotificationService(
                "Email provider unavailable".to_string(),
            ));
        }
        state.shipping_updates.push(message.clone());
        Ok(())
    }
}
