//! Supplier service trait and in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use domain::{DomainError, FreightItem, FreightQuoter, Money};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::FulfillmentError;

/// A line of a supplier order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentLine {
    /// Supplier variant id.
    pub vid: String,
    pub quantity: u32,
}

/// Order placed with the supplier, in the supplier's field naming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentRequest {
    pub order_number: String,
    pub shipping_customer_name: String,
    pub shipping_phone: String,
    pub shipping_address: String,
    pub shipping_address2: Option<String>,
    pub shipping_city: String,
    pub shipping_province: String,
    pub shipping_zip: String,
    pub shipping_country_code: String,
    pub remark: Option<String>,
    pub products: Vec<ShipmentLine>,
}

/// Trait for dropship supplier operations.
///
/// Responses are returned raw; see [`crate::normalize`] for how they are read.
#[async_trait]
pub trait SupplierApi: Send + Sync {
    /// Fetches tracking data for a supplier order number.
    async fn get_tracking(&self, supplier_order_number: &str) -> Result<Value, FulfillmentError>;

    /// Places an order.
    async fn create_order(&self, request: &ShipmentRequest) -> Result<Value, FulfillmentError>;

    /// Returns available stock for a supplier product, if the supplier reports it.
    async fn get_product_stock(&self, product_id: &str) -> Result<Option<u32>, FulfillmentError>;
}

#[derive(Debug, Default)]
struct InMemorySupplierState {
    orders: Vec<ShipmentRequest>,
    next_id: u32,
    create_response: Option<Value>,
    fail_on_create: bool,
    tracking: HashMap<String, Value>,
    failing_tracking: HashSet<String>,
    tracking_calls: usize,
    stock: HashMap<String, u32>,
    freight_quote: Option<Money>,
    fail_on_quote: bool,
}

/// In-memory supplier for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemorySupplier {
    state: Arc<RwLock<InMemorySupplierState>>,
}

impl InMemorySupplier {
    /// Creates a new in-memory supplier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the supplier to reject order creation.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.state.write().unwrap().fail_on_create = fail;
    }

    /// Replaces the create-order response body.
    pub fn set_create_response(&self, response: Value) {
        self.state.write().unwrap().create_response = Some(response);
    }

    /// Sets the tracking payload returned for a supplier order number.
    pub fn set_tracking(&self, supplier_order_number: &str, payload: Value) {
        self.state
            .write()
            .unwrap()
            .tracking
            .insert(supplier_order_number.to_string(), payload);
    }

    /// Makes tracking lookups for a supplier order number fail.
    pub fn fail_tracking_for(&self, supplier_order_number: &str) {
        self.state
            .write()
            .unwrap()
            .failing_tracking
            .insert(supplier_order_number.to_string());
    }

    pub fn set_stock(&self, product_id: &str, stock: u32) {
        self.state
            .write()
            .unwrap()
            .stock
            .insert(product_id.to_string(), stock);
    }

    pub fn set_freight_quote(&self, quote: Option<Money>) {
        self.state.write().unwrap().freight_quote = quote;
    }

    pub fn set_fail_on_quote(&self, fail: bool) {
        self.state.write().unwrap().fail_on_quote = fail;
    }

    /// Returns every order placed so far.
    pub fn created_orders(&self) -> Vec<ShipmentRequest> {
        self.state.read().unwrap().orders.clone()
    }

    /// Returns the number of orders placed.
    pub fn create_count(&self) -> usize {
        self.state.read().unwrap().orders.len()
    }

    /// Returns the number of tracking lookups made.
    pub fn tracking_calls(&self) -> usize {
        self.state.read().unwrap().tracking_calls
    }
}

#[async_trait]
impl SupplierApi for InMemorySupplier {
    async fn get_tracking(&self, supplier_order_number: &str) -> Result<Value, FulfillmentError> {
        let mut state = self.state.write().unwrap();
        state.tracking_calls += 1;

        if state.failing_tracking.contains(supplier_order_number) {
            return Err(FulfillmentError::SupplierService(format!(
                "tracking lookup failed for {supplier_order_number}"
            )));
        }
        Ok(state
            .tracking
            .get(supplier_order_number)
            .cloned()
            .unwrap_or_else(|| json!({})))
    }

    async fn create_order(&self, request: &ShipmentRequest) -> Result<Value, FulfillmentError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_create {
            return Err(FulfillmentError::SupplierService(
                "Supplier rejected order".to_string(),
            ));
        }

        state.next_id += 1;
        state.orders.push(request.clone());
        let response = state.create_response.clone().unwrap_or_else(|| {
            json!({
                "orderId": format!("SUP-{:04}", state.next_id),
                "orderNumber": format!("SUPN-{:04}", state.next_id),
            })
        });
        Ok(response)
    }

    async fn get_product_stock(&self, product_id: &str) -> Result<Option<u32>, FulfillmentError> {
        Ok(self.state.read().unwrap().stock.get(product_id).copied())
    }
}

#[async_trait]
impl FreightQuoter for InMemorySupplier {
    async fn quote(
        &self,
        _items: &[FreightItem],
        _destination_country: &str,
    ) -> Result<Option<Money>, DomainError> {
        let state = self.state.read().unwrap();
        if state.fail_on_quote {
            return Err(DomainError::FreightQuote("quote unavailable".to_string()));
        }
        Ok(state.freight_quote)
    }
}
