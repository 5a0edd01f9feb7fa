//! Supplier fulfillment dispatcher.
//!
//! Places the supplier order for the physical part of a paid order. Supplier
//! failures never surface as errors: they end up in the order's notes and in
//! the returned [`DispatchOutcome`], so a payment webhook stays acknowledged
//! and an operator can re-dispatch later.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use common::OrderId;
use domain::{CatalogProduct, Order, OrderItem, PaymentStatus, ProductId};
use order_store::OrderStore;
use serde::Serialize;

use crate::catalog;
use crate::error::{FulfillmentError, Result};
use crate::normalize;
use crate::services::supplier::{ShipmentLine, ShipmentRequest, SupplierApi};

/// How long a dispatch claim blocks other dispatchers.
pub const DEFAULT_CLAIM_LEASE_MINUTES: i64 = 10;

/// What to do when the captured address is missing fields the supplier requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressPolicy {
    /// Fill the gaps from [`AddressPlaceholders`] and note which fields were filled.
    #[default]
    Placeholder,
    /// Don't dispatch; leave the order for a human to complete the address.
    HoldForReview,
}

impl AddressPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "placeholder" => Some(AddressPolicy::Placeholder),
            "hold" | "hold_for_review" => Some(AddressPolicy::HoldForReview),
            _ => None,
        }
    }
}

/// Values used for required address fields the customer didn't provide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressPlaceholders {
    pub name: String,
    pub phone: String,
    pub line1: String,
    pub city: String,
    pub province: String,
    pub postal_code: String,
    pub country: String,
}

impl Default for AddressPlaceholders {
    fn default() -> Self {
        Self {
            name: "Customer".to_string(),
            phone: "0000000000".to_string(),
            line1: "Address not provided".to_string(),
            city: "Unknown".to_string(),
            province: "N/A".to_string(),
            postal_code: "00000".to_string(),
            country: "US".to_string(),
        }
    }
}

/// Result of one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    pub success: bool,
    /// Nothing was sent to the supplier.
    pub skipped: bool,
    pub message: String,
    pub supplier_order_id: Option<String>,
    pub supplier_order_number: Option<String>,
}

impl DispatchOutcome {
    fn skipped(success: bool, message: impl Into<String>) -> Self {
        Self {
            success,
            skipped: true,
            message: message.into(),
            supplier_order_id: None,
            supplier_order_number: None,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            skipped: false,
            message: message.into(),
            supplier_order_id: None,
            supplier_order_number: None,
        }
    }
}

/// A supplier order ready to place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedShipment {
    pub request: ShipmentRequest,
    /// Address fields that were filled from placeholders.
    pub placeholder_fields: Vec<&'static str>,
}

/// Builds the supplier order from the order's captured address.
pub fn build_shipment_request(
    order: &Order,
    products: Vec<ShipmentLine>,
    placeholders: &AddressPlaceholders,
) -> PreparedShipment {
    let address = order.shipping_address.clone().unwrap_or_default();
    let mut placeholder_fields = Vec::new();
    let mut required = |value: Option<String>, field: &'static str, fallback: &str| {
        value.unwrap_or_else(|| {
            placeholder_fields.push(field);
            fallback.to_string()
        })
    };

    let request = ShipmentRequest {
        order_number: order.order_number.clone(),
        shipping_customer_name: required(address.name, "name", &placeholders.name),
        shipping_phone: required(address.phone, "phone", &placeholders.phone),
        shipping_address: required(address.line1, "address", &placeholders.line1),
        shipping_city: required(address.city, "city", &placeholders.city),
        shipping_province: required(address.state, "province", &placeholders.province),
        shipping_zip: required(
            address.postal_code,
            "postal_code",
            &placeholders.postal_code,
        ),
        shipping_country_code: required(address.country, "country", &placeholders.country),
        shipping_address2: address.line2,
        remark: Some(format!("Store order {}", order.order_number)),
        products,
    };

    PreparedShipment {
        request,
        placeholder_fields,
    }
}

fn join_notes(notes: &[Option<String>]) -> Option<String> {
    let parts: Vec<&str> = notes.iter().flatten().map(String::as_str).collect();
    (!parts.is_empty()).then(|| parts.join("; "))
}

/// Splits physical items into supplier lines and the names of items the
/// supplier can't fulfill (no variant id on the item or its catalog product).
fn partition_items(
    items: &[OrderItem],
    products: &HashMap<ProductId, CatalogProduct>,
) -> (Vec<ShipmentLine>, Vec<String>) {
    let mut lines = Vec::new();
    let mut manual = Vec::new();

    for item in items.iter().filter(|i| !catalog::is_digital(products, i)) {
        let vid = item.supplier_variant_id.clone().or_else(|| {
            products
                .get(&item.product_id)
                .and_then(|p| p.supplier_variant_id.clone())
        });
        match vid {
            Some(vid) => lines.push(ShipmentLine {
                vid,
                quantity: item.quantity,
            }),
            None => manual.push(item.product_name.clone()),
        }
    }

    (lines, manual)
}

pub struct SupplierDispatcher {
    store: Arc<dyn OrderStore>,
    supplier: Arc<dyn SupplierApi>,
    policy: AddressPolicy,
    placeholders: AddressPlaceholders,
    lease: Duration,
}

impl SupplierDispatcher {
    pub fn new(store: Arc<dyn OrderStore>, supplier: Arc<dyn SupplierApi>) -> Self {
        Self {
            store,
            supplier,
            policy: AddressPolicy::default(),
            placeholders: AddressPlaceholders::default(),
            lease: Duration::minutes(DEFAULT_CLAIM_LEASE_MINUTES),
        }
    }

    pub fn with_address_policy(mut self, policy: AddressPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_placeholders(mut self, placeholders: AddressPlaceholders) -> Self {
        self.placeholders = placeholders;
        self
    }

    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Places the supplier order for `order_id` unless one already exists.
    ///
    /// Errors only for a missing order or a failing store.
    #[tracing::instrument(skip(self))]
    pub async fn dispatch(&self, order_id: OrderId) -> Result<DispatchOutcome> {
        let outcome = self.try_dispatch(order_id).await?;
        let result = match (outcome.success, outcome.skipped) {
            (true, false) => "dispatched",
            (true, true) => "skipped",
            (false, true) => "held",
            (false, false) => "failed",
        };
        metrics::counter!("supplier_dispatch_total", "result" => result).increment(1);
        tracing::info!(%order_id, result, message = %outcome.message, "dispatch finished");
        Ok(outcome)
    }

    async fn try_dispatch(&self, order_id: OrderId) -> Result<DispatchOutcome> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(FulfillmentError::OrderNotFound(order_id))?;

        if order.is_dispatched() {
            return Ok(DispatchOutcome {
                success: true,
                skipped: true,
                message: "already dispatched".to_string(),
                supplier_order_id: order.supplier_order_id.clone(),
                supplier_order_number: order.supplier_order_number.clone(),
            });
        }
        if order.payment_status != PaymentStatus::Paid {
            return Ok(DispatchOutcome::skipped(
                false,
                format!("order is not paid ({})", order.payment_status),
            ));
        }

        let items = self.store.get_items(order_id).await?;
        let products = catalog::products_for(self.store.as_ref(), &items).await?;
        let (lines, manual) = partition_items(&items, &products);
        let now = Utc::now();

        if lines.is_empty() {
            if manual.is_empty() {
                return Ok(DispatchOutcome::skipped(true, "no physical items"));
            }
            let note = format!("Manual fulfillment required: {}", manual.join(", "));
            tracing::warn!(
                %order_id,
                items = manual.len(),
                "no item can be fulfilled by the supplier"
            );
            self.store.set_notes(order_id, Some(&note), now).await?;
            return Ok(DispatchOutcome::skipped(true, note));
        }

        let manual_note = (!manual.is_empty()).then(|| {
            format!(
                "{} item(s) require manual fulfillment: {}",
                manual.len(),
                manual.join(", ")
            )
        });

        let prepared = build_shipment_request(&order, lines, &self.placeholders);
        let address_note = (!prepared.placeholder_fields.is_empty()).then(|| {
            let fields = prepared.placeholder_fields.join(", ");
            match self.policy {
                AddressPolicy::Placeholder => format!("Address placeholders used: {fields}"),
                AddressPolicy::HoldForReview => {
                    format!("Held for address review, missing: {fields}")
                }
            }
        });

        if self.policy == AddressPolicy::HoldForReview
            && let Some(note) = &address_note
        {
            let notes = join_notes(&[Some(note.clone()), manual_note.clone()]);
            self.store
                .set_notes(order_id, notes.as_deref(), now)
                .await?;
            return Ok(DispatchOutcome::skipped(false, note.clone()));
        }

        if !self
            .store
            .try_claim_dispatch(order_id, now, self.lease)
            .await?
        {
            return Ok(DispatchOutcome::skipped(
                true,
                "dispatch already in progress",
            ));
        }

        let placed = self
            .supplier
            .create_order(&prepared.request)
            .await
            .and_then(|response| {
                normalize::extract_supplier_order_ref(&response).ok_or_else(|| {
                    FulfillmentError::SupplierService(
                        "response carried no supplier order id".to_string(),
                    )
                })
            });

        match placed {
            Ok(supplier) => {
                let notes = join_notes(&[manual_note, address_note]);
                let recorded = self
                    .store
                    .complete_dispatch(order_id, &supplier, notes.as_deref(), Utc::now())
                    .await
                    .inspect_err(|e| {
                        tracing::error!(
                            %order_id,
                            supplier_order_id = %supplier.order_id,
                            supplier_order_number = %supplier.order_number,
                            error = %e,
                            "supplier accepted the order but recording it failed"
                        );
                        metrics::counter!("dispatch_unrecorded_total").increment(1);
                    })?;
                if !recorded {
                    tracing::warn!(
                        %order_id,
                        supplier_order_id = %supplier.order_id,
                        "order was dispatched concurrently"
                    );
                    return Ok(DispatchOutcome::skipped(true, "already dispatched"));
                }
                Ok(DispatchOutcome {
                    success: true,
                    skipped: false,
                    message: "dispatched to supplier".to_string(),
                    supplier_order_id: Some(supplier.order_id),
                    supplier_order_number: Some(supplier.order_number),
                })
            }
            Err(e) => {
                tracing::error!(%order_id, error = %e, "supplier dispatch failed");
                let failure = format!("Supplier dispatch failed: {e}");
                let notes = join_notes(&[Some(failure.clone()), manual_note])
                    .unwrap_or_else(|| failure.clone());
                self.store
                    .fail_dispatch(order_id, &notes, Utc::now())
                    .await?;
                Ok(DispatchOutcome::failed(failure))
            }
        }
    }
}
