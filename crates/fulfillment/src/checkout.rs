//! Checkout pricing and pending order creation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use common::OrderId;
use domain::{
    CatalogProduct, FreightQuoter, Money, Order, OrderItem, ProductId, ShippingConfig,
    ShippingItem, ShippingQuote, resolve_shipping_cost,
};
use order_store::OrderStore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FulfillmentError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub items: Vec<CartLine>,
    #[serde(default)]
    pub discount_code: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
}

/// A cart line joined with its catalog record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    pub product: CatalogProduct,
    pub quantity: u32,
}

impl PricedLine {
    pub fn total(&self) -> Money {
        self.product.price.multiply(self.quantity)
    }

    fn shipping_item(&self) -> ShippingItem {
        if self.product.is_digital() {
            return ShippingItem::digital(self.quantity, self.product.price);
        }
        let item = ShippingItem::physical(
            self.quantity,
            self.product.price,
            self.product.weight_grams,
        );
        match &self.product.supplier_variant_id {
            Some(vid) => item.with_supplier_variant(vid.clone()),
            None => item,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedCart {
    pub lines: Vec<PricedLine>,
    pub subtotal: Money,
}

impl PricedCart {
    pub fn is_all_digital(&self) -> bool {
        self.lines.iter().all(|l| l.product.is_digital())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutResult {
    pub order_id: OrderId,
    pub order_number: String,
    pub subtotal: Money,
    pub discount_amount: Money,
    pub shipping: ShippingQuote,
    pub total: Money,
    /// Hint for the payment session metadata.
    pub is_all_digital: bool,
}

/// Generates a human-readable order number: `ORD-YYYYMMDD-XXXXXX`.
pub fn generate_order_number() -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..6].to_ascii_uppercase();
    format!("ORD-{}-{suffix}", Utc::now().format("%Y%m%d"))
}

pub struct CheckoutService {
    store: Arc<dyn OrderStore>,
    quoter: Arc<dyn FreightQuoter>,
    config: ShippingConfig,
}

impl CheckoutService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        quoter: Arc<dyn FreightQuoter>,
        config: ShippingConfig,
    ) -> Self {
        Self {
            store,
            quoter,
            config,
        }
    }

    /// Joins cart lines with catalog prices. Lines of the same product are merged.
    pub async fn price_cart(&self, lines: &[CartLine]) -> Result<PricedCart> {
        if lines.is_empty() {
            return Err(FulfillmentError::InvalidCart("cart is empty".to_string()));
        }

        let mut quantities: Vec<(ProductId, u32)> = Vec::new();
        for line in lines {
            if line.quantity == 0 {
                return Err(FulfillmentError::InvalidCart(format!(
                    "zero quantity for {}",
                    line.product_id
                )));
            }
            match quantities.iter_mut().find(|(id, _)| *id == line.product_id) {
                Some((_, qty)) => {
                    let Some(total) = qty.checked_add(line.quantity) else {
                        return Err(FulfillmentError::InvalidCart(format!(
                            "quantity too large for {}",
                            line.product_id
                        )));
                    };
                    *qty = total;
                }
                None => quantities.push((line.product_id.clone(), line.quantity)),
            }
        }

        let ids: Vec<ProductId> = quantities.iter().map(|(id, _)| id.clone()).collect();
        let mut catalog: HashMap<ProductId, CatalogProduct> = self
            .store
            .get_products(&ids)
            .await?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();

        let lines = quantities
            .into_iter()
            .map(|(id, quantity)| {
                catalog
                    .remove(&id)
                    .map(|product| PricedLine { product, quantity })
                    .ok_or_else(|| FulfillmentError::InvalidCart(format!("unknown product {id}")))
            })
            .collect::<Result<Vec<_>>>()?;
        let subtotal = lines.iter().map(PricedLine::total).sum();

        Ok(PricedCart { lines, subtotal })
    }

    /// Resolves the shipping charge for a cart.
    pub async fn quote_shipping(&self, lines: &[CartLine]) -> Result<ShippingQuote> {
        let cart = self.price_cart(lines).await?;
        Ok(self.quote_priced(&cart).await)
    }

    async fn quote_priced(&self, cart: &PricedCart) -> ShippingQuote {
        let items: Vec<ShippingItem> = cart.lines.iter().map(PricedLine::shipping_item).collect();
        resolve_shipping_cost(&items, cart.subtotal, &self.config, self.quoter.as_ref()).await
    }

    /// Prices the cart and persists it as a pending order.
    ///
    /// The discount is taken off the subtotal; free shipping is judged on the
    /// subtotal before the discount.
    #[tracing::instrument(skip_all, fields(lines = request.items.len()))]
    pub async fn create_order(&self, request: &CheckoutRequest) -> Result<CheckoutResult> {
        let cart = self.price_cart(&request.items).await?;

        let discount = match request
            .discount_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
        {
            Some(code) => {
                let discount = self
                    .store
                    .get_discount(code)
                    .await?
                    .filter(|d| d.is_redeemable())
                    .ok_or_else(|| {
                        FulfillmentError::InvalidCart(format!("discount code {code} is not valid"))
                    })?;
                Some(discount)
            }
            None => None,
        };
        let discount_amount = discount
            .as_ref()
            .map(|d| cart.subtotal.percent(d.percent_off))
            .unwrap_or_else(Money::zero);

        let shipping = self.quote_priced(&cart).await;
        let total = cart.subtotal - discount_amount + shipping.cost;

        let now = Utc::now();
        let mut order = Order::new_pending(generate_order_number(), now);
        order.customer_email = request.customer_email.clone();
        order.subtotal = cart.subtotal;
        order.discount_amount = discount_amount;
        order.discount_code = discount.map(|d| d.code);
        order.shipping_cost = shipping.cost;
        order.shipping_method = Some(shipping.method);
        order.total = total;

        let items: Vec<OrderItem> = cart
            .lines
            .iter()
            .map(|line| {
                let item = OrderItem::new(
                    order.id,
                    line.product.id.clone(),
                    line.product.name.clone(),
                    line.quantity,
                    line.product.price,
                );
                match &line.product.supplier_variant_id {
                    Some(vid) => item.with_supplier_variant(vid.clone()),
                    None => item,
                }
            })
            .collect();

        self.store.insert_order(&order, &items).await?;
        metrics::counter!("checkout_orders_created_total").increment(1);
        tracing::info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = %total,
            "order created"
        );

        Ok(CheckoutResult {
            order_id: order.id,
            order_number: order.order_number,
            subtotal: cart.subtotal,
            discount_amount,
            is_all_digital: cart.is_all_digital(),
            shipping,
            total,
        })
    }
}
