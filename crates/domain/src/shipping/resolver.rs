//! The shipping cost cascade.
//!
//! Rules are tried in order and the first applicable one wins:
//!
//! 1. all-digital carts ship free
//! 2. free shipping over the threshold, unless a physical item is over the weight cap
//! 3. marked-up real-time supplier quote
//! 4. heaviest item's weight tier, floored by the unknown-weight rate
//! 5. unknown-weight rate
//! 6. flat rate
//!
//! Only rule 3 leaves the process; it goes through [`FreightQuoter`] so the
//! rest of the cascade can be exercised with [`NoFreightQuote`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ShippingConfig;
use crate::error::DomainError;
use crate::order::Money;

/// A cart line as seen by the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingItem {
    pub quantity: u32,
    pub unit_price: Money,
    pub is_digital: bool,
    pub supplier_variant_id: Option<String>,
    /// Per-unit weight.
    pub weight_grams: Option<u32>,
}

impl ShippingItem {
    pub fn physical(quantity: u32, unit_price: Money, weight_grams: Option<u32>) -> Self {
        Self {
            quantity,
            unit_price,
            is_digital: false,
            supplier_variant_id: None,
            weight_grams,
        }
    }

    pub fn digital(quantity: u32, unit_price: Money) -> Self {
        Self {
            quantity,
            unit_price,
            is_digital: true,
            supplier_variant_id: None,
            weight_grams: None,
        }
    }

    pub fn with_supplier_variant(mut self, vid: impl Into<String>) -> Self {
        self.supplier_variant_id = Some(vid.into());
        self
    }
}

/// How the shipping charge was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShippingMethod {
    Free,
    SupplierQuote,
    WeightTier,
    UnknownWeight,
    FlatRate,
}

impl ShippingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShippingMethod::Free => "free",
            ShippingMethod::SupplierQuote => "supplier_quote",
            ShippingMethod::WeightTier => "weight_tier",
            ShippingMethod::UnknownWeight => "unknown_weight",
            ShippingMethod::FlatRate => "flat_rate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "free" => Some(ShippingMethod::Free),
            "supplier_quote" => Some(ShippingMethod::SupplierQuote),
            "weight_tier" => Some(ShippingMethod::WeightTier),
            "unknown_weight" => Some(ShippingMethod::UnknownWeight),
            "flat_rate" => Some(ShippingMethod::FlatRate),
            _ => None,
        }
    }
}

impl std::fmt::Display for ShippingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The resolver's answer: what to charge, how, and what to show the buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingQuote {
    pub cost: Money,
    pub method: ShippingMethod,
    pub label: String,
}

impl ShippingQuote {
    fn new(cost: Money, method: ShippingMethod, label: &str) -> Self {
        Self {
            cost,
            method,
            label: label.to_string(),
        }
    }
}

/// A supplier-fulfillable line sent for a freight quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreightItem {
    pub supplier_variant_id: String,
    pub quantity: u32,
}

/// Source of real-time freight quotes.
#[async_trait]
pub trait FreightQuoter: Send + Sync {
    /// Returns the supplier's freight price, or None if it has no quote.
    async fn quote(
        &self,
        items: &[FreightItem],
        destination_country: &str,
    ) -> Result<Option<Money>, DomainError>;
}

/// Quoter that never has a quote.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFreightQuote;

#[async_trait]
impl FreightQuoter for NoFreightQuote {
    async fn quote(
        &self,
        _items: &[FreightItem],
        _destination_country: &str,
    ) -> Result<Option<Money>, DomainError> {
        Ok(None)
    }
}

const LABEL_DIGITAL: &str = "Digital Delivery";
const LABEL_FREE: &str = "Free Shipping";
const LABEL_STANDARD: &str = "Standard Shipping";

/// Resolves the shipping charge for a priced cart.
#[tracing::instrument(skip_all, fields(items = items.len(), subtotal = %subtotal))]
pub async fn resolve_shipping_cost(
    items: &[ShippingItem],
    subtotal: Money,
    config: &ShippingConfig,
    quoter: &dyn FreightQuoter,
) -> ShippingQuote {
    let physical: Vec<&ShippingItem> = items.iter().filter(|i| !i.is_digital).collect();

    if physical.is_empty() {
        return ShippingQuote::new(Money::zero(), ShippingMethod::Free, LABEL_DIGITAL);
    }

    let unknown_weight = physical.iter().filter(|i| i.weight_grams.is_none()).count();
    let free = &config.free_shipping;

    if free.enabled && subtotal >= free.threshold {
        if free_shipping_blocked_by_weight(&physical, free.max_weight_grams) {
            tracing::debug!(
                cap_grams = free.max_weight_grams,
                "free shipping blocked by item over weight cap"
            );
        } else {
            if unknown_weight > 0 && free.max_weight_grams > 0 {
                tracing::warn!(
                    unknown_weight,
                    "free shipping granted with items of unknown weight"
                );
                metrics::counter!("shipping_unknown_weight_items_total")
                    .increment(unknown_weight as u64);
            }
            return ShippingQuote::new(Money::zero(), ShippingMethod::Free, LABEL_FREE);
        }
    }

    if config.supplier_quote.enabled
        && let Some(quote) = supplier_quote(&physical, config, quoter).await
    {
        return quote;
    }

    if let Some(cost) = weight_based_cost(&physical, config) {
        return ShippingQuote::new(cost, ShippingMethod::WeightTier, LABEL_STANDARD);
    }

    if config.unknown_weight_rate.is_positive() {
        return ShippingQuote::new(
            config.unknown_weight_rate,
            ShippingMethod::UnknownWeight,
            LABEL_STANDARD,
        );
    }

    ShippingQuote::new(config.flat_rate, ShippingMethod::FlatRate, LABEL_STANDARD)
}

/// Returns true if a cap is configured and some physical item is known to exceed it.
///
/// Items of unknown weight can't be shown to violate the cap and never block.
pub fn free_shipping_blocked_by_weight(physical: &[&ShippingItem], cap_grams: u32) -> bool {
    cap_grams > 0
        && physical
            .iter()
            .any(|i| i.weight_grams.is_some_and(|w| w > cap_grams))
}

/// Tier price of the heaviest known-weight item, floored by the
/// unknown-weight rate when any item's weight is missing.
///
/// Returns None when no item has a known weight.
pub fn weight_based_cost(physical: &[&ShippingItem], config: &ShippingConfig) -> Option<Money> {
    let heaviest = physical.iter().filter_map(|i| i.weight_grams).max()?;
    let tier = config.tier_price(heaviest)?;

    if physical.iter().any(|i| i.weight_grams.is_none()) {
        Some(tier.max(config.unknown_weight_rate))
    } else {
        Some(tier)
    }
}

async fn supplier_quote(
    physical: &[&ShippingItem],
    config: &ShippingConfig,
    quoter: &dyn FreightQuoter,
) -> Option<ShippingQuote> {
    let freight_items: Vec<FreightItem> = physical
        .iter()
        .filter_map(|i| {
            i.supplier_variant_id.as_ref().map(|vid| FreightItem {
                supplier_variant_id: vid.clone(),
                quantity: i.quantity,
            })
        })
        .collect();

    if freight_items.is_empty() {
        return None;
    }

    let rule = &config.supplier_quote;
    let destination = rule.destination_country.as_str();
    match quoter.quote(&freight_items, destination).await {
        Ok(Some(raw)) if raw.is_positive() => {
            let cost = raw
                .with_markup(rule.markup_percent)
                .max(rule.minimum_charge);
            Some(ShippingQuote::new(
                cost,
                ShippingMethod::SupplierQuote,
                LABEL_STANDARD,
            ))
        }
        Ok(_) => {
            tracing::debug!("supplier returned no freight quote");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "freight quote failed, falling back to weight tiers");
            metrics::counter!("shipping_quote_failures_total").increment(1);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shipping::WeightTier;

    struct FixedQuote(Option<Money>);

    #[async_trait]
    impl FreightQuoter for FixedQuote {
        async fn quote(
            &self,
            _items: &[FreightItem],
            _destination_country: &str,
        ) -> Result<Option<Money>, DomainError> {
            Ok(self.0)
        }
    }

    struct FailingQuote;

    #[async_trait]
    impl FreightQuoter for FailingQuote {
        async fn quote(
            &self,
            _items: &[FreightItem],
            _destination_country: &str,
        ) -> Result<Option<Money>, DomainError> {
            Err(DomainError::FreightQuote("timeout".to_string()))
        }
    }

    fn cents(c: i64) -> Money {
        Money::from_cents(c)
    }

    fn mapped(price: i64) -> ShippingItem {
        let item = ShippingItem::physical(1, cents(price), Some(300));
        item.with_supplier_variant("V-1")
    }

    fn config() -> ShippingConfig {
        ShippingConfig {
            weight_tiers: vec![
                WeightTier::up_to(500, cents(500)),
                WeightTier::up_to(2000, cents(900)),
                WeightTier::up_to(5000, cents(1500)),
                WeightTier::unbounded(cents(2500)),
            ],
            unknown_weight_rate: cents(1000),
            flat_rate: cents(700),
            ..ShippingConfig::default()
        }
    }

    fn quote_enabled(mut config: ShippingConfig) -> ShippingConfig {
        config.supplier_quote.enabled = true;
        config.supplier_quote.markup_percent = 20.0;
        config.supplier_quote.minimum_charge = cents(600);
        config
    }

    #[tokio::test]
    async fn test_digital_cart_ships_free() {
        let items = vec![ShippingItem::digital(1, cents(1200))];
        let quote = resolve_shipping_cost(&items, cents(1200), &config(), &NoFreightQuote).await;
        assert_eq!(quote.cost, Money::zero());
        assert_eq!(quote.method, ShippingMethod::Free);
        assert_eq!(quote.label, "Digital Delivery");
    }

    #[tokio::test]
    async fn test_digital_cart_is_free_regardless_of_config() {
        let mut cfg = quote_enabled(config());
        cfg.free_shipping.enabled = false;
        cfg.flat_rate = cents(99_999);
        let items = vec![
            ShippingItem::digital(3, cents(100)),
            ShippingItem::digital(1, cents(50)),
        ];
        let quote =
            resolve_shipping_cost(&items, cents(1), &cfg, &FixedQuote(Some(cents(800)))).await;
        assert_eq!(quote.cost, Money::zero());
    }

    #[tokio::test]
    async fn test_free_shipping_over_threshold() {
        let items = vec![ShippingItem::physical(1, cents(6000), Some(1500))];
        let quote = resolve_shipping_cost(&items, cents(6000), &config(), &NoFreightQuote).await;
        assert_eq!(quote.cost, Money::zero());
        assert_eq!(quote.method, ShippingMethod::Free);
        assert_eq!(quote.label, "Free Shipping");
    }

    #[tokio::test]
    async fn test_free_shipping_blocked_by_heavy_item() {
        let mut cfg = config();
        cfg.free_shipping.threshold = cents(5000);
        cfg.free_shipping.max_weight_grams = 2000;
        let items = vec![ShippingItem::physical(1, cents(8000), Some(3000))];

        let quote = resolve_shipping_cost(&items, cents(8000), &cfg, &NoFreightQuote).await;
        assert_eq!(quote.method, ShippingMethod::WeightTier);
        assert_eq!(quote.cost, cents(1500));
    }

    #[tokio::test]
    async fn test_unknown_weight_does_not_block_free_shipping() {
        let items = vec![
            ShippingItem::physical(1, cents(4000), Some(800)),
            ShippingItem::physical(1, cents(2000), None),
        ];
        let quote = resolve_shipping_cost(&items, cents(6000), &config(), &NoFreightQuote).await;
        assert_eq!(quote.method, ShippingMethod::Free);
    }

    #[tokio::test]
    async fn test_no_cap_never_blocks() {
        let mut cfg = config();
        cfg.free_shipping.max_weight_grams = 0;
        let items = vec![ShippingItem::physical(1, cents(9000), Some(40_000))];
        let quote = resolve_shipping_cost(&items, cents(9000), &cfg, &NoFreightQuote).await;
        assert_eq!(quote.method, ShippingMethod::Free);
    }

    #[tokio::test]
    async fn test_below_threshold_uses_tier() {
        let items = vec![ShippingItem::physical(2, cents(1000), Some(400))];
        let quote = resolve_shipping_cost(&items, cents(2000), &config(), &NoFreightQuote).await;
        assert_eq!(quote.method, ShippingMethod::WeightTier);
        assert_eq!(quote.cost, cents(500));
    }

    #[tokio::test]
    async fn test_heaviest_item_selects_tier() {
        let items = vec![
            ShippingItem::physical(5, cents(100), Some(100)),
            ShippingItem::physical(1, cents(100), Some(4500)),
            ShippingItem::physical(1, cents(100), Some(1200)),
        ];
        let quote = resolve_shipping_cost(&items, cents(700), &config(), &NoFreightQuote).await;
        assert_eq!(quote.cost, cents(1500));
    }

    #[tokio::test]
    async fn test_unknown_weight_floors_tier_price() {
        let items = vec![
            ShippingItem::physical(1, cents(500), Some(200)),
            ShippingItem::physical(1, cents(500), None),
        ];
        let quote = resolve_shipping_cost(&items, cents(1000), &config(), &NoFreightQuote).await;
        assert_eq!(quote.method, ShippingMethod::WeightTier);
        assert_eq!(quote.cost, cents(1000));
    }

    #[tokio::test]
    async fn test_tier_above_unknown_rate_is_kept() {
        let items = vec![
            ShippingItem::physical(1, cents(500), Some(6000)),
            ShippingItem::physical(1, cents(500), None),
        ];
        let quote = resolve_shipping_cost(&items, cents(1000), &config(), &NoFreightQuote).await;
        assert_eq!(quote.cost, cents(2500));
    }

    #[tokio::test]
    async fn test_all_unknown_weight_uses_unknown_rate() {
        let items = vec![ShippingItem::physical(1, cents(500), None)];
        let quote = resolve_shipping_cost(&items, cents(500), &config(), &NoFreightQuote).await;
        assert_eq!(quote.method, ShippingMethod::UnknownWeight);
        assert_eq!(quote.cost, cents(1000));
    }

    #[tokio::test]
    async fn test_flat_rate_last_resort() {
        let mut cfg = config();
        cfg.unknown_weight_rate = Money::zero();
        let items = vec![ShippingItem::physical(1, cents(500), None)];
        let quote = resolve_shipping_cost(&items, cents(500), &cfg, &NoFreightQuote).await;
        assert_eq!(quote.method, ShippingMethod::FlatRate);
        assert_eq!(quote.cost, cents(700));
    }

    #[tokio::test]
    async fn test_supplier_quote_marked_up() {
        let items = vec![mapped(1000)];
        let quote = resolve_shipping_cost(
            &items,
            cents(1000),
            &quote_enabled(config()),
            &FixedQuote(Some(cents(1000))),
        )
        .await;
        assert_eq!(quote.method, ShippingMethod::SupplierQuote);
        assert_eq!(quote.cost, cents(1200));
    }

    #[tokio::test]
    async fn test_supplier_quote_respects_minimum() {
        let items = vec![mapped(1000)];
        let quote = resolve_shipping_cost(
            &items,
            cents(1000),
            &quote_enabled(config()),
            &FixedQuote(Some(cents(100))),
        )
        .await;
        assert_eq!(quote.cost, cents(600));
    }

    #[tokio::test]
    async fn test_zero_quote_falls_through() {
        let items = vec![mapped(1000)];
        let cfg = quote_enabled(config());

        let zero_quote = FixedQuote(Some(Money::zero()));
        let zero = resolve_shipping_cost(&items, cents(1000), &cfg, &zero_quote).await;
        assert_eq!(zero.method, ShippingMethod::WeightTier);

        let none = resolve_shipping_cost(&items, cents(1000), &cfg, &FixedQuote(None)).await;
        assert_eq!(none.method, ShippingMethod::WeightTier);

        let failed = resolve_shipping_cost(&items, cents(1000), &cfg, &FailingQuote).await;
        assert_eq!(failed.method, ShippingMethod::WeightTier);
    }

    #[tokio::test]
    async fn test_quote_skipped_without_supplier_items() {
        let items = vec![ShippingItem::physical(1, cents(1000), Some(300))];
        let quote = resolve_shipping_cost(
            &items,
            cents(1000),
            &quote_enabled(config()),
            &FixedQuote(Some(cents(5000))),
        )
        .await;
        assert_eq!(quote.method, ShippingMethod::WeightTier);
    }

    #[tokio::test]
    async fn test_free_shipping_wins_over_supplier_quote() {
        let items = vec![mapped(9000)];
        let quote = resolve_shipping_cost(
            &items,
            cents(9000),
            &quote_enabled(config()),
            &FixedQuote(Some(cents(5000))),
        )
        .await;
        assert_eq!(quote.method, ShippingMethod::Free);
    }

    #[tokio::test]
    async fn test_digital_items_ignored_for_weight() {
        let items = vec![
            ShippingItem::digital(1, cents(500)),
            ShippingItem::physical(1, cents(500), Some(300)),
        ];
        let quote = resolve_shipping_cost(&items, cents(1000), &config(), &NoFreightQuote).await;
        assert_eq!(quote.method, ShippingMethod::WeightTier);
        assert_eq!(quote.cost, cents(500));
    }

    #[test]
    fn test_method_names_roundtrip() {
        for m in [
            ShippingMethod::Free,
            ShippingMethod::SupplierQuote,
            ShippingMethod::WeightTier,
            ShippingMethod::UnknownWeight,
            ShippingMethod::FlatRate,
        ] {
            assert_eq!(ShippingMethod::parse(m.as_str()), Some(m));
        }
    }
}
