//! Shipping rule configuration.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::order::Money;

/// Free shipping above a subtotal threshold, optionally capped by item weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeShippingRule {
    pub enabled: bool,
    pub threshold: Money,
    /// Heaviest single physical item still eligible. 0 disables the cap.
    pub max_weight_grams: u32,
}

/// Real-time freight quote from the supplier, marked up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplierQuoteRule {
    pub enabled: bool,
    pub markup_percent: f64,
    pub minimum_charge: Money,
    /// Country the quote is requested for when the cart has no address yet.
    pub destination_country: String,
}

/// A price bracket keyed by the heaviest item's weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightTier {
    /// Inclusive upper bound in grams; None is the catch-all tier.
    pub max_grams: Option<u32>,
    pub price: Money,
}

impl WeightTier {
    pub fn up_to(max_grams: u32, price: Money) -> Self {
        Self {
            max_grams: Some(max_grams),
            price,
        }
    }

    pub fn unbounded(price: Money) -> Self {
        Self {
            max_grams: None,
            price,
        }
    }

    /// Parses a table written as `250:499,500:699,*:1999`
    /// (grams or `*`, then price in cents).
    pub fn parse_table(spec: &str) -> Result<Vec<WeightTier>, DomainError> {
        spec.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|entry| {
                let (bound, price) = entry.split_once(':').ok_or_else(|| {
                    DomainError::InvalidShippingConfig(format!("tier '{entry}' is not bound:price"))
                })?;
                let price = price.trim().parse::<i64>().map_err(|e| {
                    DomainError::InvalidShippingConfig(format!("tier '{entry}' price: {e}"))
                })?;
                let max_grams = match bound.trim() {
                    "*" | "" => None,
                    g => Some(g.parse::<u32>().map_err(|e| {
                        DomainError::InvalidShippingConfig(format!("tier '{entry}' bound: {e}"))
                    })?),
                };
                Ok(WeightTier {
                    max_grams,
                    price: Money::from_cents(price),
                })
            })
            .collect()
    }
}

/// All inputs to the shipping cascade, passed explicitly to the resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingConfig {
    pub free_shipping: FreeShippingRule,
    pub supplier_quote: SupplierQuoteRule,
    /// Ascending by bound, catch-all last.
    pub weight_tiers: Vec<WeightTier>,
    /// Charged when no weight is known; also a floor when some weights are missing.
    pub unknown_weight_rate: Money,
    pub flat_rate: Money,
}

impl ShippingConfig {
    /// Checks the tier table: strictly ascending bounds, exactly one
    /// unbounded tier, and that tier last.
    pub fn validate(&self) -> Result<(), DomainError> {
        let tiers = &self.weight_tiers;
        let Some(last) = tiers.last() else {
            return Err(DomainError::InvalidShippingConfig(
                "weight tier table is empty".to_string(),
            ));
        };
        if last.max_grams.is_some() {
            return Err(DomainError::InvalidShippingConfig(
                "last weight tier must be unbounded".to_string(),
            ));
        }

        let bounded = &tiers[..tiers.len() - 1];
        let mut previous: Option<u32> = None;
        for tier in bounded {
            let Some(max) = tier.max_grams else {
                return Err(DomainError::InvalidShippingConfig(
                    "only the last weight tier may be unbounded".to_string(),
                ));
            };
            if previous.is_some_and(|p| max <= p) {
                return Err(DomainError::InvalidShippingConfig(format!(
                    "weight tier bounds must ascend ({max}g after {}g)",
                    previous.unwrap_or_default()
                )));
            }
            previous = Some(max);
        }

        if self.supplier_quote.markup_percent < 0.0 {
            return Err(DomainError::InvalidShippingConfig(
                "supplier quote markup must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Price of the tier covering `grams`.
    pub fn tier_price(&self, grams: u32) -> Option<Money> {
        self.weight_tiers
            .iter()
            .find(|t| t.max_grams.is_none_or(|max| grams <= max))
            .map(|t| t.price)
    }
}

impl Default for ShippingConfig {
    fn default() -> Self {
        Self {
            free_shipping: FreeShippingRule {
                enabled: true,
                threshold: Money::from_cents(5000),
                max_weight_grams: 2000,
            },
            supplier_quote: SupplierQuoteRule {
                enabled: false,
                markup_percent: 15.0,
                minimum_charge: Money::from_cents(499),
                destination_country: "US".to_string(),
            },
            weight_tiers: vec![
                WeightTier::up_to(250, Money::from_cents(499)),
                WeightTier::up_to(500, Money::from_cents(699)),
                WeightTier::up_to(1000, Money::from_cents(899)),
                WeightTier::up_to(2000, Money::from_cents(1299)),
                WeightTier::unbounded(Money::from_cents(1999)),
            ],
            unknown_weight_rate: Money::from_cents(999),
            flat_rate: Money::from_cents(799),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        ShippingConfig::default().validate().unwrap();
    }

    #[test]
    fn test_tier_lookup_is_inclusive() {
        let config = ShippingConfig::default();
        assert_eq!(config.tier_price(250), Some(Money::from_cents(499)));
        assert_eq!(config.tier_price(251), Some(Money::from_cents(699)));
        assert_eq!(config.tier_price(50_000), Some(Money::from_cents(1999)));
    }

    #[test]
    fn test_rejects_bounded_last_tier() {
        let config = ShippingConfig {
            weight_tiers: vec![WeightTier::up_to(500, Money::from_cents(500))],
            ..ShippingConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DomainError::InvalidShippingConfig(_))
        ));
    }

    #[test]
    fn test_rejects_unbounded_tier_before_last() {
        let config = ShippingConfig {
            weight_tiers: vec![
                WeightTier::unbounded(Money::from_cents(900)),
                WeightTier::up_to(500, Money::from_cents(500)),
                WeightTier::unbounded(Money::from_cents(1900)),
            ],
            ..ShippingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_descending_bounds() {
        let config = ShippingConfig {
            weight_tiers: vec![
                WeightTier::up_to(1000, Money::from_cents(900)),
                WeightTier::up_to(500, Money::from_cents(500)),
                WeightTier::unbounded(Money::from_cents(1900)),
            ],
            ..ShippingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_table() {
        let tiers = WeightTier::parse_table("250:499, 1000:899,*:1999").unwrap();
        assert_eq!(
            tiers,
            vec![
                WeightTier::up_to(250, Money::from_cents(499)),
                WeightTier::up_to(1000, Money::from_cents(899)),
                WeightTier::unbounded(Money::from_cents(1999)),
            ]
        );
        assert!(WeightTier::parse_table("250-499").is_err());
        assert!(WeightTier::parse_table("heavy:499").is_err());
    }
}
