//! Application configuration loaded from environment variables.

use std::time::Duration;

use domain::{DomainError, Money, ShippingConfig, WeightTier};
use fulfillment::AddressPolicy;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error(transparent)]
    Shipping(#[from] DomainError),
}

/// Supplier API connection settings. No base URL means the in-memory supplier.
#[derive(Debug, Clone, PartialEq)]
pub struct SupplierSettings {
    pub base_url: Option<String>,
    pub access_token: String,
    pub timeout: Duration,
    pub requests_per_sec: f64,
}

/// Email API settings. No base URL means the in-memory notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailSettings {
    pub base_url: Option<String>,
    pub api_key: String,
    pub from: String,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `DATABASE_URL` — PostgreSQL URL; unset runs on the in-memory store
/// - `PAYMENT_WEBHOOK_SECRET`, `CRON_SECRET`, `ADMIN_API_TOKEN`
/// - `SUPPLIER_API_BASE_URL`, `SUPPLIER_API_TOKEN`, `SUPPLIER_TIMEOUT_SECS`,
///   `SUPPLIER_REQUESTS_PER_SEC`
/// - `EMAIL_API_BASE_URL`, `EMAIL_API_KEY`, `EMAIL_FROM`
/// - `SITE_URL` — base for download links
/// - `ADDRESS_POLICY` — `placeholder` (default) or `hold`
/// - shipping rules: `FREE_SHIPPING_ENABLED`, `FREE_SHIPPING_THRESHOLD_CENTS`,
///   `FREE_SHIPPING_MAX_WEIGHT_GRAMS`, `SUPPLIER_QUOTE_ENABLED`,
///   `SUPPLIER_QUOTE_MARKUP_PERCENT`, `SUPPLIER_QUOTE_MINIMUM_CENTS`,
///   `SUPPLIER_QUOTE_COUNTRY`, `SHIPPING_TIERS` (`250:499,*:1999`),
///   `SHIPPING_UNKNOWN_WEIGHT_CENTS`, `SHIPPING_FLAT_RATE_CENTS`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub payment_webhook_secret: String,
    pub cron_secret: Option<String>,
    pub admin_api_token: Option<String>,
    pub supplier: SupplierSettings,
    pub email: EmailSettings,
    pub site_url: String,
    pub address_policy: AddressPolicy,
    pub shipping: ShippingConfig,
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
    }
}

fn parse_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<bool>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue { key, value: raw }),
        },
    }
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Config::default();

        let address_policy = match lookup("ADDRESS_POLICY") {
            None => defaults.address_policy,
            Some(raw) => AddressPolicy::parse(&raw).ok_or(ConfigError::InvalidValue {
                key: "ADDRESS_POLICY",
                value: raw,
            })?,
        };

        let config = Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse(&lookup, "PORT")?.unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: lookup("DATABASE_URL"),
            payment_webhook_secret: lookup("PAYMENT_WEBHOOK_SECRET").unwrap_or_default(),
            cron_secret: lookup("CRON_SECRET"),
            admin_api_token: lookup("ADMIN_API_TOKEN"),
            supplier: SupplierSettings {
                base_url: lookup("SUPPLIER_API_BASE_URL"),
                access_token: lookup("SUPPLIER_API_TOKEN").unwrap_or_default(),
                timeout: parse(&lookup, "SUPPLIER_TIMEOUT_SECS")?
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.supplier.timeout),
                requests_per_sec: parse(&lookup, "SUPPLIER_REQUESTS_PER_SEC")?
                    .unwrap_or(defaults.supplier.requests_per_sec),
            },
            email: EmailSettings {
                base_url: lookup("EMAIL_API_BASE_URL"),
                api_key: lookup("EMAIL_API_KEY").unwrap_or_default(),
                from: lookup("EMAIL_FROM").unwrap_or(defaults.email.from),
            },
            site_url: lookup("SITE_URL").unwrap_or(defaults.site_url),
            address_policy,
            shipping: Self::shipping_from(&lookup, defaults.shipping)?,
        };
        config.shipping.validate()?;
        Ok(config)
    }

    fn shipping_from(
        lookup: &impl Fn(&str) -> Option<String>,
        mut shipping: ShippingConfig,
    ) -> Result<ShippingConfig, ConfigError> {
        let cents = |key| -> Result<Option<Money>, ConfigError> {
            Ok(parse::<i64>(lookup, key)?.map(Money::from_cents))
        };

        let free = &mut shipping.free_shipping;
        free.enabled = parse_bool(lookup, "FREE_SHIPPING_ENABLED")?.unwrap_or(free.enabled);
        free.threshold = cents("FREE_SHIPPING_THRESHOLD_CENTS")?.unwrap_or(free.threshold);
        free.max_weight_grams =
            parse(lookup, "FREE_SHIPPING_MAX_WEIGHT_GRAMS")?.unwrap_or(free.max_weight_grams);

        let quote = &mut shipping.supplier_quote;
        quote.enabled = parse_bool(lookup, "SUPPLIER_QUOTE_ENABLED")?.unwrap_or(quote.enabled);
        quote.markup_percent =
            parse(lookup, "SUPPLIER_QUOTE_MARKUP_PERCENT")?.unwrap_or(quote.markup_percent);
        quote.minimum_charge =
            cents("SUPPLIER_QUOTE_MINIMUM_CENTS")?.unwrap_or(quote.minimum_charge);
        if let Some(country) = lookup("SUPPLIER_QUOTE_COUNTRY") {
            quote.destination_country = country.trim().to_ascii_uppercase();
        }

        if let Some(table) = lookup("SHIPPING_TIERS") {
            shipping.weight_tiers = WeightTier::parse_table(&table)?;
        }
        shipping.unknown_weight_rate =
            cents("SHIPPING_UNKNOWN_WEIGHT_CENTS")?.unwrap_or(shipping.unknown_weight_rate);
        shipping.flat_rate = cents("SHIPPING_FLAT_RATE_CENTS")?.unwrap_or(shipping.flat_rate);

        Ok(shipping)
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            payment_webhook_secret: String::new(),
            cron_secret: None,
            admin_api_token: None,
            supplier: SupplierSettings {
                base_url: None,
                access_token: String::new(),
                timeout: Duration::from_secs(10),
                requests_per_sec: 1.0,
            },
            email: EmailSettings {
                base_url: None,
                api_key: String::new(),
                from: "Store <orders@localhost>".to_string(),
            },
            site_url: "http://localhost:3000".to_string(),
            address_policy: AddressPolicy::default(),
            shipping: ShippingConfig::default(),
        }
    }
}
