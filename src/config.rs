//! Service configuration, read from the environment (`.env` honoured).

use chrono::Duration;
use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} has an invalid value: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub port: u16,
    pub database_url: Option<String>,
    pub nats_url: Option<String>,
    /// Base URL the payment providers send the buyer back to.
    pub public_base_url: String,
    pub currency: String,
    pub checkout: CheckoutSettings,
    pub razorpay: RazorpaySettings,
    pub stripe: StripeSettings,
    pub sweep_interval_secs: u64,
}

/// Rules that shape checkout.
#[derive(Clone, Debug)]
pub struct CheckoutSettings {
    /// Gross total above which cash on delivery is refused.
    pub cod_limit: Decimal,
    pub max_line_quantity: i32,
    pub pending_order_ttl: Duration,
    pub order_id_attempts: u32,
}

#[derive(Clone, Debug)]
pub struct RazorpaySettings {
    pub key_id: String,
    pub key_secret: String,
    pub api_base: String,
}

#[derive(Clone, Debug)]
pub struct StripeSettings {
    pub secret_key: String,
    pub api_base: String,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            cod_limit: Decimal::new(1000, 0),
            max_line_quantity: 10,
            pending_order_ttl: Duration::minutes(30),
            order_id_attempts: 16,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let checkout = CheckoutSettings {
            cod_limit: parse_or("COD_LIMIT", Decimal::new(1000, 0))?,
            max_line_quantity: parse_or("MAX_LINE_QUANTITY", 10)?,
            pending_order_ttl: Duration::minutes(parse_or("PENDING_ORDER_TTL_MINUTES", 30)?),
            order_id_attempts: parse_or("ORDER_ID_ATTEMPTS", 16)?,
        };
        Ok(Self {
            port: parse_or("PORT", 8083)?,
            database_url: std::env::var("DATABASE_URL").ok(),
            nats_url: std::env::var("NATS_URL").ok(),
            public_base_url: var_or("PUBLIC_BASE_URL", "http://localhost:8083"),
            currency: var_or("CURRENCY", "INR"),
            checkout,
            razorpay: RazorpaySettings {
                key_id: var_or("RAZORPAY_KEY_ID", ""),
                key_secret: var_or("RAZORPAY_KEY_SECRET", ""),
                api_base: var_or("RAZORPAY_API_BASE", "https://api.razorpay.com/v1"),
            },
            stripe: StripeSettings {
                secret_key: var_or("STRIPE_SECRET_KEY", ""),
                api_base: var_or("STRIPE_API_BASE", "https://api.stripe.com/v1"),
            },
            sweep_interval_secs: parse_or("SWEEP_INTERVAL_SECS", 60)?,
        })
    }

    pub fn razorpay_callback_url(&self) -> String {
        format!("{}/api/v1/payments/razorpay/callback", self.public_base_url.trim_end_matches('/'))
    }

    pub fn stripe_callback_url(&self) -> String {
        format!("{}/api/v1/payments/stripe/callback", self.public_base_url.trim_end_matches('/'))
    }
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(default),
    }
}
