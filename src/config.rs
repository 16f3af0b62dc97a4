use std::{
    env,
    fmt::{self, Debug, Display},
};

/// Wrapper that keeps credentials out of logs and `{:?}` dumps.
#[derive(Clone, Default)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn reveal(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

impl Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    /// Shared secret for the payment gateway's HMAC signature scheme.
    /// Required at boot: a missing secret must never be discovered while
    /// verifying a live payment.
    pub payment_gateway_secret: Secret,
    pub payment_success_url: String,
    pub payment_failure_url: String,
    /// Flat shipping charge applied at checkout, in minor currency units.
    pub shipping_flat_rate: i64,
    pub mail_api_url: Option<String>,
    pub mail_api_key: Option<Secret>,
    pub mail_from: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        let payment_gateway_secret = env::var("PAYMENT_GATEWAY_SECRET")
            .map(Secret::new)
            .map_err(|_| anyhow::anyhow!("PAYMENT_GATEWAY_SECRET is not set"))?;
        let payment_success_url =
            env::var("PAYMENT_SUCCESS_URL").unwrap_or_else(|_| "/checkout/success".to_string());
        let payment_failure_url =
            env::var("PAYMENT_FAILURE_URL").unwrap_or_else(|_| "/checkout/failed".to_string());
        let shipping_flat_rate = env::var("SHIPPING_FLAT_RATE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let mail_api_url = env::var("MAIL_API_URL").ok().filter(|v| !v.is_empty());
        let mail_api_key = env::var("MAIL_API_KEY")
            .ok()
            .filter(|v| !v.is_empty())
            .map(Secret::new);
        let mail_from = env::var("MAIL_FROM").ok().filter(|v| !v.is_empty());

        Ok(Self {
            database_url,
            host,
            port,
            payment_gateway_secret,
            payment_success_url,
            payment_failure_url,
            shipping_flat_rate,
            mail_api_url,
            mail_api_key,
            mail_from,
        })
    }
}
