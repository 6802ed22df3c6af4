use std::time::Duration;

use secrecy::SecretString;

use crate::config::helpers::{normalize_variant, optional_env, parse_optional_env, required_env};
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripayMode {
    Sandbox,
    Production,
}

impl TripayMode {
    fn parse(value: &str, key: &str) -> Result<Self, ConfigError> {
        match normalize_variant(value).as_str() {
            "sandbox" | "test" => Ok(Self::Sandbox),
            "production" | "prod" | "live" => Ok(Self::Production),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected 'sandbox' or 'production', got '{value}'"),
            }),
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Sandbox => "https://tripay.co.id/api-sandbox",
            Self::Production => "https://tripay.co.id/api",
        }
    }
}

/// Payment gateway credentials and request tuning.
#[derive(Debug, Clone)]
pub struct TripayConfig {
    pub mode: TripayMode,
    pub base_url: String,
    pub api_key: SecretString,
    /// Signs outbound transactions and verifies callbacks.
    pub private_key: SecretString,
    pub merchant_code: String,
    pub callback_url: Option<String>,
    pub return_url: Option<String>,
    pub timeout: Duration,
    /// How long a payment link stays payable.
    pub transaction_ttl: Duration,
    pub customer_email: String,
    /// How long the merchant's payment channel list is reused.
    pub channel_cache_ttl: Duration,
}

impl TripayConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let mode = TripayMode::parse(
            &optional_env("TRIPAY_MODE")?.unwrap_or_else(|| "sandbox".to_string()),
            "TRIPAY_MODE",
        )?;

        let base_url = optional_env("TRIPAY_BASE_URL")?
            .unwrap_or_else(|| mode.default_base_url().to_string())
            .trim_end_matches('/')
            .to_string();
        url::Url::parse(&base_url).map_err(|e| ConfigError::InvalidValue {
            key: "TRIPAY_BASE_URL".to_string(),
            message: format!("must be an absolute URL: {e}"),
        })?;

        let timeout_ms: u64 = parse_optional_env("TRIPAY_TIMEOUT_MS", 15_000)?;
        if timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TRIPAY_TIMEOUT_MS".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        let ttl_secs: u64 = parse_optional_env("TRIPAY_TRANSACTION_TTL_SECS", 86_400)?;
        if ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TRIPAY_TRANSACTION_TTL_SECS".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        let channel_cache_secs: u64 = parse_optional_env("TRIPAY_CHANNEL_CACHE_SECS", 3600)?;

        Ok(Self {
            mode,
            base_url,
            api_key: SecretString::from(required_env(
                "TRIPAY_API_KEY",
                "Set the merchant API key from the Tripay dashboard",
            )?),
            private_key: SecretString::from(required_env(
                "TRIPAY_PRIVATE_KEY",
                "Set the merchant private key from the Tripay dashboard",
            )?),
            merchant_code: required_env(
                "TRIPAY_MERCHANT_CODE",
                "Set the merchant code from the Tripay dashboard",
            )?,
            callback_url: optional_env("TRIPAY_CALLBACK_URL")?,
            return_url: optional_env("TRIPAY_RETURN_URL")?,
            timeout: Duration::from_millis(timeout_ms),
            transaction_ttl: Duration::from_secs(ttl_secs),
            customer_email: optional_env("TRIPAY_CUSTOMER_EMAIL")?
                .unwrap_or_else(|| "noreply@example.com".to_string()),
            channel_cache_ttl: Duration::from_secs(channel_cache_secs),
        })
    }
}
