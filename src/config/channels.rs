use std::time::Duration;

use secrecy::SecretString;

use crate::config::helpers::{first_non_empty_env, optional_env, parse_optional_env};
use crate::error::ConfigError;

/// HTTP listener and `/api/` rate limiting.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    pub rate_limit: u32,
    pub rate_window: Duration,
}

/// Telegram bot settings. Without a token, notifications are only logged.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: Option<SecretString>,
    /// Expected `X-Telegram-Bot-Api-Secret-Token` on inbound updates.
    pub webhook_secret: Option<SecretString>,
    pub api_base_url: String,
    /// Shown in the bot's help reply.
    pub admin_contact: Option<String>,
}

impl HttpConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let port = first_non_empty_env(&["HTTP_PORT", "PORT"])?
            .map(|s| s.parse())
            .transpose()
            .map_err(|e| ConfigError::InvalidValue {
                key: "HTTP_PORT".to_string(),
                message: format!("must be a valid port number: {e}"),
            })?
            .unwrap_or(3000);

        let rate_limit: u32 = parse_optional_env("API_RATE_LIMIT", 100)?;
        if rate_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "API_RATE_LIMIT".to_string(),
                message: "must be > 0".to_string(),
            });
        }
        let window_secs: u64 = parse_optional_env("API_RATE_WINDOW_SECS", 900)?;
        if window_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "API_RATE_WINDOW_SECS".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        Ok(Self {
            host: optional_env("HTTP_HOST")?.unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            rate_limit,
            rate_window: Duration::from_secs(window_secs),
        })
    }
}

impl TelegramConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            bot_token: first_non_empty_env(&["TELEGRAM_BOT_TOKEN", "BOT_TOKEN"])?
                .map(SecretString::from),
            webhook_secret: optional_env("TELEGRAM_WEBHOOK_SECRET")?.map(SecretString::from),
            api_base_url: optional_env("TELEGRAM_API_BASE_URL")?
                .unwrap_or_else(|| "https://api.telegram.org".to_string())
                .trim_end_matches('/')
                .to_string(),
            admin_contact: optional_env("TELEGRAM_ADMIN_ID")?,
        })
    }
}
