//! Configuration for vpn-panel.
//!
//! Everything comes from environment variables. `./.env` and
//! `~/.vpn-panel/.env` are loaded via dotenvy before resolution; dotenvy
//! never overwrites variables that are already set, so explicit env vars win.

mod channels;
mod conversation;
mod database;
pub(crate) mod helpers;
mod pricing;
mod provisioning;
mod security;
mod tripay;

use std::path::Path;

use crate::error::ConfigError;

pub use self::channels::{HttpConfig, TelegramConfig};
pub use self::conversation::ConversationConfig;
pub use self::database::{DatabaseBackend, DatabaseConfig, default_database_path};
pub use self::pricing::PricingConfig;
pub use self::provisioning::{HostBackendKind, ProvisioningConfig};
pub use self::security::SecurityConfig;
pub use self::tripay::{TripayConfig, TripayMode};

/// Main configuration for the panel.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub tripay: TripayConfig,
    pub provisioning: ProvisioningConfig,
    pub http: HttpConfig,
    pub telegram: TelegramConfig,
    pub pricing: PricingConfig,
    pub conversation: ConversationConfig,
    pub security: SecurityConfig,
}

impl Config {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_file(None)
    }

    /// Load configuration, first applying an explicit env file.
    ///
    /// Values in `extra_env` take priority over `./.env` and
    /// `~/.vpn-panel/.env`. A missing explicit file is an error.
    pub fn from_env_with_file(extra_env: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = extra_env {
            crate::bootstrap::load_env_file(path)?;
        }
        let _ = dotenvy::dotenv();
        crate::bootstrap::load_panel_env();

        Self::build()
    }

    fn build() -> Result<Self, ConfigError> {
        Ok(Self {
            database: DatabaseConfig::resolve()?,
            tripay: TripayConfig::resolve()?,
            provisioning: ProvisioningConfig::resolve()?,
            http: HttpConfig::resolve()?,
            telegram: TelegramConfig::resolve()?,
            pricing: PricingConfig::resolve()?,
            conversation: ConversationConfig::resolve()?,
            security: SecurityConfig::resolve()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::helpers::{ENV_MUTEX, clear_env, set_env};
    use crate::model::ServiceKind;

    const REQUIRED: &[(&str, &str)] = &[
        ("TRIPAY_API_KEY", "api-key"),
        ("TRIPAY_PRIVATE_KEY", "private-key"),
        ("TRIPAY_MERCHANT_CODE", "T0001"),
        ("SERVER_DOMAIN", "vpn.example.com"),
        ("API_KEY", "operator-key"),
        (
            "PAYLOAD_ENCRYPTION_KEY",
            "0123456789abcdef0123456789abcdef",
        ),
    ];

    fn clear_all() {
        let mut keys: Vec<&str> = REQUIRED.iter().map(|(k, _)| *k).collect();
        keys.extend(["DATABASE_BACKEND", "PRICE_TROJAN_30DAYS", "DEFAULT_PRICE"]);
        clear_env(&keys);
    }

    #[test]
    fn builds_full_config_from_env() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_all();
        set_env(REQUIRED);
        set_env(&[
            ("DATABASE_BACKEND", "memory"),
            ("PRICE_TROJAN_30DAYS", "20000"),
        ]);

        let cfg = Config::build().expect("config build");
        assert_eq!(cfg.database.backend, DatabaseBackend::Memory);
        assert_eq!(cfg.provisioning.domain, "vpn.example.com");
        assert_eq!(cfg.pricing.price_for(ServiceKind::Trojan, 30), 20_000);
        assert_eq!(cfg.pricing.price_for(ServiceKind::Ssh, 30), 10_000);
        assert_eq!(cfg.conversation.default_duration_days, 30);

        clear_all();
    }

    #[test]
    fn missing_api_key_fails_build() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_all();
        set_env(REQUIRED);
        clear_env(&["API_KEY"]);

        match Config::build().unwrap_err() {
            ConfigError::MissingRequired { key, .. } => assert_eq!(key, "API_KEY"),
            other => panic!("unexpected error: {other}"),
        }

        clear_all();
    }
}
