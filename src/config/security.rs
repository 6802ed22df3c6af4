use secrecy::{ExposeSecret, SecretString};

use crate::config::helpers::required_env;
use crate::error::ConfigError;

const MIN_PAYLOAD_KEY_LEN: usize = 32;

/// Operator API key and the key material used to seal buyer credentials.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub api_key: SecretString,
    pub payload_key: SecretString,
}

impl SecurityConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let api_key = required_env("API_KEY", "Set the key operators send in X-API-KEY")?;
        let payload_key = required_env(
            "PAYLOAD_ENCRYPTION_KEY",
            "Generate one with `openssl rand -hex 32`",
        )?;
        Self::new(api_key, payload_key)
    }

    pub fn new(api_key: String, payload_key: String) -> Result<Self, ConfigError> {
        let payload_key = SecretString::from(payload_key);
        if payload_key.expose_secret().len() < MIN_PAYLOAD_KEY_LEN {
            return Err(ConfigError::InvalidValue {
                key: "PAYLOAD_ENCRYPTION_KEY".to_string(),
                message: format!("must be at least {MIN_PAYLOAD_KEY_LEN} characters"),
            });
        }
        Ok(Self {
            api_key: SecretString::from(api_key),
            payload_key,
        })
    }
}
