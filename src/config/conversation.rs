use std::time::Duration;

use crate::config::helpers::parse_optional_env;
use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// Idle sessions older than this are treated as absent.
    pub session_ttl: Duration,
    pub default_duration_days: u32,
}

impl ConversationConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let ttl_secs: u64 = parse_optional_env("SESSION_TTL_SECS", 900)?;
        if ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SESSION_TTL_SECS".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        let default_duration_days: u32 = parse_optional_env("DEFAULT_DURATION_DAYS", 30)?;
        if !(1..=365).contains(&default_duration_days) {
            return Err(ConfigError::InvalidValue {
                key: "DEFAULT_DURATION_DAYS".to_string(),
                message: "must be between 1 and 365".to_string(),
            });
        }

        Ok(Self {
            session_ttl: Duration::from_secs(ttl_secs),
            default_duration_days,
        })
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(900),
            default_duration_days: 30,
        }
    }
}
