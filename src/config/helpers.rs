use std::str::FromStr;

use crate::error::ConfigError;

/// Read an env var, treating unset and blank values alike.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => {
            let value = normalize_env_value(&value);
            if value.is_empty() {
                Ok(None)
            } else {
                Ok(Some(value))
            }
        }
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be valid UTF-8".to_string(),
        }),
    }
}

/// Read and parse an env var, falling back to `default` when unset.
pub(crate) fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)?
        .map(|s| s.parse::<T>())
        .transpose()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("could not parse '{key}': {e}"),
        })
        .map(|v| v.unwrap_or(default))
}

pub(crate) fn required_env(key: &str, hint: &str) -> Result<String, ConfigError> {
    optional_env(key)?.ok_or_else(|| ConfigError::MissingRequired {
        key: key.to_string(),
        hint: hint.to_string(),
    })
}

/// First non-empty value among `keys`, in order.
pub(crate) fn first_non_empty_env(keys: &[&str]) -> Result<Option<String>, ConfigError> {
    for key in keys {
        if let Some(value) = optional_env(key)? {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

pub(crate) fn parse_bool_env(key: &str, default: bool) -> Result<bool, ConfigError> {
    match optional_env(key)? {
        None => Ok(default),
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("must be 'true' or 'false', got '{value}'"),
            }),
        },
    }
}

pub(crate) fn normalize_variant(value: &str) -> String {
    value.trim().to_ascii_lowercase().replace(['-', ' '], "_")
}

fn normalize_env_value(raw: &str) -> String {
    let trimmed = raw.trim();
    let maybe_unquoted = trimmed
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .or_else(|| {
            trimmed
                .strip_prefix('\'')
                .and_then(|inner| inner.strip_suffix('\''))
        })
        .unwrap_or(trimmed);
    maybe_unquoted.trim().to_string()
}

/// Serializes tests that mutate the process environment.
#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
pub(crate) fn clear_env(keys: &[&str]) {
    // SAFETY: Guarded by ENV_MUTEX in tests.
    unsafe {
        for key in keys {
            std::env::remove_var(key);
        }
    }
}

#[cfg(test)]
pub(crate) fn set_env(pairs: &[(&str, &str)]) {
    // SAFETY: Guarded by ENV_MUTEX in tests.
    unsafe {
        for (key, value) in pairs {
            std::env::set_var(key, value);
        }
    }
}
