use std::collections::HashMap;

use crate::config::helpers::parse_optional_env;
use crate::error::ConfigError;
use crate::model::ServiceKind;

/// Price table keyed by kind and duration, read from `PRICE_<KIND>_<N>DAYS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingConfig {
    pub default_price: i64,
    prices: HashMap<(ServiceKind, u32), i64>,
}

impl PricingConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let default_price: i64 = parse_optional_env("DEFAULT_PRICE", 10_000)?;
        Self::from_vars(default_price, std::env::vars())
    }

    pub fn from_vars<I>(default_price: i64, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        if default_price <= 0 {
            return Err(ConfigError::InvalidValue {
                key: "DEFAULT_PRICE".to_string(),
                message: "must be a positive integer".to_string(),
            });
        }

        let mut prices = HashMap::new();
        for (key, value) in vars {
            let Some((kind, days)) = parse_price_key(&key) else {
                continue;
            };
            let amount: i64 = value.trim().parse().map_err(|e| ConfigError::InvalidValue {
                key: key.clone(),
                message: format!("must be a positive integer: {e}"),
            })?;
            if amount <= 0 {
                return Err(ConfigError::InvalidValue {
                    key,
                    message: "must be a positive integer".to_string(),
                });
            }
            prices.insert((kind, days), amount);
        }

        Ok(Self {
            default_price,
            prices,
        })
    }

    pub fn fixed(default_price: i64) -> Self {
        Self {
            default_price,
            prices: HashMap::new(),
        }
    }

    pub fn with_price(mut self, kind: ServiceKind, days: u32, amount: i64) -> Self {
        self.prices.insert((kind, days), amount);
        self
    }

    pub fn price_for(&self, kind: ServiceKind, days: u32) -> i64 {
        self.prices
            .get(&(kind, days))
            .copied()
            .unwrap_or(self.default_price)
    }
}

fn parse_price_key(key: &str) -> Option<(ServiceKind, u32)> {
    let rest = key.strip_prefix("PRICE_")?;
    let (kind, days) = rest.rsplit_once('_')?;
    let days = days.strip_suffix("DAYS")?.parse::<u32>().ok()?;
    let kind = kind.parse::<ServiceKind>().ok()?;
    Some((kind, days))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn reads_per_kind_prices_and_falls_back_to_default() {
        let cfg = PricingConfig::from_vars(
            10_000,
            vars(&[
                ("PRICE_VLESS_30DAYS", "15000"),
                ("PRICE_SSH_7DAYS", "5000"),
                ("PATH", "/usr/bin"),
            ]),
        )
        .expect("pricing");

        assert_eq!(cfg.price_for(ServiceKind::Vless, 30), 15_000);
        assert_eq!(cfg.price_for(ServiceKind::Ssh, 7), 5_000);
        assert_eq!(cfg.price_for(ServiceKind::Trojan, 30), 10_000);
    }

    #[test]
    fn ignores_keys_that_only_look_like_prices() {
        let cfg = PricingConfig::from_vars(
            10_000,
            vars(&[("PRICE_WIREGUARD_30DAYS", "1"), ("PRICE_VMESS_MONTH", "1")]),
        )
        .expect("pricing");

        assert_eq!(cfg, PricingConfig::fixed(10_000));
    }

    #[test]
    fn rejects_non_numeric_price() {
        let err = PricingConfig::from_vars(10_000, vars(&[("PRICE_VMESS_30DAYS", "cheap")]))
            .unwrap_err();
        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "PRICE_VMESS_30DAYS"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
