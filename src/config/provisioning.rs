use std::path::PathBuf;
use std::time::Duration;

use crate::config::helpers::{first_non_empty_env, normalize_variant, optional_env, parse_optional_env};
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostBackendKind {
    /// Runs `useradd`/`chpasswd`/`chage`/`userdel` on the host.
    Shell,
    /// Records calls without touching the host.
    Noop,
}

#[derive(Debug, Clone)]
pub struct ProvisioningConfig {
    pub host_backend: HostBackendKind,
    /// Public hostname embedded in connection descriptors.
    pub domain: String,
    pub xray_config_path: PathBuf,
    /// Program and arguments; empty disables the reload signal.
    pub reload_command: Vec<String>,
    pub command_timeout: Duration,
    pub sweep_interval: Duration,
}

impl ProvisioningConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let host_backend = match optional_env("HOST_BACKEND")?
            .map(|v| normalize_variant(&v))
            .as_deref()
        {
            None | Some("shell") => HostBackendKind::Shell,
            Some("noop") | Some("dry_run") => HostBackendKind::Noop,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "HOST_BACKEND".to_string(),
                    message: format!("expected 'shell' or 'noop', got '{other}'"),
                });
            }
        };

        let domain = first_non_empty_env(&["SERVER_DOMAIN", "DOMAIN"])?.ok_or_else(|| {
            ConfigError::MissingRequired {
                key: "SERVER_DOMAIN".to_string(),
                hint: "Set the public hostname clients connect to".to_string(),
            }
        })?;

        let reload_command = optional_env("XRAY_RELOAD_COMMAND")?
            .unwrap_or_else(|| "systemctl restart xray".to_string())
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let timeout_secs: u64 = parse_optional_env("HOST_COMMAND_TIMEOUT_SECS", 30)?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "HOST_COMMAND_TIMEOUT_SECS".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        let sweep_secs: u64 = parse_optional_env("SWEEP_INTERVAL_SECS", 3_600)?;

        Ok(Self {
            host_backend,
            domain,
            xray_config_path: optional_env("XRAY_CONFIG_PATH")?
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/usr/local/etc/xray/config.json")),
            reload_command,
            command_timeout: Duration::from_secs(timeout_secs),
            sweep_interval: Duration::from_secs(sweep_secs),
        })
    }
}
