use std::path::PathBuf;

use crate::config::helpers::{normalize_variant, optional_env};
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseBackend {
    /// Embedded libSQL file.
    LibSql,
    /// Process-local maps; state is lost on exit.
    Memory,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub path: PathBuf,
}

impl DatabaseConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let backend = match optional_env("DATABASE_BACKEND")?
            .map(|v| normalize_variant(&v))
            .as_deref()
        {
            None | Some("libsql") | Some("sqlite") => DatabaseBackend::LibSql,
            Some("memory") | Some("in_memory") => DatabaseBackend::Memory,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "DATABASE_BACKEND".to_string(),
                    message: format!("expected 'libsql' or 'memory', got '{other}'"),
                });
            }
        };

        let path = optional_env("DATABASE_PATH")?
            .map(PathBuf::from)
            .unwrap_or_else(default_database_path);

        Ok(Self { backend, path })
    }
}

pub fn default_database_path() -> PathBuf {
    PathBuf::from("data").join("panel.db")
}
