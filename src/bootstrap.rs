//! Env file loading for vpn-panel.
//!
//! File: `~/.vpn-panel/.env` (standard dotenvy format)

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Path to the panel-specific `.env` file: `~/.vpn-panel/.env`.
pub fn panel_env_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vpn-panel")
        .join(".env")
}

/// Load env vars from `~/.vpn-panel/.env` (in addition to the standard `.env`).
///
/// Call this **after** `dotenvy::dotenv()` so that `./.env` takes priority.
/// The effective order is:
///
///   explicit env vars > `--config-env` file > `./.env` > `~/.vpn-panel/.env`
pub fn load_panel_env() {
    let path = panel_env_path();
    if path.exists() {
        let _ = dotenvy::from_path(&path);
    }
}

/// Load an explicitly requested env file. Missing or unparsable files are fatal.
pub fn load_env_file(path: &Path) -> Result<(), ConfigError> {
    if !path.exists() {
        return Err(ConfigError::InvalidValue {
            key: "--config-env".to_string(),
            message: format!("env file not found: {}", path.display()),
        });
    }
    dotenvy::from_path(path).map_err(|e| ConfigError::InvalidValue {
        key: "--config-env".to_string(),
        message: format!("failed to load {}: {e}", path.display()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_panel_env_path() {
        let path = panel_env_path();
        assert!(path.ends_with(".vpn-panel/.env"));
    }

    #[test]
    fn test_quoted_values_survive_dotenv_parsing() {
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");

        // Keys with `#` would otherwise be read as comments.
        std::fs::write(&env_path, "TRIPAY_PRIVATE_KEY=\"abc#123\"\n").unwrap();

        let parsed: Vec<(String, String)> = dotenvy::from_path_iter(&env_path)
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].0, "TRIPAY_PRIVATE_KEY");
        assert_eq!(parsed[0].1, "abc#123");
    }

    #[test]
    fn test_missing_explicit_env_file_is_an_error() {
        let dir = tempdir().unwrap();
        let err = load_env_file(&dir.path().join("absent.env")).unwrap_err();
        assert!(err.to_string().contains("env file not found"));
    }
}
