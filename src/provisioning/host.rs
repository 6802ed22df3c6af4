//! Host identities for plain-shell accounts.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::ProvisionError;
use crate::provisioning::command;

#[async_trait]
pub trait HostIdentityBackend: Send + Sync {
    /// Create the identity, set its secret, and set its absolute expiry date.
    ///
    /// If a step after creation fails, the identity is removed before the
    /// error is returned.
    async fn create(
        &self,
        username: &str,
        secret: &str,
        expires_on: NaiveDate,
    ) -> Result<(), ProvisionError>;

    /// Remove the identity and its home directory. Removing an absent
    /// identity succeeds.
    async fn destroy(&self, username: &str) -> Result<(), ProvisionError>;
}

/// Exit code `userdel` uses for "user does not exist".
const USERDEL_NO_SUCH_USER: i32 = 6;

/// Manages identities with `useradd`, `chpasswd`, `chage` and `userdel`.
pub struct ShellHostBackend {
    timeout: Duration,
}

impl ShellHostBackend {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn configure(
        &self,
        username: &str,
        secret: &str,
        expires_on: NaiveDate,
    ) -> Result<(), ProvisionError> {
        let credentials = format!("{username}:{secret}\n");
        command::run_checked(
            "chpasswd",
            username,
            "chpasswd",
            &[],
            Some(&credentials),
            self.timeout,
        )
        .await?;

        let expiry = expires_on.format("%Y-%m-%d").to_string();
        command::run_checked(
            "chage",
            username,
            "chage",
            &["-E", &expiry, username],
            None,
            self.timeout,
        )
        .await
    }
}

#[async_trait]
impl HostIdentityBackend for ShellHostBackend {
    async fn create(
        &self,
        username: &str,
        secret: &str,
        expires_on: NaiveDate,
    ) -> Result<(), ProvisionError> {
        validate_host_input(username, secret)?;

        command::run_checked(
            "useradd",
            username,
            "useradd",
            &["-m", "-s", "/bin/bash", username],
            None,
            self.timeout,
        )
        .await?;

        if let Err(err) = self.configure(username, secret, expires_on).await {
            if let Err(cleanup) = self.destroy(username).await {
                tracing::error!(
                    username = %username,
                    error = %cleanup,
                    "Failed to remove partially created host identity"
                );
            }
            return Err(err);
        }

        tracing::info!(username = %username, expires_on = %expires_on, "Created host identity");
        Ok(())
    }

    async fn destroy(&self, username: &str) -> Result<(), ProvisionError> {
        validate_username(username)?;

        let output = command::run(
            "userdel",
            username,
            "userdel",
            &["-r", username],
            None,
            self.timeout,
        )
        .await?;

        match output.status_code {
            Some(0) => {
                tracing::info!(username = %username, "Removed host identity");
                Ok(())
            }
            Some(USERDEL_NO_SUCH_USER) => {
                tracing::warn!(username = %username, "Host identity already absent");
                Ok(())
            }
            code => Err(ProvisionError::HostOperationFailed {
                operation: "userdel",
                username: username.to_string(),
                reason: format!("userdel exited with {code:?}: {}", output.stderr),
            }),
        }
    }
}

/// A call observed by [`NoopHostBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    Create {
        username: String,
        expires_on: NaiveDate,
    },
    Destroy {
        username: String,
    },
}

/// Records calls instead of touching the host.
#[derive(Default)]
pub struct NoopHostBackend {
    calls: Mutex<Vec<HostCall>>,
    existing: Mutex<HashSet<String>>,
    fail_create: Mutex<bool>,
}

impl NoopHostBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn exists(&self, username: &str) -> bool {
        self.existing
            .lock()
            .map(|e| e.contains(username))
            .unwrap_or(false)
    }

    /// Make every subsequent `create` fail.
    pub fn fail_creates(&self, fail: bool) {
        if let Ok(mut flag) = self.fail_create.lock() {
            *flag = fail;
        }
    }

    fn record(&self, call: HostCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[async_trait]
impl HostIdentityBackend for NoopHostBackend {
    async fn create(
        &self,
        username: &str,
        secret: &str,
        expires_on: NaiveDate,
    ) -> Result<(), ProvisionError> {
        validate_host_input(username, secret)?;
        self.record(HostCall::Create {
            username: username.to_string(),
            expires_on,
        });

        if self.fail_create.lock().map(|f| *f).unwrap_or(false) {
            return Err(ProvisionError::HostOperationFailed {
                operation: "useradd",
                username: username.to_string(),
                reason: "simulated failure".to_string(),
            });
        }

        let mut existing = self
            .existing
            .lock()
            .map_err(|_| ProvisionError::HostOperationFailed {
                operation: "useradd",
                username: username.to_string(),
                reason: "state lock poisoned".to_string(),
            })?;
        if !existing.insert(username.to_string()) {
            return Err(ProvisionError::HostOperationFailed {
                operation: "useradd",
                username: username.to_string(),
                reason: format!("user '{username}' already exists"),
            });
        }
        Ok(())
    }

    async fn destroy(&self, username: &str) -> Result<(), ProvisionError> {
        validate_username(username)?;
        self.record(HostCall::Destroy {
            username: username.to_string(),
        });
        if let Ok(mut existing) = self.existing.lock() {
            existing.remove(username);
        }
        Ok(())
    }
}

/// `useradd` rejects longer names.
const MAX_HOST_USERNAME_LEN: usize = 32;

fn validate_username(username: &str) -> Result<(), ProvisionError> {
    let valid = !username.is_empty()
        && username.len() <= MAX_HOST_USERNAME_LEN
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ProvisionError::InvalidInput {
            reason: format!("invalid host username '{username}'"),
        })
    }
}

/// `chpasswd` reads `user:password` lines, so neither may break that format.
fn validate_host_input(username: &str, secret: &str) -> Result<(), ProvisionError> {
    validate_username(username)?;
    if secret.is_empty() || secret.contains(['\n', '\r', ':']) {
        return Err(ProvisionError::InvalidInput {
            reason: "password must be non-empty and must not contain ':' or line breaks"
                .to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 1, 31).unwrap()
    }

    #[tokio::test]
    async fn noop_backend_tracks_identities() {
        let host = NoopHostBackend::new();
        host.create("alice", "s3cret", date()).await.unwrap();
        assert!(host.exists("alice"));

        let dup = host.create("alice", "s3cret", date()).await.unwrap_err();
        assert!(matches!(dup, ProvisionError::HostOperationFailed { .. }));

        host.destroy("alice").await.unwrap();
        assert!(!host.exists("alice"));
        assert_eq!(host.calls().len(), 3);
    }

    #[tokio::test]
    async fn rejects_inputs_that_could_escape_arguments() {
        let host = NoopHostBackend::new();
        for username in ["-o", "bob smith", "root;rm", ""] {
            assert!(matches!(
                host.create(username, "pw", date()).await.unwrap_err(),
                ProvisionError::InvalidInput { .. }
            ));
        }
        assert!(matches!(
            host.create("bob", "pw:extra", date()).await.unwrap_err(),
            ProvisionError::InvalidInput { .. }
        ));
        assert!(matches!(
            host.create("bob", "pw\nroot:x", date()).await.unwrap_err(),
            ProvisionError::InvalidInput { .. }
        ));
        assert!(host.calls().is_empty());
    }

    #[tokio::test]
    async fn host_names_are_capped_at_32_characters() {
        let host = NoopHostBackend::new();
        host.create(&"a".repeat(32), "pw", date()).await.unwrap();
        assert!(matches!(
            host.create(&"b".repeat(33), "pw", date()).await.unwrap_err(),
            ProvisionError::InvalidInput { .. }
        ));
    }
}
