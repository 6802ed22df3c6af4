//! Account provisioning across the host and the tunnel service.
//!
//! `ssh` accounts are host identities; `vless`, `vmess` and `trojan`
//! accounts are client entries in the shared Xray document.

mod command;
pub mod descriptor;
pub mod host;
pub mod xray;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::config::{HostBackendKind, ProvisioningConfig};
use crate::error::ProvisionError;
use crate::model::{Account, ServiceKind};

pub use self::descriptor::ConnectionDescriptor;
pub use self::host::{HostCall, HostIdentityBackend, NoopHostBackend, ShellHostBackend};
pub use self::xray::{
    ConfigMutation, FileConfigResource, InMemoryConfigResource, ServiceConfigResource,
};

/// Result of a successful `create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedAccount {
    pub kind: ServiceKind,
    pub username: String,
    /// Password for ssh, generated UUID for tunnel kinds.
    pub secret: String,
    pub expires_at: DateTime<Utc>,
    /// Set when the document was written but the reload command failed.
    pub reload_warning: Option<String>,
}

pub struct ProvisioningService {
    host: Arc<dyn HostIdentityBackend>,
    service_config: Arc<dyn ServiceConfigResource>,
    domain: String,
}

impl ProvisioningService {
    pub fn new(
        host: Arc<dyn HostIdentityBackend>,
        service_config: Arc<dyn ServiceConfigResource>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            host,
            service_config,
            domain: domain.into(),
        }
    }

    /// Build the configured host backend and the on-disk Xray document.
    pub fn from_config(config: &ProvisioningConfig) -> Self {
        let host: Arc<dyn HostIdentityBackend> = match config.host_backend {
            HostBackendKind::Shell => Arc::new(ShellHostBackend::new(config.command_timeout)),
            HostBackendKind::Noop => {
                tracing::warn!("Host backend is noop; ssh accounts are not created on this host");
                Arc::new(NoopHostBackend::new())
            }
        };
        let service_config = Arc::new(FileConfigResource::new(
            &config.xray_config_path,
            config.reload_command.clone(),
            config.command_timeout,
        ));
        Self::new(host, service_config, config.domain.clone())
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub async fn create(
        &self,
        kind: ServiceKind,
        username: &str,
        password: Option<&str>,
        duration_days: u32,
    ) -> Result<ProvisionedAccount, ProvisionError> {
        if duration_days == 0 {
            return Err(ProvisionError::InvalidInput {
                reason: "duration must be at least one day".to_string(),
            });
        }
        let expires_at = Utc::now() + Duration::days(i64::from(duration_days));

        match kind {
            ServiceKind::Ssh => {
                let password = password.ok_or_else(|| ProvisionError::InvalidInput {
                    reason: "ssh accounts require a password".to_string(),
                })?;
                self.host
                    .create(username, password, expires_at.date_naive())
                    .await?;
                tracing::info!(username = %username, kind = %kind, "Provisioned account");
                Ok(ProvisionedAccount {
                    kind,
                    username: username.to_string(),
                    secret: password.to_string(),
                    expires_at,
                    reload_warning: None,
                })
            }
            ServiceKind::Vless | ServiceKind::Vmess | ServiceKind::Trojan => {
                let credential = Uuid::new_v4().to_string();
                let (user, secret) = (username.to_string(), credential.clone());
                self.service_config
                    .mutate(Box::new(move |doc: &mut Value| {
                        xray::add_client(doc, kind, &user, &secret)
                    }))
                    .await?;
                tracing::info!(username = %username, kind = %kind, "Provisioned account");

                let reload_warning = self.reload().await;
                Ok(ProvisionedAccount {
                    kind,
                    username: username.to_string(),
                    secret: credential,
                    expires_at,
                    reload_warning,
                })
            }
        }
    }

    /// Remove the account from the host or the tunnel document.
    ///
    /// Removing something already absent succeeds.
    pub async fn destroy(&self, kind: ServiceKind, username: &str) -> Result<(), ProvisionError> {
        match kind {
            ServiceKind::Ssh => self.host.destroy(username).await,
            ServiceKind::Vless | ServiceKind::Vmess | ServiceKind::Trojan => {
                let user = username.to_string();
                self.service_config
                    .mutate(Box::new(move |doc: &mut Value| {
                        let removed = xray::remove_client(doc, kind, &user)?;
                        if removed == 0 {
                            tracing::warn!(username = %user, kind = %kind, "No client entry to remove");
                        }
                        Ok(())
                    }))
                    .await?;
                tracing::info!(username = %username, kind = %kind, "Removed client entry");
                self.reload().await;
                Ok(())
            }
        }
    }

    pub fn render_descriptor(&self, account: &Account) -> ConnectionDescriptor {
        ConnectionDescriptor::render(account, &self.domain)
    }

    async fn reload(&self) -> Option<String> {
        match self.service_config.notify_reload().await {
            Ok(()) => None,
            Err(err) => {
                tracing::warn!(error = %err, "Tunnel service reload failed; document kept");
                Some(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AccountStatus;

    fn service() -> (
        ProvisioningService,
        Arc<NoopHostBackend>,
        Arc<InMemoryConfigResource>,
    ) {
        let host = Arc::new(NoopHostBackend::new());
        let config = Arc::new(InMemoryConfigResource::with_default_inbounds());
        let svc = ProvisioningService::new(host.clone(), config.clone(), "vpn.example.com");
        (svc, host, config)
    }

    fn as_account(p: &ProvisionedAccount) -> Account {
        let now = Utc::now();
        Account {
            id: Uuid::new_v4(),
            username: p.username.clone(),
            kind: p.kind,
            secret: p.secret.clone(),
            expires_at: p.expires_at,
            status: AccountStatus::Active,
            order_reference: None,
            origin_channel: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn ssh_creates_host_identity_with_expiry_date() {
        let (svc, host, config) = service();
        let account = svc
            .create(ServiceKind::Ssh, "alice", Some("pw123"), 30)
            .await
            .unwrap();

        assert_eq!(account.secret, "pw123");
        assert!(host.exists("alice"));
        assert_eq!(
            host.calls(),
            vec![HostCall::Create {
                username: "alice".to_string(),
                expires_on: account.expires_at.date_naive(),
            }]
        );
        assert_eq!(config.mutation_count(), 0);
    }

    #[tokio::test]
    async fn ssh_without_password_is_rejected() {
        let (svc, host, _) = service();
        let err = svc
            .create(ServiceKind::Ssh, "alice", None, 30)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidInput { .. }));
        assert!(host.calls().is_empty());
    }

    #[tokio::test]
    async fn tunnel_descriptors_embed_username_and_credential() {
        let (svc, _, config) = service();
        for kind in [ServiceKind::Vless, ServiceKind::Vmess, ServiceKind::Trojan] {
            let created = svc.create(kind, "bob_1", None, 30).await.unwrap();
            assert!(Uuid::parse_str(&created.secret).is_ok());

            let doc = config.read().await.unwrap();
            let clients = xray::clients(&doc, kind).unwrap();
            assert_eq!(clients.len(), 1);
            assert_eq!(clients[0]["email"], "bob_1");

            let descriptor = svc.render_descriptor(&as_account(&created));
            let link = descriptor.link().unwrap().to_string();
            if kind == ServiceKind::Vmess {
                assert!(link.starts_with("vmess://"));
            } else {
                assert!(link.contains(&created.secret));
                assert!(link.ends_with("#bob_1"));
            }
        }
        assert_eq!(config.mutation_count(), 3);
        assert_eq!(config.reload_count(), 3);
    }

    #[tokio::test]
    async fn reload_failure_keeps_the_new_client() {
        let (svc, _, config) = service();
        config.set_fail_reload(true);

        let created = svc
            .create(ServiceKind::Trojan, "carol", None, 7)
            .await
            .unwrap();
        assert!(created.reload_warning.is_some());

        let doc = config.read().await.unwrap();
        assert_eq!(xray::clients(&doc, ServiceKind::Trojan).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_tunnel_username_is_a_mutation_failure() {
        let (svc, _, config) = service();
        svc.create(ServiceKind::Vless, "dave", None, 30)
            .await
            .unwrap();
        let err = svc
            .create(ServiceKind::Vless, "dave", None, 30)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::ConfigMutationFailed { .. }));
        assert_eq!(config.mutation_count(), 1);
    }

    #[tokio::test]
    async fn destroy_removes_host_identity_and_client_entry() {
        let (svc, host, config) = service();
        svc.create(ServiceKind::Ssh, "erin", Some("pw"), 30)
            .await
            .unwrap();
        svc.create(ServiceKind::Vmess, "erin", None, 30)
            .await
            .unwrap();

        svc.destroy(ServiceKind::Ssh, "erin").await.unwrap();
        svc.destroy(ServiceKind::Vmess, "erin").await.unwrap();

        assert!(!host.exists("erin"));
        let doc = config.read().await.unwrap();
        assert!(xray::clients(&doc, ServiceKind::Vmess).unwrap().is_empty());

        // Absent entries are fine.
        svc.destroy(ServiceKind::Vmess, "erin").await.unwrap();
    }
}
