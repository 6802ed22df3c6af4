//! Operator-side account administration.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::channels::{Notification, Notifier};
use crate::db::Database;
use crate::error::OrderError;
use crate::model::{Account, AccountStatus, ServiceKind};
use crate::orders::{KeyedLocks, validation};
use crate::provisioning::{ConnectionDescriptor, ProvisioningService};

/// Account fields safe to list. The secret is only exposed through
/// [`AccountDetails::descriptor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountSummary {
    pub id: Uuid,
    pub username: String,
    #[serde(rename = "type")]
    pub kind: ServiceKind,
    pub status: AccountStatus,
    pub expires_at: DateTime<Utc>,
    pub order_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&Account> for AccountSummary {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            username: account.username.clone(),
            kind: account.kind,
            status: account.status,
            expires_at: account.expires_at,
            order_reference: account.order_reference.clone(),
            created_at: account.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountDetails {
    pub account: AccountSummary,
    pub descriptor: ConnectionDescriptor,
}

/// Totals from one expiry sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: usize,
    pub failed: usize,
}

/// Revocation and expiry of one account run under a per-account lock, and
/// each re-reads the row before de-provisioning.
pub struct AccountManager {
    db: Arc<dyn Database>,
    provisioning: Arc<ProvisioningService>,
    notifier: Arc<dyn Notifier>,
    locks: KeyedLocks,
}

impl AccountManager {
    pub fn new(
        db: Arc<dyn Database>,
        provisioning: Arc<ProvisioningService>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            db,
            provisioning,
            notifier,
            locks: KeyedLocks::new(),
        }
    }

    /// Create an account without a payment.
    pub async fn provision_direct(
        &self,
        username: &str,
        kind: ServiceKind,
        password: Option<&str>,
        duration_days: u32,
    ) -> Result<AccountDetails, OrderError> {
        let username = username.trim();
        validation::check_username(username).map_err(OrderError::Validation)?;
        let password = password.filter(|_| kind.requires_password());
        validation::check_password(kind, password).map_err(OrderError::Validation)?;
        validation::check_duration(duration_days).map_err(OrderError::Validation)?;
        if self.db.find_active_account(username, kind).await?.is_some() {
            return Err(OrderError::Validation(format!(
                "Username '{username}' already has an active {} account",
                kind.label()
            )));
        }

        let provisioned = self
            .provisioning
            .create(kind, username, password, duration_days)
            .await?;
        let now = Utc::now();
        let account = Account {
            id: Uuid::new_v4(),
            username: provisioned.username,
            kind,
            secret: provisioned.secret,
            expires_at: provisioned.expires_at,
            status: AccountStatus::Active,
            order_reference: None,
            origin_channel: None,
            created_at: now,
            updated_at: now,
        };
        if let Err(err) = self.db.insert_account(&account).await {
            if let Err(cleanup) = self.provisioning.destroy(kind, &account.username).await {
                tracing::error!(username = %account.username, error = %cleanup, "Failed to roll back unrecorded account");
            }
            return Err(err.into());
        }

        tracing::info!(username = %account.username, kind = %kind, account_id = %account.id, "Operator provisioned account");
        Ok(self.details(&account))
    }

    pub async fn list(
        &self,
        kind: Option<ServiceKind>,
        status: Option<AccountStatus>,
    ) -> Result<Vec<AccountSummary>, OrderError> {
        let accounts = self.db.list_accounts(kind, status).await?;
        Ok(accounts.iter().map(AccountSummary::from).collect())
    }

    pub async fn descriptor(&self, id: Uuid) -> Result<AccountDetails, OrderError> {
        let account = self.find(id).await?;
        Ok(self.details(&account))
    }

    /// Like [`Self::descriptor`], but only for an account bought from `origin_channel`.
    /// Any other account is reported as not found.
    pub async fn descriptor_for_channel(
        &self,
        id: Uuid,
        origin_channel: &str,
    ) -> Result<AccountDetails, OrderError> {
        let account = self.find(id).await?;
        if account.origin_channel.as_deref() != Some(origin_channel) {
            tracing::warn!(account_id = %id, channel = %origin_channel, "Configuration requested from a foreign channel");
            return Err(OrderError::NotFound {
                reference: id.to_string(),
            });
        }
        Ok(self.details(&account))
    }

    /// De-provision and mark `revoked`. Revoking twice is a no-op.
    pub async fn revoke(&self, id: Uuid) -> Result<AccountSummary, OrderError> {
        let _guard = self.locks.lock(&id.to_string()).await;
        let mut account = self.find(id).await?;
        if account.status != AccountStatus::Active {
            return Ok(AccountSummary::from(&account));
        }
        self.provisioning
            .destroy(account.kind, &account.username)
            .await?;
        self.db
            .update_account_status(id, AccountStatus::Revoked)
            .await?;
        account.status = AccountStatus::Revoked;
        tracing::info!(username = %account.username, kind = %account.kind, account_id = %id, "Account revoked");
        Ok(AccountSummary::from(&account))
    }

    /// Expire every active account past its expiry. One failure does not stop the sweep.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<SweepReport, OrderError> {
        let due = self.db.expired_active_accounts(now).await?;
        let mut report = SweepReport::default();

        for candidate in due {
            let _guard = self.locks.lock(&candidate.id.to_string()).await;
            // A concurrent revoke may have finished while we waited.
            let account = match self.db.get_account(candidate.id).await {
                Ok(Some(account)) if account.status == AccountStatus::Active => account,
                Ok(_) => continue,
                Err(err) => {
                    tracing::error!(account_id = %candidate.id, error = %err, "Failed to re-read expiring account");
                    report.failed += 1;
                    continue;
                }
            };
            if let Err(err) = self
                .provisioning
                .destroy(account.kind, &account.username)
                .await
            {
                tracing::error!(
                    username = %account.username,
                    kind = %account.kind,
                    error = %err,
                    "Failed to de-provision expired account"
                );
                report.failed += 1;
                continue;
            }
            if let Err(err) = self
                .db
                .update_account_status(account.id, AccountStatus::Expired)
                .await
            {
                tracing::error!(account_id = %account.id, error = %err, "Failed to mark account expired");
                report.failed += 1;
                continue;
            }
            report.expired += 1;

            if let Some(channel) = account.origin_channel.as_deref() {
                let notice = Notification::AccountExpired {
                    username: account.username.clone(),
                    kind: account.kind,
                };
                if let Err(err) = self.notifier.notify(channel, &notice).await {
                    tracing::warn!(channel = %channel, error = %err, "Failed to deliver expiry notice");
                }
            }
        }

        if report.expired > 0 || report.failed > 0 {
            tracing::info!(expired = report.expired, failed = report.failed, "Expiry sweep finished");
        }
        Ok(report)
    }

    async fn find(&self, id: Uuid) -> Result<Account, OrderError> {
        self.db
            .get_account(id)
            .await?
            .ok_or_else(|| OrderError::NotFound {
                reference: id.to_string(),
            })
    }

    fn details(&self, account: &Account) -> AccountDetails {
        AccountDetails {
            account: AccountSummary::from(account),
            descriptor: self.provisioning.render_descriptor(account),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::RecordingNotifier;
    use crate::db::{AccountStore, InMemoryDatabase};
    use crate::db::memory::fixtures;
    use crate::provisioning::xray;
    use crate::provisioning::{InMemoryConfigResource, NoopHostBackend, ServiceConfigResource};
    use chrono::Duration;

    struct Harness {
        manager: AccountManager,
        db: InMemoryDatabase,
        host: Arc<NoopHostBackend>,
        xray: Arc<InMemoryConfigResource>,
        notifier: Arc<RecordingNotifier>,
    }

    fn harness() -> Harness {
        let db = InMemoryDatabase::new();
        let host = Arc::new(NoopHostBackend::new());
        let xray = Arc::new(InMemoryConfigResource::with_default_inbounds());
        let notifier = Arc::new(RecordingNotifier::new());
        let provisioning = Arc::new(ProvisioningService::new(
            host.clone(),
            xray.clone(),
            "vpn.example.com",
        ));
        Harness {
            manager: AccountManager::new(Arc::new(db.clone()), provisioning, notifier.clone()),
            db,
            host,
            xray,
            notifier,
        }
    }

    #[tokio::test]
    async fn direct_provisioning_has_no_order() {
        let h = harness();
        let details = h
            .manager
            .provision_direct("alice", ServiceKind::Vmess, None, 30)
            .await
            .unwrap();
        assert_eq!(details.account.order_reference, None);
        assert!(details.descriptor.link().unwrap().starts_with("vmess://"));

        let err = h
            .manager
            .provision_direct("alice", ServiceKind::Vmess, None, 30)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)));
    }

    #[tokio::test]
    async fn revoke_removes_client_and_keeps_row() {
        let h = harness();
        let details = h
            .manager
            .provision_direct("bob", ServiceKind::Vless, None, 30)
            .await
            .unwrap();

        let revoked = h.manager.revoke(details.account.id).await.unwrap();
        assert_eq!(revoked.status, AccountStatus::Revoked);

        let doc = h.xray.read().await.unwrap();
        assert!(xray::clients(&doc, ServiceKind::Vless).unwrap().is_empty());
        let row = h.db.get_account(details.account.id).await.unwrap().unwrap();
        assert_eq!(row.status, AccountStatus::Revoked);

        // The username is free again.
        h.manager
            .provision_direct("bob", ServiceKind::Vless, None, 30)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn sweep_expires_due_accounts_and_removes_clients() {
        let h = harness();
        let due = h
            .manager
            .provision_direct("carol", ServiceKind::Trojan, None, 1)
            .await
            .unwrap();
        h.manager
            .provision_direct("dave", ServiceKind::Trojan, None, 30)
            .await
            .unwrap();

        let mut ssh = fixtures::account("erin", ServiceKind::Ssh);
        ssh.expires_at = Utc::now() - Duration::days(1);
        ssh.origin_channel = Some("telegram:7".to_string());
        h.db.insert_account(&ssh).await.unwrap();

        let report = h
            .manager
            .sweep_expired(Utc::now() + Duration::days(2))
            .await
            .unwrap();
        assert_eq!(report, SweepReport { expired: 2, failed: 0 });

        let doc = h.xray.read().await.unwrap();
        let clients = xray::clients(&doc, ServiceKind::Trojan).unwrap();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0]["email"], "dave");

        let row = h.db.get_account(due.account.id).await.unwrap().unwrap();
        assert_eq!(row.status, AccountStatus::Expired);
        assert!(h.host.calls().iter().any(|c| matches!(
            c,
            crate::provisioning::HostCall::Destroy { username } if username == "erin"
        )));
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_revoke_and_sweep_destroy_once() {
        let h = harness();
        let mut ssh = fixtures::account("frank", ServiceKind::Ssh);
        ssh.expires_at = Utc::now() - Duration::days(1);
        h.db.insert_account(&ssh).await.unwrap();

        let manager = Arc::new(h.manager);
        let mut handles = Vec::new();
        for i in 0..6 {
            let manager = manager.clone();
            let id = ssh.id;
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    manager.revoke(id).await.map(|_| ())
                } else {
                    manager.sweep_expired(Utc::now()).await.map(|_| ())
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let destroys = h
            .host
            .calls()
            .into_iter()
            .filter(|c| matches!(c, crate::provisioning::HostCall::Destroy { .. }))
            .count();
        assert_eq!(destroys, 1);
        let row = h.db.get_account(ssh.id).await.unwrap().unwrap();
        assert_ne!(row.status, AccountStatus::Active);
    }

    #[tokio::test]
    async fn revoked_account_is_skipped_by_sweep() {
        let h = harness();
        let mut ssh = fixtures::account("gina", ServiceKind::Ssh);
        ssh.expires_at = Utc::now() - Duration::days(1);
        h.db.insert_account(&ssh).await.unwrap();

        h.manager.revoke(ssh.id).await.unwrap();
        let report = h.manager.sweep_expired(Utc::now()).await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn channel_descriptor_requires_the_buying_channel() {
        let h = harness();
        let mut account = fixtures::account("hana", ServiceKind::Vless);
        account.origin_channel = Some("telegram:42".to_string());
        h.db.insert_account(&account).await.unwrap();

        let details = h
            .manager
            .descriptor_for_channel(account.id, "telegram:42")
            .await
            .unwrap();
        assert_eq!(details.account.username, "hana");
        assert!(matches!(
            h.manager.descriptor_for_channel(account.id, "telegram:43").await,
            Err(OrderError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_account_is_not_found() {
        let h = harness();
        assert!(matches!(
            h.manager.descriptor(Uuid::new_v4()).await,
            Err(OrderError::NotFound { .. })
        ));
    }
}
