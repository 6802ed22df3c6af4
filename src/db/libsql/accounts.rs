//! AccountStore for libSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{
    LibSqlBackend, fmt_ts, get_opt_text, get_text, get_ts, map_write_error, opt_text, text,
};
use crate::db::AccountStore;
use crate::error::DatabaseError;
use crate::model::{Account, AccountStatus, ServiceKind};

const ACCOUNT_COLUMNS: &str = "\
    id, username, kind, secret, expires_at, status, order_reference, \
    origin_channel, created_at, updated_at";

fn row_to_account(row: &libsql::Row) -> Result<Account, DatabaseError> {
    let id = Uuid::parse_str(&get_text(row, 0))
        .map_err(|e| DatabaseError::Serialization(format!("account id: {e}")))?;
    let kind = get_text(row, 2)
        .parse::<ServiceKind>()
        .map_err(DatabaseError::Serialization)?;
    let status_raw = get_text(row, 5);
    let status = AccountStatus::parse(&status_raw).ok_or_else(|| {
        DatabaseError::Serialization(format!("account {id} has unknown status '{status_raw}'"))
    })?;

    Ok(Account {
        id,
        username: get_text(row, 1),
        kind,
        secret: get_text(row, 3),
        expires_at: get_ts(row, 4),
        status,
        order_reference: get_opt_text(row, 6),
        origin_channel: get_opt_text(row, 7),
        created_at: get_ts(row, 8),
        updated_at: get_ts(row, 9),
    })
}

async fn collect_accounts(mut rows: libsql::Rows) -> Result<Vec<Account>, DatabaseError> {
    let mut accounts = Vec::new();
    while let Some(row) = rows.next().await? {
        accounts.push(row_to_account(&row)?);
    }
    Ok(accounts)
}

#[async_trait]
impl AccountStore for LibSqlBackend {
    async fn insert_account(&self, account: &Account) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        conn.execute(
            &format!(
                "INSERT INTO accounts ({ACCOUNT_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            libsql::params_from_iter(vec![
                text(account.id.to_string()),
                text(account.username.as_str()),
                text(account.kind.as_str()),
                text(account.secret.as_str()),
                text(fmt_ts(&account.expires_at)),
                text(account.status.as_str()),
                opt_text(account.order_reference.as_deref()),
                opt_text(account.origin_channel.as_deref()),
                text(fmt_ts(&account.created_at)),
                text(fmt_ts(&account.updated_at)),
            ]),
        )
        .await
        .map_err(map_write_error)?;
        Ok(())
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
                libsql::params_from_iter(vec![text(id.to_string())]),
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_account(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_active_account(
        &self,
        username: &str,
        kind: ServiceKind,
    ) -> Result<Option<Account>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {ACCOUNT_COLUMNS} FROM accounts \
                     WHERE username = ?1 AND kind = ?2 AND status = 'active'"
                ),
                libsql::params_from_iter(vec![text(username), text(kind.as_str())]),
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_account(&row)?)),
            None => Ok(None),
        }
    }

    async fn account_for_order(&self, reference: &str) -> Result<Option<Account>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE order_reference = ?1"),
                libsql::params_from_iter(vec![text(reference)]),
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_account(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_accounts(
        &self,
        kind: Option<ServiceKind>,
        status: Option<AccountStatus>,
    ) -> Result<Vec<Account>, DatabaseError> {
        let conn = self.connect().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {ACCOUNT_COLUMNS} FROM accounts \
                     WHERE (?1 IS NULL OR kind = ?1) AND (?2 IS NULL OR status = ?2) \
                     ORDER BY created_at DESC"
                ),
                libsql::params_from_iter(vec![
                    opt_text(kind.map(ServiceKind::as_str)),
                    opt_text(status.map(AccountStatus::as_str)),
                ]),
            )
            .await?;
        collect_accounts(rows).await
    }

    async fn update_account_status(
        &self,
        id: Uuid,
        status: AccountStatus,
    ) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let changed = conn
            .execute(
                "UPDATE accounts SET status = ?1, updated_at = ?2 WHERE id = ?3",
                libsql::params_from_iter(vec![
                    text(status.as_str()),
                    text(fmt_ts(&Utc::now())),
                    text(id.to_string()),
                ]),
            )
            .await
            .map_err(map_write_error)?;
        Ok(changed > 0)
    }

    async fn expired_active_accounts(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Account>, DatabaseError> {
        let conn = self.connect().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {ACCOUNT_COLUMNS} FROM accounts \
                     WHERE status = 'active' AND expires_at <= ?1 \
                     ORDER BY expires_at ASC"
                ),
                libsql::params_from_iter(vec![text(fmt_ts(&now))]),
            )
            .await?;
        collect_accounts(rows).await
    }
}
