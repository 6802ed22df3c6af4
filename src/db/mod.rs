//! Durable records for orders, provisioned accounts and bot users.
//!
//! The `Database` supertrait combines the stores with schema setup so a
//! single `Arc<dyn Database>` can be handed to every service.

#[cfg(feature = "libsql")]
pub mod libsql;
#[cfg(feature = "libsql")]
pub(crate) mod libsql_migrations;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::{DatabaseBackend, DatabaseConfig};
use crate::error::DatabaseError;
use crate::model::{Account, AccountStatus, Order, OrderStatus, ServiceKind, TelegramUser};

pub use self::memory::InMemoryDatabase;

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert a new order. A duplicate reference is a `Constraint` error.
    async fn insert_order(&self, order: &Order) -> Result<(), DatabaseError>;

    async fn get_order(&self, reference: &str) -> Result<Option<Order>, DatabaseError>;

    /// Compare-and-set `pending -> to`.
    ///
    /// Returns `true` only for the caller that performed the transition.
    async fn transition_order(
        &self,
        reference: &str,
        to: OrderStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<bool, DatabaseError>;

    /// Newest first.
    async fn orders_for_channel(
        &self,
        origin_channel: &str,
        limit: usize,
    ) -> Result<Vec<Order>, DatabaseError>;

    /// Paid orders that never got an account.
    async fn paid_orders_without_account(&self) -> Result<Vec<Order>, DatabaseError>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert a new account. A second active account with the same
    /// username and kind, or a second account for the same order, is a
    /// `Constraint` error.
    async fn insert_account(&self, account: &Account) -> Result<(), DatabaseError>;

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, DatabaseError>;

    async fn find_active_account(
        &self,
        username: &str,
        kind: ServiceKind,
    ) -> Result<Option<Account>, DatabaseError>;

    async fn account_for_order(&self, reference: &str) -> Result<Option<Account>, DatabaseError>;

    /// Newest first, optionally filtered.
    async fn list_accounts(
        &self,
        kind: Option<ServiceKind>,
        status: Option<AccountStatus>,
    ) -> Result<Vec<Account>, DatabaseError>;

    /// Returns `false` when no account has this id.
    async fn update_account_status(
        &self,
        id: Uuid,
        status: AccountStatus,
    ) -> Result<bool, DatabaseError>;

    /// Active accounts whose expiry is at or before `now`.
    async fn expired_active_accounts(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Account>, DatabaseError>;
}

#[async_trait]
pub trait TelegramUserStore: Send + Sync {
    /// Insert or refresh a chat. An existing row keeps its `first_seen`.
    async fn record_telegram_user(&self, user: &TelegramUser) -> Result<(), DatabaseError>;

    async fn get_telegram_user(&self, chat_id: i64)
    -> Result<Option<TelegramUser>, DatabaseError>;
}

#[async_trait]
pub trait Database: OrderStore + AccountStore + TelegramUserStore {
    async fn run_migrations(&self) -> Result<(), DatabaseError>;
}

/// Open the configured backend and apply the schema.
pub async fn connect_from_config(
    config: &DatabaseConfig,
) -> Result<Arc<dyn Database>, DatabaseError> {
    let db: Arc<dyn Database> = match config.backend {
        #[cfg(feature = "libsql")]
        DatabaseBackend::LibSql => {
            Arc::new(self::libsql::LibSqlBackend::new_local(&config.path).await?)
        }
        #[cfg(not(feature = "libsql"))]
        DatabaseBackend::LibSql => {
            return Err(DatabaseError::Pool(
                "built without the `libsql` feature; set DATABASE_BACKEND=memory".to_string(),
            ));
        }
        DatabaseBackend::Memory => {
            tracing::warn!("Using in-memory database; orders and accounts are lost on exit");
            Arc::new(InMemoryDatabase::new())
        }
    };
    db.run_migrations().await?;
    Ok(db)
}
