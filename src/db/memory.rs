use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::{AccountStore, Database, OrderStore, TelegramUserStore};
use crate::error::DatabaseError;
use crate::model::{Account, AccountStatus, Order, OrderStatus, ServiceKind, TelegramUser};

#[derive(Default)]
struct Tables {
    orders: HashMap<String, Order>,
    accounts: HashMap<Uuid, Account>,
    telegram_users: HashMap<i64, TelegramUser>,
}

/// Process-local store for tests and dry runs.
///
/// All tables sit behind one lock so uniqueness checks and writes are atomic.
#[derive(Default, Clone)]
pub struct InMemoryDatabase {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first<T>(items: &mut [T], created_at: impl Fn(&T) -> DateTime<Utc>) {
    items.sort_by_key(|item| std::cmp::Reverse(created_at(item)));
}

#[async_trait]
impl OrderStore for InMemoryDatabase {
    async fn insert_order(&self, order: &Order) -> Result<(), DatabaseError> {
        let mut tables = self.tables.write().await;
        if tables.orders.contains_key(&order.reference) {
            return Err(DatabaseError::Constraint(format!(
                "order reference {} already exists",
                order.reference
            )));
        }
        if tables
            .orders
            .values()
            .any(|o| o.merchant_ref == order.merchant_ref)
        {
            return Err(DatabaseError::Constraint(format!(
                "merchant ref {} already exists",
                order.merchant_ref
            )));
        }
        tables.orders.insert(order.reference.clone(), order.clone());
        Ok(())
    }

    async fn get_order(&self, reference: &str) -> Result<Option<Order>, DatabaseError> {
        Ok(self.tables.read().await.orders.get(reference).cloned())
    }

    async fn transition_order(
        &self,
        reference: &str,
        to: OrderStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<bool, DatabaseError> {
        let mut tables = self.tables.write().await;
        match tables.orders.get_mut(reference) {
            Some(order) if order.status == OrderStatus::Pending => {
                order.status = to;
                order.paid_at = paid_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn orders_for_channel(
        &self,
        origin_channel: &str,
        limit: usize,
    ) -> Result<Vec<Order>, DatabaseError> {
        let tables = self.tables.read().await;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| o.origin_channel.as_deref() == Some(origin_channel))
            .cloned()
            .collect();
        newest_first(&mut orders, |o| o.created_at);
        orders.truncate(limit);
        Ok(orders)
    }

    async fn paid_orders_without_account(&self) -> Result<Vec<Order>, DatabaseError> {
        let tables = self.tables.read().await;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Paid)
            .filter(|o| {
                !tables
                    .accounts
                    .values()
                    .any(|a| a.order_reference.as_deref() == Some(o.reference.as_str()))
            })
            .cloned()
            .collect();
        newest_first(&mut orders, |o| o.created_at);
        Ok(orders)
    }
}

#[async_trait]
impl AccountStore for InMemoryDatabase {
    async fn insert_account(&self, account: &Account) -> Result<(), DatabaseError> {
        let mut tables = self.tables.write().await;
        if account.status == AccountStatus::Active
            && tables.accounts.values().any(|a| {
                a.status == AccountStatus::Active
                    && a.kind == account.kind
                    && a.username == account.username
            })
        {
            return Err(DatabaseError::Constraint(format!(
                "active {} account {} already exists",
                account.kind, account.username
            )));
        }
        if let Some(reference) = account.order_reference.as_deref()
            && tables
                .accounts
                .values()
                .any(|a| a.order_reference.as_deref() == Some(reference))
        {
            return Err(DatabaseError::Constraint(format!(
                "order {reference} already has an account"
            )));
        }
        tables.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, DatabaseError> {
        Ok(self.tables.read().await.accounts.get(&id).cloned())
    }

    async fn find_active_account(
        &self,
        username: &str,
        kind: ServiceKind,
    ) -> Result<Option<Account>, DatabaseError> {
        let tables = self.tables.read().await;
        Ok(tables
            .accounts
            .values()
            .find(|a| a.status == AccountStatus::Active && a.kind == kind && a.username == username)
            .cloned())
    }

    async fn account_for_order(&self, reference: &str) -> Result<Option<Account>, DatabaseError> {
        let tables = self.tables.read().await;
        Ok(tables
            .accounts
            .values()
            .find(|a| a.order_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn list_accounts(
        &self,
        kind: Option<ServiceKind>,
        status: Option<AccountStatus>,
    ) -> Result<Vec<Account>, DatabaseError> {
        let tables = self.tables.read().await;
        let mut accounts: Vec<Account> = tables
            .accounts
            .values()
            .filter(|a| kind.is_none_or(|k| a.kind == k))
            .filter(|a| status.is_none_or(|s| a.status == s))
            .cloned()
            .collect();
        newest_first(&mut accounts, |a| a.created_at);
        Ok(accounts)
    }

    async fn update_account_status(
        &self,
        id: Uuid,
        status: AccountStatus,
    ) -> Result<bool, DatabaseError> {
        let mut tables = self.tables.write().await;
        match tables.accounts.get_mut(&id) {
            Some(account) => {
                account.status = status;
                account.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn expired_active_accounts(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Account>, DatabaseError> {
        let tables = self.tables.read().await;
        let mut accounts: Vec<Account> = tables
            .accounts
            .values()
            .filter(|a| a.status == AccountStatus::Active && a.expires_at <= now)
            .cloned()
            .collect();
        accounts.sort_by_key(|a| a.expires_at);
        Ok(accounts)
    }
}

#[async_trait]
impl TelegramUserStore for InMemoryDatabase {
    async fn record_telegram_user(&self, user: &TelegramUser) -> Result<(), DatabaseError> {
        let mut tables = self.tables.write().await;
        let first_seen = tables
            .telegram_users
            .get(&user.chat_id)
            .map_or(user.first_seen, |existing| existing.first_seen);
        tables.telegram_users.insert(
            user.chat_id,
            TelegramUser {
                first_seen,
                ..user.clone()
            },
        );
        Ok(())
    }

    async fn get_telegram_user(
        &self,
        chat_id: i64,
    ) -> Result<Option<TelegramUser>, DatabaseError> {
        Ok(self.tables.read().await.telegram_users.get(&chat_id).cloned())
    }
}

#[async_trait]
impl Database for InMemoryDatabase {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use crate::model::{Account, AccountStatus, Order, OrderStatus, ServiceKind};

    pub(crate) fn order(reference: &str) -> Order {
        Order {
            reference: reference.to_string(),
            merchant_ref: format!("INV-{reference}"),
            amount: 10_000,
            service_kind: ServiceKind::Vless,
            duration_days: 30,
            status: OrderStatus::Pending,
            payment_method: "QRIS".to_string(),
            payment_name: Some("QRIS".to_string()),
            pay_url: None,
            checkout_url: Some(format!("https://pay.example/{reference}")),
            expires_at: Some(Utc::now() + Duration::hours(24)),
            origin_channel: Some("telegram:42".to_string()),
            customer_name: "Budi".to_string(),
            customer_phone: Some("081234567890".to_string()),
            provisioning_payload: "v1:sealed".to_string(),
            created_at: Utc::now(),
            paid_at: None,
        }
    }

    pub(crate) fn account(username: &str, kind: ServiceKind) -> Account {
        let now = Utc::now();
        Account {
            id: Uuid::new_v4(),
            username: username.to_string(),
            kind,
            secret: Uuid::new_v4().to_string(),
            expires_at: now + Duration::days(30),
            status: AccountStatus::Active,
            order_reference: None,
            origin_channel: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{account, order};
    use super::*;

    #[tokio::test]
    async fn transition_is_compare_and_set() {
        let db = InMemoryDatabase::new();
        db.insert_order(&order("R1")).await.unwrap();

        assert!(
            db.transition_order("R1", OrderStatus::Paid, Some(Utc::now()))
                .await
                .unwrap()
        );
        assert!(
            !db.transition_order("R1", OrderStatus::Failed, None)
                .await
                .unwrap()
        );
        let stored = db.get_order("R1").await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);
        assert!(stored.paid_at.is_some());
    }

    #[tokio::test]
    async fn duplicate_reference_is_a_constraint_error() {
        let db = InMemoryDatabase::new();
        db.insert_order(&order("R1")).await.unwrap();
        let err = db.insert_order(&order("R1")).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
    }

    #[tokio::test]
    async fn active_usernames_are_unique_per_kind() {
        let db = InMemoryDatabase::new();
        let first = account("alice", ServiceKind::Vless);
        db.insert_account(&first).await.unwrap();

        let dup = account("alice", ServiceKind::Vless);
        assert!(matches!(
            db.insert_account(&dup).await.unwrap_err(),
            DatabaseError::Constraint(_)
        ));

        db.insert_account(&account("alice", ServiceKind::Trojan))
            .await
            .unwrap();

        db.update_account_status(first.id, AccountStatus::Revoked)
            .await
            .unwrap();
        db.insert_account(&dup).await.unwrap();
    }

    #[tokio::test]
    async fn reconciliation_lists_paid_orders_without_accounts() {
        let db = InMemoryDatabase::new();
        db.insert_order(&order("R1")).await.unwrap();
        db.insert_order(&order("R2")).await.unwrap();
        db.insert_order(&order("R3")).await.unwrap();
        db.transition_order("R1", OrderStatus::Paid, Some(Utc::now()))
            .await
            .unwrap();
        db.transition_order("R2", OrderStatus::Paid, Some(Utc::now()))
            .await
            .unwrap();

        let mut funded = account("bob", ServiceKind::Vless);
        funded.order_reference = Some("R2".to_string());
        db.insert_account(&funded).await.unwrap();

        let orphans = db.paid_orders_without_account().await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].reference, "R1");
    }

    #[tokio::test]
    async fn expired_active_accounts_excludes_future_and_revoked() {
        let db = InMemoryDatabase::new();
        let now = Utc::now();

        let mut past = account("old", ServiceKind::Ssh);
        past.expires_at = now - chrono::Duration::days(1);
        let mut revoked = account("gone", ServiceKind::Ssh);
        revoked.expires_at = now - chrono::Duration::days(1);
        revoked.status = AccountStatus::Revoked;
        db.insert_account(&past).await.unwrap();
        db.insert_account(&revoked).await.unwrap();
        db.insert_account(&account("fresh", ServiceKind::Ssh))
            .await
            .unwrap();

        let expired = db.expired_active_accounts(now).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].username, "old");
    }

    #[tokio::test]
    async fn telegram_users_keep_first_seen_on_refresh() {
        let db = InMemoryDatabase::new();
        let first = Utc::now() - chrono::Duration::days(3);
        let user = TelegramUser {
            chat_id: 7,
            username: Some("budi".to_string()),
            first_name: Some("Budi".to_string()),
            last_name: None,
            first_seen: first,
            last_activity: first,
        };
        db.record_telegram_user(&user).await.unwrap();

        let now = Utc::now();
        db.record_telegram_user(&TelegramUser {
            username: Some("budi_new".to_string()),
            first_seen: now,
            last_activity: now,
            ..user
        })
        .await
        .unwrap();

        let stored = db.get_telegram_user(7).await.unwrap().unwrap();
        assert_eq!(stored.first_seen, first);
        assert_eq!(stored.last_activity, now);
        assert_eq!(stored.username.as_deref(), Some("budi_new"));
        assert!(db.get_telegram_user(8).await.unwrap().is_none());
    }
}
