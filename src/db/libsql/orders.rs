//! OrderStore for libSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    LibSqlBackend, fmt_opt_ts, fmt_ts, get_i64, get_opt_text, get_opt_ts, get_text, get_ts,
    map_write_error, opt_text, text,
};
use crate::db::OrderStore;
use crate::error::DatabaseError;
use crate::model::{Order, OrderStatus, ServiceKind};

/// Explicit column list (matches positional access in `row_to_order`).
const ORDER_COLUMNS: &str = "\
    reference, merchant_ref, amount, service_kind, duration_days, status, \
    payment_method, payment_name, pay_url, checkout_url, expires_at, \
    origin_channel, customer_name, customer_phone, provisioning_payload, \
    created_at, paid_at";

fn row_to_order(row: &libsql::Row) -> Result<Order, DatabaseError> {
    let reference = get_text(row, 0);
    let service_kind = get_text(row, 3)
        .parse::<ServiceKind>()
        .map_err(DatabaseError::Serialization)?;
    let status_raw = get_text(row, 5);
    let status = OrderStatus::parse(&status_raw).ok_or_else(|| {
        DatabaseError::Serialization(format!(
            "order {reference} has unknown status '{status_raw}'"
        ))
    })?;
    let duration_days = u32::try_from(get_i64(row, 4))
        .map_err(|e| DatabaseError::Serialization(format!("duration_days: {e}")))?;

    Ok(Order {
        merchant_ref: get_text(row, 1),
        amount: get_i64(row, 2),
        service_kind,
        duration_days,
        status,
        payment_method: get_text(row, 6),
        payment_name: get_opt_text(row, 7),
        pay_url: get_opt_text(row, 8),
        checkout_url: get_opt_text(row, 9),
        expires_at: get_opt_ts(row, 10),
        origin_channel: get_opt_text(row, 11),
        customer_name: get_text(row, 12),
        customer_phone: get_opt_text(row, 13),
        provisioning_payload: get_text(row, 14),
        created_at: get_ts(row, 15),
        paid_at: get_opt_ts(row, 16),
        reference,
    })
}

async fn collect_orders(mut rows: libsql::Rows) -> Result<Vec<Order>, DatabaseError> {
    let mut orders = Vec::new();
    while let Some(row) = rows.next().await? {
        orders.push(row_to_order(&row)?);
    }
    Ok(orders)
}

#[async_trait]
impl OrderStore for LibSqlBackend {
    async fn insert_order(&self, order: &Order) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        conn.execute(
            &format!(
                "INSERT INTO orders ({ORDER_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
            ),
            libsql::params_from_iter(vec![
                text(order.reference.as_str()),
                text(order.merchant_ref.as_str()),
                libsql::Value::Integer(order.amount),
                text(order.service_kind.as_str()),
                libsql::Value::Integer(i64::from(order.duration_days)),
                text(order.status.as_str()),
                text(order.payment_method.as_str()),
                opt_text(order.payment_name.as_deref()),
                opt_text(order.pay_url.as_deref()),
                opt_text(order.checkout_url.as_deref()),
                fmt_opt_ts(&order.expires_at),
                opt_text(order.origin_channel.as_deref()),
                text(order.customer_name.as_str()),
                opt_text(order.customer_phone.as_deref()),
                text(order.provisioning_payload.as_str()),
                text(fmt_ts(&order.created_at)),
                fmt_opt_ts(&order.paid_at),
            ]),
        )
        .await
        .map_err(map_write_error)?;
        Ok(())
    }

    async fn get_order(&self, reference: &str) -> Result<Option<Order>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE reference = ?1"),
                libsql::params_from_iter(vec![text(reference)]),
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_order(&row)?)),
            None => Ok(None),
        }
    }

    async fn transition_order(
        &self,
        reference: &str,
        to: OrderStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let changed = conn
            .execute(
                "UPDATE orders SET status = ?1, paid_at = ?2 \
                 WHERE reference = ?3 AND status = 'pending'",
                libsql::params_from_iter(vec![
                    text(to.as_str()),
                    fmt_opt_ts(&paid_at),
                    text(reference),
                ]),
            )
            .await?;
        Ok(changed == 1)
    }

    async fn orders_for_channel(
        &self,
        origin_channel: &str,
        limit: usize,
    ) -> Result<Vec<Order>, DatabaseError> {
        let conn = self.connect().await?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = conn
            .query(
                &format!(
                    "SELECT {ORDER_COLUMNS} FROM orders WHERE origin_channel = ?1 \
                     ORDER BY created_at DESC LIMIT ?2"
                ),
                libsql::params_from_iter(vec![text(origin_channel), libsql::Value::Integer(limit)]),
            )
            .await?;
        collect_orders(rows).await
    }

    async fn paid_orders_without_account(&self) -> Result<Vec<Order>, DatabaseError> {
        let conn = self.connect().await?;
        let columns = ORDER_COLUMNS
            .split(',')
            .map(|c| format!("o.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        let rows = conn
            .query(
                &format!(
                    "SELECT {columns} FROM orders o \
                     LEFT JOIN accounts a ON a.order_reference = o.reference \
                     WHERE o.status = 'paid' AND a.id IS NULL \
                     ORDER BY o.created_at DESC"
                ),
                (),
            )
            .await?;
        collect_orders(rows).await
    }
}
