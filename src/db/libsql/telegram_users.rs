//! TelegramUserStore for libSQL.

use async_trait::async_trait;

use super::{LibSqlBackend, fmt_ts, get_i64, get_opt_text, get_ts, opt_text, text};
use crate::db::TelegramUserStore;
use crate::error::DatabaseError;
use crate::model::TelegramUser;

#[async_trait]
impl TelegramUserStore for LibSqlBackend {
    async fn record_telegram_user(&self, user: &TelegramUser) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        conn.execute(
            "INSERT INTO telegram_users \
                 (chat_id, username, first_name, last_name, first_seen, last_activity) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(chat_id) DO UPDATE SET \
                 username = excluded.username, \
                 first_name = excluded.first_name, \
                 last_name = excluded.last_name, \
                 last_activity = excluded.last_activity",
            libsql::params_from_iter(vec![
                libsql::Value::Integer(user.chat_id),
                opt_text(user.username.as_deref()),
                opt_text(user.first_name.as_deref()),
                opt_text(user.last_name.as_deref()),
                text(fmt_ts(&user.first_seen)),
                text(fmt_ts(&user.last_activity)),
            ]),
        )
        .await?;
        Ok(())
    }

    async fn get_telegram_user(
        &self,
        chat_id: i64,
    ) -> Result<Option<TelegramUser>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                "SELECT chat_id, username, first_name, last_name, first_seen, last_activity \
                 FROM telegram_users WHERE chat_id = ?1",
                libsql::params_from_iter(vec![libsql::Value::Integer(chat_id)]),
            )
            .await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        Ok(Some(TelegramUser {
            chat_id: get_i64(&row, 0),
            username: get_opt_text(&row, 1),
            first_name: get_opt_text(&row, 2),
            last_name: get_opt_text(&row, 3),
            first_seen: get_ts(&row, 4),
            last_activity: get_ts(&row, 5),
        }))
    }
}
