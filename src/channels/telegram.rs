//! Telegram Bot API adapter: outbound `sendMessage` and inbound update mapping.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::accounts::AccountManager;
use crate::channels::{Notification, Notifier, markdown};
use crate::config::TelegramConfig;
use crate::conversation::{ConversationInput, ConversationMachine, Reply};
use crate::db::Database;
use crate::error::{ChannelError, ConversationError, OrderError};
use crate::model::{OrderStatus, ServiceKind, TelegramUser};
use crate::orders::OrderStatusView;
use crate::payments::PAYMENT_METHODS;

const CHANNEL_PREFIX: &str = "telegram:";
const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const STATUS_LIMIT: usize = 5;

pub fn channel_address(chat_id: i64) -> String {
    format!("{CHANNEL_PREFIX}{chat_id}")
}

fn parse_channel_address(address: &str) -> Option<i64> {
    address.strip_prefix(CHANNEL_PREFIX)?.parse().ok()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboard {
    pub inline_keyboard: Vec<Vec<InlineButton>>,
}

fn button(text: impl Into<String>, data: impl Into<String>) -> InlineButton {
    InlineButton {
        text: text.into(),
        callback_data: data.into(),
    }
}

pub fn main_menu() -> InlineKeyboard {
    InlineKeyboard {
        inline_keyboard: vec![
            vec![button("🛒 Buy account", "buy_service")],
            vec![button("📋 Check status", "check_status")],
            vec![button("❓ Help", "help")],
        ],
    }
}

fn config_button(kind: ServiceKind, account_id: Uuid) -> InlineButton {
    button(
        format!("📥 Download {} config", kind.label()),
        format!("config_{account_id}"),
    )
}

/// One download button per provisioned order, or `None` when there is nothing to offer.
fn status_keyboard(orders: &[OrderStatusView]) -> Option<InlineKeyboard> {
    let rows: Vec<Vec<InlineButton>> = orders
        .iter()
        .filter_map(|o| o.account_id.map(|id| vec![config_button(o.service_type, id)]))
        .collect();
    (!rows.is_empty()).then_some(InlineKeyboard {
        inline_keyboard: rows,
    })
}

fn help_text(admin_contact: Option<&str>) -> String {
    let mut text = String::from(
        "*How to buy*\n\
         1. Tap 🛒 Buy account and pick a service.\n\
         2. Send the username, and a password for SSH.\n\
         3. Choose a payment method and pay with the link you receive.\n\
         4. Your connection details arrive here once the payment is confirmed.\n\n\
         /status lists your recent orders. /cancel starts over.",
    );
    if let Some(contact) = admin_contact {
        text.push_str(&format!("\n\nQuestions? Contact {}.", markdown::escape(contact)));
    }
    text
}

pub fn service_menu() -> InlineKeyboard {
    InlineKeyboard {
        inline_keyboard: ServiceKind::ALL
            .iter()
            .map(|kind| vec![button(kind.label(), format!("service_{kind}"))])
            .collect(),
    }
}

pub fn payment_menu() -> InlineKeyboard {
    InlineKeyboard {
        inline_keyboard: PAYMENT_METHODS
            .chunks(2)
            .map(|row| {
                row.iter()
                    .map(|(code, name)| button(*name, format!("payment_{code}")))
                    .collect()
            })
            .collect(),
    }
}

fn status_lines(orders: &[OrderStatusView]) -> String {
    orders
        .iter()
        .map(|o| {
            let marker = match o.status {
                OrderStatus::Paid if o.provisioned => "✅",
                OrderStatus::Paid => "⚠️",
                OrderStatus::Pending => "⏳",
                OrderStatus::Failed | OrderStatus::Expired => "❌",
            };
            format!(
                "{marker} {} {} {}d: {}",
                markdown::code(&o.reference),
                o.service_type.label(),
                o.duration_days,
                o.status
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// --- Inbound ---

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    #[serde(default)]
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotAction {
    /// `/start`, with the sender when Telegram supplied one.
    Start(Option<User>),
    Menu,
    Help,
    ServiceMenu,
    CheckStatus,
    DownloadConfig(Uuid),
    Conversation(ConversationInput),
}

/// Map an update to the chat it belongs to and what the buyer asked for.
pub fn parse_update(update: &Update) -> Option<(i64, BotAction)> {
    if let Some(query) = &update.callback_query {
        let chat_id = query.message.as_ref()?.chat.id;
        let data = query.data.as_deref()?;
        let action = match data {
            "buy_service" => BotAction::ServiceMenu,
            "check_status" => BotAction::CheckStatus,
            "menu" => BotAction::Menu,
            "help" => BotAction::Help,
            _ => {
                if let Some(id) = data.strip_prefix("config_") {
                    BotAction::DownloadConfig(id.parse().ok()?)
                } else if let Some(kind) = data.strip_prefix("service_") {
                    BotAction::Conversation(ConversationInput::SelectService(kind.parse().ok()?))
                } else if let Some(code) = data.strip_prefix("payment_") {
                    BotAction::Conversation(ConversationInput::SelectPaymentMethod(
                        code.to_string(),
                    ))
                } else {
                    return None;
                }
            }
        };
        return Some((chat_id, action));
    }

    let message = update.message.as_ref()?;
    let text = message.text.as_deref()?.trim();
    let action = match text.split_whitespace().next() {
        Some("/start") => BotAction::Start(message.from.clone()),
        Some("/menu") => BotAction::Menu,
        Some("/help") => BotAction::Help,
        Some("/cancel") => BotAction::Conversation(ConversationInput::Restart),
        Some("/status") => BotAction::CheckStatus,
        _ => BotAction::Conversation(ConversationInput::Text(text.to_string())),
    };
    Some((message.chat.id, action))
}

// --- Outbound ---

#[derive(Serialize)]
struct SendMessageBody<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a InlineKeyboard>,
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramNotifier {
    client: reqwest::Client,
    token: SecretString,
    api_base_url: String,
}

impl TelegramNotifier {
    pub fn new(token: SecretString, api_base_url: impl Into<String>) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .map_err(|e| ChannelError::Http(e.to_string()))?;
        Ok(Self {
            client,
            token,
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// `None` when no bot token is configured.
    pub fn from_config(config: &TelegramConfig) -> Result<Option<Self>, ChannelError> {
        config
            .bot_token
            .clone()
            .map(|token| Self::new(token, config.api_base_url.clone()))
            .transpose()
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<(), ChannelError> {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.api_base_url,
            self.token.expose_secret()
        );
        let body = SendMessageBody {
            chat_id,
            text,
            parse_mode: "Markdown",
            reply_markup: keyboard,
        };

        // The URL carries the token; never let it reach an error message.
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| send_failed(e.without_url().to_string()))?;
        let status = response.status();
        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| send_failed(format!("HTTP {status}: {}", e.without_url())))?;
        if !parsed.ok {
            return Err(send_failed(
                parsed
                    .description
                    .unwrap_or_else(|| format!("HTTP {status}")),
            ));
        }
        Ok(())
    }
}

fn send_failed(reason: String) -> ChannelError {
    ChannelError::SendFailed {
        name: "telegram".to_string(),
        reason,
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(
        &self,
        origin_channel: &str,
        notification: &Notification,
    ) -> Result<(), ChannelError> {
        let chat_id = parse_channel_address(origin_channel).ok_or_else(|| {
            ChannelError::InvalidMessage(format!("not a telegram address: {origin_channel}"))
        })?;
        let keyboard = match notification {
            Notification::AccountReady {
                account_id,
                descriptor,
                ..
            } => Some(InlineKeyboard {
                inline_keyboard: vec![vec![config_button(descriptor.kind(), *account_id)]],
            }),
            _ => None,
        };
        self.send_message(chat_id, &notification.to_message(), keyboard.as_ref())
            .await
    }
}

/// Runs updates through the conversation and answers in the chat.
pub struct TelegramBot {
    notifier: Arc<TelegramNotifier>,
    conversation: Arc<ConversationMachine>,
    accounts: Arc<AccountManager>,
    db: Arc<dyn Database>,
    admin_contact: Option<String>,
}

impl TelegramBot {
    pub fn new(
        notifier: Arc<TelegramNotifier>,
        conversation: Arc<ConversationMachine>,
        accounts: Arc<AccountManager>,
        db: Arc<dyn Database>,
    ) -> Self {
        Self {
            notifier,
            conversation,
            accounts,
            db,
            admin_contact: None,
        }
    }

    pub fn with_admin_contact(mut self, contact: Option<String>) -> Self {
        self.admin_contact = contact;
        self
    }

    async fn record_user(&self, chat_id: i64, user: Option<User>) {
        let now = Utc::now();
        let (username, first_name, last_name) = user
            .map(|u| (u.username, u.first_name, u.last_name))
            .unwrap_or_default();
        let record = TelegramUser {
            chat_id,
            username,
            first_name,
            last_name,
            first_seen: now,
            last_activity: now,
        };
        if let Err(err) = self.db.record_telegram_user(&record).await {
            tracing::warn!(chat_id, error = %err, "Failed to record telegram user");
        }
    }

    pub async fn handle_update(&self, update: &Update) -> Result<(), ChannelError> {
        let Some((chat_id, action)) = parse_update(update) else {
            tracing::debug!(update_id = update.update_id, "Ignoring unsupported update");
            return Ok(());
        };
        let session_id = chat_id.to_string();
        let channel = channel_address(chat_id);

        match action {
            BotAction::Start(user) => {
                self.record_user(chat_id, user).await;
                self.notifier
                    .send_message(chat_id, "Welcome! What would you like to do?", Some(&main_menu()))
                    .await
            }
            BotAction::Help => {
                let back = InlineKeyboard {
                    inline_keyboard: vec![vec![button("⬅️ Menu", "menu")]],
                };
                self.notifier
                    .send_message(
                        chat_id,
                        &help_text(self.admin_contact.as_deref()),
                        Some(&back),
                    )
                    .await
            }
            BotAction::DownloadConfig(account_id) => {
                let text = match self
                    .accounts
                    .descriptor_for_channel(account_id, &channel)
                    .await
                {
                    Ok(details) => details.descriptor.to_message(),
                    Err(OrderError::NotFound { .. }) => "❌ Configuration not found.".to_string(),
                    Err(err) => {
                        tracing::error!(chat_id, account_id = %account_id, error = %err, "Failed to load configuration");
                        "Could not load the configuration, please try again.".to_string()
                    }
                };
                self.notifier.send_message(chat_id, &text, None).await
            }
            BotAction::Menu => {
                self.notifier
                    .send_message(chat_id, "Welcome! What would you like to do?", Some(&main_menu()))
                    .await
            }
            BotAction::ServiceMenu => {
                self.notifier
                    .send_message(chat_id, "Choose a service:", Some(&service_menu()))
                    .await
            }
            BotAction::CheckStatus => {
                let (text, keyboard) = match self
                    .conversation
                    .recent_orders(&channel, STATUS_LIMIT)
                    .await
                {
                    Ok(orders) if orders.is_empty() => ("You have no orders yet.".to_string(), None),
                    Ok(orders) => (status_lines(&orders), status_keyboard(&orders)),
                    Err(err) => {
                        tracing::error!(chat_id, error = %err, "Failed to load recent orders");
                        (
                            "Could not load your orders, please try again.".to_string(),
                            None,
                        )
                    }
                };
                self.notifier
                    .send_message(chat_id, &text, keyboard.as_ref())
                    .await
            }
            BotAction::Conversation(input) => {
                match self.conversation.handle(&session_id, &channel, input).await {
                    Ok(reply) => {
                        let keyboard = match &reply {
                            Reply::ChoosePaymentMethod => Some(payment_menu()),
                            Reply::Restarted | Reply::Ignored => Some(service_menu()),
                            _ => None,
                        };
                        self.notifier
                            .send_message(chat_id, &reply.to_message(), keyboard.as_ref())
                            .await
                    }
                    Err(ConversationError::SessionExpired { .. }) => {
                        self.notifier
                            .send_message(
                                chat_id,
                                "Your session expired. Choose a service to start again.",
                                Some(&service_menu()),
                            )
                            .await
                    }
                    Err(ConversationError::Validation(message)) => {
                        self.notifier
                            .send_message(
                                chat_id,
                                &format!("⚠️ {}", markdown::escape(&message)),
                                None,
                            )
                            .await
                    }
                }
            }
        }
    }
}
