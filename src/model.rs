//! Core records: service kinds, orders and provisioned accounts.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The four kinds of access account the panel sells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Ssh,
    Vless,
    Vmess,
    Trojan,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 4] = [Self::Ssh, Self::Vless, Self::Vmess, Self::Trojan];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ssh => "ssh",
            Self::Vless => "vless",
            Self::Vmess => "vmess",
            Self::Trojan => "trojan",
        }
    }

    /// Plain-shell accounts carry a buyer-chosen password; tunnels get a generated credential.
    pub fn requires_password(self) -> bool {
        matches!(self, Self::Ssh)
    }

    pub fn is_tunnel(self) -> bool {
        !matches!(self, Self::Ssh)
    }

    pub fn label(self) -> String {
        self.as_str().to_ascii_uppercase()
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ssh" => Ok(Self::Ssh),
            "vless" => Ok(Self::Vless),
            "vmess" => Ok(Self::Vmess),
            "trojan" => Ok(Self::Trojan),
            other => Err(format!(
                "invalid service type '{other}', expected one of: ssh, vless, vmess, trojan"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Failed,
    Expired,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "paid" => Some(Self::Paid),
            "failed" => Some(Self::Failed),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One purchase attempt, from payment intent to terminal payment outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    /// Gateway-assigned, unique and immutable.
    pub reference: String,
    /// Locally generated correlation id sent to the gateway.
    pub merchant_ref: String,
    pub amount: i64,
    pub service_kind: ServiceKind,
    pub duration_days: u32,
    pub status: OrderStatus,
    pub payment_method: String,
    pub payment_name: Option<String>,
    pub pay_url: Option<String>,
    pub checkout_url: Option<String>,
    /// When the payment link stops accepting payment.
    pub expires_at: Option<DateTime<Utc>>,
    /// Address to notify (e.g. `telegram:12345`).
    pub origin_channel: Option<String>,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    /// Sealed buyer credentials, consumed by provisioning. Never exposed.
    pub provisioning_payload: String,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Expired,
    Revoked,
}

impl AccountStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "expired" => Some(Self::Expired),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provisioned, time-boxed access credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub kind: ServiceKind,
    /// Password for ssh, UUID for tunnel kinds.
    pub secret: String,
    pub expires_at: DateTime<Utc>,
    pub status: AccountStatus,
    /// Funding order, if any. Lookup only.
    pub order_reference: Option<String>,
    pub origin_channel: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A Telegram chat that opened the bot with `/start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramUser {
    pub chat_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}
