//! Order lifecycle: payment intent, idempotent callback handling, fulfilment.

mod locks;
mod service;
pub mod validation;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::OrderError;
use crate::model::{Order, OrderStatus, ServiceKind};

pub use self::locks::KeyedLocks;
pub use self::service::OrderService;

/// Everything needed to open a payment intent for one account.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct OrderDraft {
    pub service_type: String,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    pub customer_name: String,
    #[serde(default)]
    pub customer_phone: Option<String>,
    pub payment_method: String,
    pub duration_days: u32,
    #[serde(default)]
    pub origin_channel: Option<String>,
}

impl std::fmt::Debug for OrderDraft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderDraft")
            .field("service_type", &self.service_type)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("customer_name", &self.customer_name)
            .field("customer_phone", &self.customer_phone)
            .field("payment_method", &self.payment_method)
            .field("duration_days", &self.duration_days)
            .field("origin_channel", &self.origin_channel)
            .finish()
    }
}

/// Gateway identifiers returned to the buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderCreated {
    pub reference: String,
    pub merchant_ref: String,
    pub service_type: ServiceKind,
    pub duration_days: u32,
    pub amount: i64,
    pub payment_method: String,
    pub payment_name: Option<String>,
    pub pay_url: Option<String>,
    pub checkout_url: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Public projection of an order. Carries no credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderStatusView {
    pub reference: String,
    pub merchant_ref: String,
    pub status: OrderStatus,
    pub service_type: ServiceKind,
    pub duration_days: u32,
    pub amount: i64,
    pub payment_method: String,
    pub payment_name: Option<String>,
    pub pay_url: Option<String>,
    pub checkout_url: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub provisioned: bool,
    /// Account created for this order. Chat transports use it for download buttons.
    #[serde(skip)]
    pub account_id: Option<Uuid>,
}

impl OrderStatusView {
    pub(crate) fn from_order(order: &Order, account_id: Option<Uuid>) -> Self {
        Self {
            reference: order.reference.clone(),
            merchant_ref: order.merchant_ref.clone(),
            status: order.status,
            service_type: order.service_kind,
            duration_days: order.duration_days,
            amount: order.amount,
            payment_method: order.payment_method.clone(),
            payment_name: order.payment_name.clone(),
            pay_url: order.pay_url.clone(),
            checkout_url: order.checkout_url.clone(),
            expires_at: order.expires_at,
            created_at: order.created_at,
            paid_at: order.paid_at,
            provisioned: account_id.is_some(),
            account_id,
        }
    }
}

/// A paid order with no account behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationEntry {
    pub reference: String,
    pub merchant_ref: String,
    pub service_type: ServiceKind,
    pub duration_days: u32,
    pub amount: i64,
    pub origin_channel: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl From<&Order> for ReconciliationEntry {
    fn from(order: &Order) -> Self {
        Self {
            reference: order.reference.clone(),
            merchant_ref: order.merchant_ref.clone(),
            service_type: order.service_kind,
            duration_days: order.duration_days,
            amount: order.amount,
            origin_channel: order.origin_channel.clone(),
            paid_at: order.paid_at,
        }
    }
}

/// What an accepted callback did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CallbackOutcome {
    /// Fresh `pending -> paid`; account created and buyer notified.
    Provisioned { reference: String, account_id: Uuid },
    /// Fresh `pending -> paid`, but provisioning failed. Listed in reconciliation.
    ProvisioningFailed { reference: String, reason: String },
    /// Fresh `pending -> failed|expired`.
    Closed {
        reference: String,
        status: OrderStatus,
    },
    /// Order was already terminal; nothing re-applied.
    AlreadyFinal {
        reference: String,
        status: OrderStatus,
    },
    /// Status the lifecycle does not act on (`UNPAID`, `REFUND`, ...).
    Ignored { reference: String, status: String },
}

/// Hand-off point from the conversation into the order lifecycle.
#[async_trait]
pub trait OrderPlacer: Send + Sync {
    async fn place_order(&self, draft: OrderDraft) -> Result<OrderCreated, OrderError>;

    async fn recent_orders(
        &self,
        origin_channel: &str,
        limit: usize,
    ) -> Result<Vec<OrderStatusView>, OrderError>;
}
