//! Payment gateway boundary: payment intents out, signed callbacks in.

mod catalog;
pub mod fake;
pub mod signature;
pub mod tripay;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, OrderError};

pub use self::catalog::{ChannelCatalog, DEFAULT_CHANNEL_TTL};
pub use self::fake::ScriptedGateway;
pub use self::tripay::TripayClient;

/// Payment method codes offered to buyers when the gateway's own list is
/// unavailable.
pub const PAYMENT_METHODS: &[(&str, &str)] = &[
    ("QRIS", "QRIS"),
    ("BCAVA", "BCA Virtual Account"),
    ("BNIVA", "BNI Virtual Account"),
    ("MANDIRIVA", "Mandiri Virtual Account"),
    ("BRIVA", "BRI Virtual Account"),
    ("ALFAMART", "Alfamart"),
    ("INDOMARET", "Indomaret"),
];

pub fn is_supported_method(code: &str) -> bool {
    PAYMENT_METHODS.iter().any(|(c, _)| *c == code)
}

/// One payment channel as listed by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentChannel {
    pub code: String,
    pub name: String,
    pub group: Option<String>,
    pub active: bool,
}

impl PaymentChannel {
    /// [`PAYMENT_METHODS`] as active channels.
    pub fn defaults() -> Vec<Self> {
        PAYMENT_METHODS
            .iter()
            .map(|(code, name)| Self {
                code: (*code).to_string(),
                name: (*name).to_string(),
                group: None,
                active: true,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub sku: String,
    pub name: String,
    pub price: i64,
    pub quantity: u32,
}

/// What the buyer is paying for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub method: String,
    /// Smallest currency unit.
    pub amount: i64,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub items: Vec<LineItem>,
}

/// A payment intent opened at the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionIntent {
    pub reference: String,
    pub merchant_ref: String,
    pub payment_method: String,
    pub payment_name: Option<String>,
    pub pay_url: Option<String>,
    pub checkout_url: Option<String>,
    pub amount: i64,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A raw inbound callback exactly as received.
#[derive(Debug, Clone)]
pub struct CallbackEnvelope {
    pub body: Bytes,
    /// Value of the `X-Callback-Signature` header, if sent.
    pub header_signature: Option<String>,
}

impl CallbackEnvelope {
    pub fn new(body: impl Into<Bytes>, header_signature: Option<String>) -> Self {
        Self {
            body: body.into(),
            header_signature,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackStatus {
    Paid,
    Failed,
    Expired,
    /// Anything else the gateway reports (`UNPAID`, `REFUND`, ...).
    Other(String),
}

impl CallbackStatus {
    pub(crate) fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PAID" => Self::Paid,
            "FAILED" => Self::Failed,
            "EXPIRED" => Self::Expired,
            other => Self::Other(other.to_string()),
        }
    }
}

/// The gateway's current view of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDetail {
    pub reference: String,
    pub merchant_ref: Option<String>,
    pub status: CallbackStatus,
    pub amount: Option<i64>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// The fields of a callback the order lifecycle acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackPayload {
    pub reference: String,
    pub merchant_ref: Option<String>,
    pub status: CallbackStatus,
}

#[derive(Deserialize)]
struct RawCallback {
    reference: Option<String>,
    merchant_ref: Option<String>,
    status: Option<String>,
}

impl CallbackPayload {
    /// Parse an already-authenticated callback body.
    pub fn parse(body: &[u8]) -> Result<Self, OrderError> {
        let raw: RawCallback = serde_json::from_slice(body)
            .map_err(|e| OrderError::MalformedCallback(format!("invalid JSON: {e}")))?;
        let reference = raw
            .reference
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| OrderError::MalformedCallback("missing reference".to_string()))?;
        let status = raw
            .status
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| OrderError::MalformedCallback("missing status".to_string()))?;
        Ok(Self {
            reference,
            merchant_ref: raw.merchant_ref,
            status: CallbackStatus::parse(&status),
        })
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a payment intent. Never retried; a failure persists nothing.
    async fn create_transaction(
        &self,
        request: &TransactionRequest,
    ) -> Result<TransactionIntent, GatewayError>;

    /// Recompute the callback signature. Pure.
    fn validate_callback(&self, envelope: &CallbackEnvelope) -> bool;

    /// Channels the merchant account can currently accept.
    async fn payment_channels(&self) -> Result<Vec<PaymentChannel>, GatewayError>;

    /// Look up a transaction without waiting for its callback.
    async fn transaction_detail(&self, reference: &str)
    -> Result<TransactionDetail, GatewayError>;
}

/// `INV-<unix-millis>-<6 alphanumerics>`.
pub fn generate_merchant_ref() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("INV-{}-{}", Utc::now().timestamp_millis(), suffix)
}
