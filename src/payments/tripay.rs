//! Tripay closed-payment client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::TripayConfig;
use crate::error::GatewayError;
use crate::payments::{
    CallbackEnvelope, CallbackStatus, LineItem, PaymentChannel, PaymentGateway,
    TransactionDetail, TransactionIntent, TransactionRequest, generate_merchant_ref, signature,
};

pub struct TripayClient {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    private_key: SecretString,
    merchant_code: String,
    callback_url: Option<String>,
    return_url: Option<String>,
    timeout: Duration,
    transaction_ttl: Duration,
    customer_email: String,
}

#[derive(Serialize)]
struct CreateTransactionBody<'a> {
    method: &'a str,
    merchant_ref: &'a str,
    amount: i64,
    customer_name: &'a str,
    customer_email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer_phone: Option<&'a str>,
    order_items: &'a [LineItem],
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    return_url: Option<&'a str>,
    expired_time: i64,
    signature: String,
}

#[derive(Deserialize)]
struct TripayEnvelope<T> {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Deserialize)]
struct TripayTransaction {
    reference: String,
    #[serde(default)]
    merchant_ref: Option<String>,
    #[serde(default)]
    payment_method: Option<String>,
    #[serde(default)]
    payment_name: Option<String>,
    #[serde(default)]
    pay_url: Option<String>,
    #[serde(default)]
    checkout_url: Option<String>,
    #[serde(default)]
    amount: Option<i64>,
    #[serde(default)]
    expired_time: Option<i64>,
}

#[derive(Deserialize)]
struct TripayChannel {
    code: String,
    name: String,
    #[serde(default)]
    group: Option<String>,
    #[serde(default)]
    active: Option<bool>,
}

#[derive(Deserialize)]
struct TripayDetail {
    reference: String,
    #[serde(default)]
    merchant_ref: Option<String>,
    status: String,
    #[serde(default)]
    amount: Option<i64>,
    #[serde(default)]
    paid_at: Option<i64>,
}

impl TripayClient {
    pub fn new(config: &TripayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable {
                reason: format!("HTTP client init failed: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            private_key: config.private_key.clone(),
            merchant_code: config.merchant_code.clone(),
            callback_url: config.callback_url.clone(),
            return_url: config.return_url.clone(),
            timeout: config.timeout,
            transaction_ttl: config.transaction_ttl,
            customer_email: config.customer_email.clone(),
        })
    }

    /// Unwrap Tripay's `{success, message, data}` envelope.
    async fn read_data<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        if status.is_server_error() {
            return Err(GatewayError::Unavailable {
                reason: format!("HTTP {}", status.as_u16()),
            });
        }

        let raw = response
            .text()
            .await
            .map_err(|e| self.classify_transport_error(e))?;
        let envelope: TripayEnvelope<T> = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(GatewayError::Rejected {
                    message: format!("HTTP {}", status.as_u16()),
                });
            }
            Err(e) => {
                return Err(GatewayError::InvalidResponse {
                    reason: format!("unparseable body: {e}"),
                });
            }
        };

        if !envelope.success || !status.is_success() {
            return Err(GatewayError::Rejected {
                message: envelope
                    .message
                    .unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
            });
        }

        envelope.data.ok_or_else(|| GatewayError::InvalidResponse {
            reason: "success response without data".to_string(),
        })
    }

    fn classify_transport_error(&self, error: reqwest::Error) -> GatewayError {
        if error.is_timeout() {
            GatewayError::Timeout {
                timeout: self.timeout,
            }
        } else {
            GatewayError::Unavailable {
                reason: error.to_string(),
            }
        }
    }
}

fn unix_to_utc(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

#[async_trait]
impl PaymentGateway for TripayClient {
    async fn create_transaction(
        &self,
        request: &TransactionRequest,
    ) -> Result<TransactionIntent, GatewayError> {
        let merchant_ref = generate_merchant_ref();
        let ttl = chrono::Duration::from_std(self.transaction_ttl).map_err(|e| {
            GatewayError::InvalidResponse {
                reason: format!("transaction ttl out of range: {e}"),
            }
        })?;
        let expired_time = (Utc::now() + ttl).timestamp();

        let body = CreateTransactionBody {
            method: &request.method,
            merchant_ref: &merchant_ref,
            amount: request.amount,
            customer_name: &request.customer_name,
            customer_email: &self.customer_email,
            customer_phone: request.customer_phone.as_deref(),
            order_items: &request.items,
            callback_url: self.callback_url.as_deref(),
            return_url: self.return_url.as_deref(),
            expired_time,
            signature: signature::sign_transaction(
                self.private_key.expose_secret(),
                &self.merchant_code,
                &merchant_ref,
                request.amount,
            ),
        };

        let url = format!("{}/transaction/create", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify_transport_error(e))?;

        let data: TripayTransaction = self.read_data(response).await?;
        if data.reference.trim().is_empty() {
            return Err(GatewayError::InvalidResponse {
                reason: "empty transaction reference".to_string(),
            });
        }

        tracing::info!(
            reference = %data.reference,
            merchant_ref = %merchant_ref,
            method = %request.method,
            amount = request.amount,
            "Opened payment intent"
        );

        Ok(TransactionIntent {
            reference: data.reference,
            merchant_ref: data.merchant_ref.unwrap_or(merchant_ref),
            payment_method: data
                .payment_method
                .unwrap_or_else(|| request.method.clone()),
            payment_name: data.payment_name,
            pay_url: data.pay_url,
            checkout_url: data.checkout_url,
            amount: data.amount.unwrap_or(request.amount),
            expires_at: data
                .expired_time
                .and_then(unix_to_utc)
                .or_else(|| unix_to_utc(expired_time)),
        })
    }

    fn validate_callback(&self, envelope: &CallbackEnvelope) -> bool {
        signature::verify_callback(self.private_key.expose_secret(), envelope)
    }

    async fn payment_channels(&self) -> Result<Vec<PaymentChannel>, GatewayError> {
        let response = self
            .client
            .get(format!("{}/merchant/payment-channel", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| self.classify_transport_error(e))?;

        let channels: Vec<TripayChannel> = self.read_data(response).await?;
        Ok(channels
            .into_iter()
            .map(|c| PaymentChannel {
                code: c.code,
                name: c.name,
                group: c.group,
                active: c.active.unwrap_or(true),
            })
            .collect())
    }

    async fn transaction_detail(
        &self,
        reference: &str,
    ) -> Result<TransactionDetail, GatewayError> {
        let response = self
            .client
            .get(format!("{}/transaction/detail", self.base_url))
            .query(&[("reference", reference)])
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| self.classify_transport_error(e))?;

        let data: TripayDetail = self.read_data(response).await?;
        Ok(TransactionDetail {
            reference: data.reference,
            merchant_ref: data.merchant_ref,
            status: CallbackStatus::parse(&data.status),
            amount: data.amount,
            paid_at: data.paid_at.and_then(unix_to_utc),
        })
    }
}
