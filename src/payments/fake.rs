//! In-process gateway for tests and dry runs.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::GatewayError;
use crate::payments::{
    CallbackEnvelope, CallbackStatus, PaymentChannel, PaymentGateway, TransactionDetail,
    TransactionIntent, TransactionRequest, generate_merchant_ref, signature,
};

/// Hands out queued references (then `R<n>`), records every request, and
/// verifies callbacks with a real HMAC key.
///
/// Transaction lookups report `UNPAID` unless a status was scripted.
pub struct ScriptedGateway {
    private_key: String,
    references: Mutex<VecDeque<String>>,
    failures: Mutex<VecDeque<GatewayError>>,
    requests: Mutex<Vec<TransactionRequest>>,
    channels: Mutex<Vec<PaymentChannel>>,
    statuses: Mutex<HashMap<String, String>>,
    lookups_fail: Mutex<bool>,
    channel_requests: AtomicU64,
    detail_requests: AtomicU64,
    counter: AtomicU64,
}

impl ScriptedGateway {
    pub fn new(private_key: impl Into<String>) -> Self {
        Self {
            private_key: private_key.into(),
            references: Mutex::new(VecDeque::new()),
            failures: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            channels: Mutex::new(PaymentChannel::defaults()),
            statuses: Mutex::new(HashMap::new()),
            lookups_fail: Mutex::new(false),
            channel_requests: AtomicU64::new(0),
            detail_requests: AtomicU64::new(0),
            counter: AtomicU64::new(0),
        }
    }

    pub fn with_references<I, S>(self, references: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut queue) = self.references.lock() {
            queue.extend(references.into_iter().map(Into::into));
        }
        self
    }

    /// Make the next `create_transaction` call fail with `error`.
    pub fn fail_next(&self, error: GatewayError) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push_back(error);
        }
    }

    pub fn requests(&self) -> Vec<TransactionRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn set_channels(&self, channels: Vec<PaymentChannel>) {
        if let Ok(mut current) = self.channels.lock() {
            *current = channels;
        }
    }

    /// What `transaction_detail` reports for `reference` from now on.
    pub fn set_transaction_status(&self, reference: &str, status: &str) {
        if let Ok(mut statuses) = self.statuses.lock() {
            statuses.insert(reference.to_string(), status.to_string());
        }
    }

    /// Make channel and transaction lookups fail until reset.
    pub fn fail_lookups(&self, fail: bool) {
        if let Ok(mut flag) = self.lookups_fail.lock() {
            *flag = fail;
        }
    }

    pub fn channel_requests(&self) -> u64 {
        self.channel_requests.load(Ordering::SeqCst)
    }

    pub fn detail_requests(&self) -> u64 {
        self.detail_requests.load(Ordering::SeqCst)
    }

    fn lookup_failure(&self) -> Option<GatewayError> {
        self.lookups_fail
            .lock()
            .map(|f| *f)
            .unwrap_or(false)
            .then(|| GatewayError::Unavailable {
                reason: "scripted lookup failure".to_string(),
            })
    }

    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    /// Build a header-signed callback for `reference`.
    pub fn signed_callback(&self, reference: &str, status: &str) -> CallbackEnvelope {
        let body = serde_json::json!({
            "reference": reference,
            "status": status,
        })
        .to_string();
        let sig = signature::sign_callback_body(&self.private_key, body.as_bytes());
        CallbackEnvelope::new(body.into_bytes(), Some(sig))
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn create_transaction(
        &self,
        request: &TransactionRequest,
    ) -> Result<TransactionIntent, GatewayError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if let Some(error) = self.failures.lock().ok().and_then(|mut f| f.pop_front()) {
            return Err(error);
        }

        let reference = self
            .references
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or_else(|| format!("R{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1));

        Ok(TransactionIntent {
            checkout_url: Some(format!("https://pay.example/checkout/{reference}")),
            reference,
            merchant_ref: generate_merchant_ref(),
            payment_method: request.method.clone(),
            payment_name: Some(request.method.clone()),
            pay_url: None,
            amount: request.amount,
            expires_at: Some(Utc::now() + chrono::Duration::hours(24)),
        })
    }

    fn validate_callback(&self, envelope: &CallbackEnvelope) -> bool {
        signature::verify_callback(&self.private_key, envelope)
    }

    async fn payment_channels(&self) -> Result<Vec<PaymentChannel>, GatewayError> {
        self.channel_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.lookup_failure() {
            return Err(error);
        }
        Ok(self.channels.lock().map(|c| c.clone()).unwrap_or_default())
    }

    async fn transaction_detail(
        &self,
        reference: &str,
    ) -> Result<TransactionDetail, GatewayError> {
        self.detail_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.lookup_failure() {
            return Err(error);
        }
        let status = self
            .statuses
            .lock()
            .ok()
            .and_then(|s| s.get(reference).map(|raw| CallbackStatus::parse(raw)))
            .unwrap_or_else(|| CallbackStatus::Other("UNPAID".to_string()));
        Ok(TransactionDetail {
            reference: reference.to_string(),
            merchant_ref: None,
            paid_at: (status == CallbackStatus::Paid).then(Utc::now),
            status,
            amount: None,
        })
    }
}
