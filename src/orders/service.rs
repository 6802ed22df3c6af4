use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::channels::{Notification, Notifier};
use crate::config::PricingConfig;
use crate::db::Database;
use crate::error::OrderError;
use crate::model::{Account, AccountStatus, Order, OrderStatus, ServiceKind};
use crate::orders::validation;
use crate::orders::{
    CallbackOutcome, KeyedLocks, OrderCreated, OrderDraft, OrderPlacer, OrderStatusView,
    ReconciliationEntry,
};
use crate::payments::{
    CallbackEnvelope, CallbackPayload, CallbackStatus, ChannelCatalog, DEFAULT_CHANNEL_TTL,
    LineItem, PaymentChannel, PaymentGateway, TransactionRequest,
};
use crate::provisioning::ProvisioningService;
use crate::secrets::{DraftCredentials, PayloadSealer};

/// Orchestrates intents, callbacks and fulfilment.
///
/// Callback handling for one reference runs under a per-reference lock and a
/// compare-and-set on the stored status, so exactly one caller performs the
/// side effects of `pending -> paid`.
pub struct OrderService {
    db: Arc<dyn Database>,
    gateway: Arc<dyn PaymentGateway>,
    provisioning: Arc<ProvisioningService>,
    sealer: PayloadSealer,
    notifier: Arc<dyn Notifier>,
    pricing: PricingConfig,
    channels: ChannelCatalog,
    locks: KeyedLocks,
}

struct ValidDraft {
    kind: ServiceKind,
    username: String,
    password: Option<String>,
    customer_name: String,
    customer_phone: Option<String>,
}

impl OrderService {
    pub fn new(
        db: Arc<dyn Database>,
        gateway: Arc<dyn PaymentGateway>,
        provisioning: Arc<ProvisioningService>,
        sealer: PayloadSealer,
        notifier: Arc<dyn Notifier>,
        pricing: PricingConfig,
    ) -> Self {
        Self {
            channels: ChannelCatalog::new(gateway.clone(), DEFAULT_CHANNEL_TTL),
            db,
            gateway,
            provisioning,
            sealer,
            notifier,
            pricing,
            locks: KeyedLocks::new(),
        }
    }

    pub fn with_channel_cache_ttl(mut self, ttl: Duration) -> Self {
        self.channels = ChannelCatalog::new(self.gateway.clone(), ttl);
        self
    }

    /// Payment channels buyers may choose from right now.
    pub async fn payment_channels(&self) -> Vec<PaymentChannel> {
        self.channels
            .channels()
            .await
            .into_iter()
            .filter(|c| c.active)
            .collect()
    }

    async fn validate(&self, draft: &OrderDraft) -> Result<ValidDraft, OrderError> {
        let kind = validation::parse_service_kind(&draft.service_type)
            .map_err(OrderError::Validation)?;
        let username = draft.username.trim().to_string();
        validation::check_username(&username).map_err(OrderError::Validation)?;
        let password = if kind.requires_password() {
            draft.password.clone()
        } else {
            None
        };
        validation::check_password(kind, password.as_deref()).map_err(OrderError::Validation)?;

        let customer_name = draft.customer_name.trim().to_string();
        if customer_name.is_empty() {
            return Err(OrderError::Validation("Customer name is required".to_string()));
        }
        let customer_phone = draft
            .customer_phone
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        validation::check_phone(customer_phone.as_deref()).map_err(OrderError::Validation)?;
        validation::check_duration(draft.duration_days).map_err(OrderError::Validation)?;
        if !self.channels.is_available(&draft.payment_method).await {
            return Err(OrderError::Validation(format!(
                "Unsupported payment method '{}'",
                draft.payment_method
            )));
        }

        if self
            .db
            .find_active_account(&username, kind)
            .await?
            .is_some()
        {
            return Err(OrderError::Validation(format!(
                "Username '{username}' already has an active {} account",
                kind.label()
            )));
        }

        Ok(ValidDraft {
            kind,
            username,
            password,
            customer_name,
            customer_phone,
        })
    }

    /// Validate, price, open a payment intent and persist a pending order.
    pub async fn create_order(&self, draft: OrderDraft) -> Result<OrderCreated, OrderError> {
        let valid = self.validate(&draft).await?;
        let amount = self.pricing.price_for(valid.kind, draft.duration_days);

        let request = TransactionRequest {
            method: draft.payment_method.clone(),
            amount,
            customer_name: valid.customer_name.clone(),
            customer_phone: valid.customer_phone.clone(),
            items: vec![LineItem {
                sku: format!("{}-{}D", valid.kind.label(), draft.duration_days),
                name: format!("{} {} days", valid.kind.label(), draft.duration_days),
                price: amount,
                quantity: 1,
            }],
        };

        let intent = self
            .gateway
            .create_transaction(&request)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    username = %valid.username,
                    kind = %valid.kind,
                    error = %e,
                    "Payment intent creation failed"
                );
            })?;

        let sealed = self
            .sealer
            .seal(
                &intent.reference,
                &DraftCredentials {
                    username: valid.username.clone(),
                    password: valid.password,
                },
            )
            .map_err(|e| OrderError::Sealing(e.to_string()))?;

        let order = Order {
            reference: intent.reference.clone(),
            merchant_ref: intent.merchant_ref.clone(),
            amount: intent.amount,
            service_kind: valid.kind,
            duration_days: draft.duration_days,
            status: OrderStatus::Pending,
            payment_method: intent.payment_method.clone(),
            payment_name: intent.payment_name.clone(),
            pay_url: intent.pay_url.clone(),
            checkout_url: intent.checkout_url.clone(),
            expires_at: intent.expires_at,
            origin_channel: draft.origin_channel.clone(),
            customer_name: valid.customer_name,
            customer_phone: valid.customer_phone,
            provisioning_payload: sealed,
            created_at: Utc::now(),
            paid_at: None,
        };
        self.db.insert_order(&order).await.inspect_err(|e| {
            tracing::error!(
                reference = %order.reference,
                error = %e,
                "Payment intent opened but the order could not be stored"
            );
        })?;

        tracing::info!(
            reference = %order.reference,
            merchant_ref = %order.merchant_ref,
            kind = %order.service_kind,
            amount = order.amount,
            "Order created"
        );

        Ok(OrderCreated {
            reference: order.reference,
            merchant_ref: order.merchant_ref,
            service_type: order.service_kind,
            duration_days: order.duration_days,
            amount: order.amount,
            payment_method: order.payment_method,
            payment_name: order.payment_name,
            pay_url: order.pay_url,
            checkout_url: order.checkout_url,
            expires_at: order.expires_at,
        })
    }

    /// Apply a gateway callback. Safe to call any number of times.
    pub async fn handle_callback(
        &self,
        envelope: &CallbackEnvelope,
    ) -> Result<CallbackOutcome, OrderError> {
        if !self.gateway.validate_callback(envelope) {
            tracing::warn!("Rejected payment callback with invalid signature");
            return Err(OrderError::SignatureInvalid);
        }
        let payload = CallbackPayload::parse(&envelope.body)?;
        self.apply_status(payload.reference, payload.status).await
    }

    /// Move a pending order to the status the gateway reported.
    async fn apply_status(
        &self,
        reference: String,
        reported: CallbackStatus,
    ) -> Result<CallbackOutcome, OrderError> {
        let _guard = self.locks.lock(&reference).await;
        let order = self.load(&reference).await?;

        if order.status.is_terminal() {
            tracing::info!(
                reference = %reference,
                status = %order.status,
                "Status report for already-final order ignored"
            );
            return Ok(CallbackOutcome::AlreadyFinal {
                reference,
                status: order.status,
            });
        }

        let target = match reported {
            CallbackStatus::Paid => OrderStatus::Paid,
            CallbackStatus::Failed => OrderStatus::Failed,
            CallbackStatus::Expired => OrderStatus::Expired,
            CallbackStatus::Other(status) => {
                tracing::warn!(
                    reference = %reference,
                    status = %status,
                    "Reported status not handled; order left pending"
                );
                return Ok(CallbackOutcome::Ignored { reference, status });
            }
        };

        let paid_at = (target == OrderStatus::Paid).then(Utc::now);
        if !self
            .db
            .transition_order(&reference, target, paid_at)
            .await?
        {
            let status = self
                .db
                .get_order(&reference)
                .await?
                .map(|o| o.status)
                .unwrap_or(target);
            return Ok(CallbackOutcome::AlreadyFinal { reference, status });
        }
        tracing::info!(reference = %reference, status = %target, "Order transitioned");

        if target == OrderStatus::Paid {
            return Ok(self.fulfil(&order).await);
        }

        self.notify(
            &order,
            Notification::PaymentNotCompleted {
                reference: reference.clone(),
                status: target,
            },
        )
        .await;
        Ok(CallbackOutcome::Closed {
            reference,
            status: target,
        })
    }

    /// Provision the account for a freshly paid order and tell the buyer.
    async fn fulfil(&self, order: &Order) -> CallbackOutcome {
        match self.provision_order(order).await {
            Ok(account) => {
                let descriptor = self.provisioning.render_descriptor(&account);
                self.notify(
                    order,
                    Notification::AccountReady {
                        reference: order.reference.clone(),
                        account_id: account.id,
                        descriptor,
                    },
                )
                .await;
                CallbackOutcome::Provisioned {
                    reference: order.reference.clone(),
                    account_id: account.id,
                }
            }
            Err(err) => {
                tracing::error!(
                    reference = %order.reference,
                    kind = %order.service_kind,
                    error = %err,
                    "Provisioning failed for paid order"
                );
                self.notify(
                    order,
                    Notification::ProvisioningFailed {
                        reference: order.reference.clone(),
                    },
                )
                .await;
                CallbackOutcome::ProvisioningFailed {
                    reference: order.reference.clone(),
                    reason: err.to_string(),
                }
            }
        }
    }

    async fn provision_order(&self, order: &Order) -> Result<Account, OrderError> {
        let draft = self
            .sealer
            .open(&order.reference, &order.provisioning_payload)
            .map_err(|_| OrderError::PayloadUnreadable {
                reference: order.reference.clone(),
            })?;

        let provisioned = self
            .provisioning
            .create(
                order.service_kind,
                &draft.username,
                draft.password.as_deref(),
                order.duration_days,
            )
            .await?;

        let now = Utc::now();
        let account = Account {
            id: Uuid::new_v4(),
            username: provisioned.username,
            kind: provisioned.kind,
            secret: provisioned.secret,
            expires_at: provisioned.expires_at,
            status: AccountStatus::Active,
            order_reference: Some(order.reference.clone()),
            origin_channel: order.origin_channel.clone(),
            created_at: now,
            updated_at: now,
        };

        if let Err(err) = self.db.insert_account(&account).await {
            // Without a row nothing would ever expire this account.
            if let Err(cleanup) = self
                .provisioning
                .destroy(account.kind, &account.username)
                .await
            {
                tracing::error!(
                    reference = %order.reference,
                    username = %account.username,
                    error = %cleanup,
                    "Failed to roll back unrecorded account"
                );
            }
            return Err(err.into());
        }

        tracing::info!(
            reference = %order.reference,
            username = %account.username,
            kind = %account.kind,
            account_id = %account.id,
            "Account provisioned for order"
        );
        Ok(account)
    }

    async fn notify(&self, order: &Order, notification: Notification) {
        let Some(channel) = order.origin_channel.as_deref() else {
            return;
        };
        if let Err(err) = self.notifier.notify(channel, &notification).await {
            tracing::warn!(
                reference = %order.reference,
                channel = %channel,
                error = %err,
                "Failed to deliver notification"
            );
        }
    }

    /// Current status of an order.
    ///
    /// A pending order is checked against the gateway first, so a final
    /// status is applied even when its callback never arrived.
    pub async fn get_status(&self, reference: &str) -> Result<OrderStatusView, OrderError> {
        let mut order = self.load(reference).await?;
        if order.status == OrderStatus::Pending && self.sync_with_gateway(reference).await? {
            order = self.load(reference).await?;
        }
        let account_id = self.db.account_for_order(reference).await?.map(|a| a.id);
        Ok(OrderStatusView::from_order(&order, account_id))
    }

    /// Returns `true` when the gateway reported a final status that was applied.
    async fn sync_with_gateway(&self, reference: &str) -> Result<bool, OrderError> {
        let detail = match self.gateway.transaction_detail(reference).await {
            Ok(detail) => detail,
            Err(err) => {
                tracing::warn!(
                    reference = %reference,
                    error = %err,
                    "Transaction lookup failed; reporting stored status"
                );
                return Ok(false);
            }
        };
        if let CallbackStatus::Other(_) = detail.status {
            return Ok(false);
        }
        tracing::info!(
            reference = %reference,
            status = ?detail.status,
            "Applying gateway status for order without callback"
        );
        self.apply_status(reference.to_string(), detail.status).await?;
        Ok(true)
    }

    async fn load(&self, reference: &str) -> Result<Order, OrderError> {
        self.db
            .get_order(reference)
            .await?
            .ok_or_else(|| OrderError::NotFound {
                reference: reference.to_string(),
            })
    }

    pub async fn reconciliation_report(&self) -> Result<Vec<ReconciliationEntry>, OrderError> {
        let orders = self.db.paid_orders_without_account().await?;
        Ok(orders.iter().map(ReconciliationEntry::from).collect())
    }

    /// Retry fulfilment for a paid order that has no account.
    pub async fn retry_provisioning(&self, reference: &str) -> Result<CallbackOutcome, OrderError> {
        let _guard = self.locks.lock(reference).await;
        let order = self.load(reference).await?;
        if order.status != OrderStatus::Paid {
            return Err(OrderError::Validation(format!(
                "Order {reference} is {}, not paid",
                order.status
            )));
        }
        if self.db.account_for_order(reference).await?.is_some() {
            return Ok(CallbackOutcome::AlreadyFinal {
                reference: reference.to_string(),
                status: order.status,
            });
        }
        Ok(self.fulfil(&order).await)
    }

    pub async fn recent_orders(
        &self,
        origin_channel: &str,
        limit: usize,
    ) -> Result<Vec<OrderStatusView>, OrderError> {
        let orders = self.db.orders_for_channel(origin_channel, limit).await?;
        let mut views = Vec::with_capacity(orders.len());
        for order in &orders {
            let account_id = match order.status {
                OrderStatus::Paid => self
                    .db
                    .account_for_order(&order.reference)
                    .await?
                    .map(|a| a.id),
                _ => None,
            };
            views.push(OrderStatusView::from_order(order, account_id));
        }
        Ok(views)
    }
}

#[async_trait]
impl OrderPlacer for OrderService {
    async fn place_order(&self, draft: OrderDraft) -> Result<OrderCreated, OrderError> {
        self.create_order(draft).await
    }

    async fn recent_orders(
        &self,
        origin_channel: &str,
        limit: usize,
    ) -> Result<Vec<OrderStatusView>, OrderError> {
        OrderService::recent_orders(self, origin_channel, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::RecordingNotifier;
    use crate::db::{AccountStore, InMemoryDatabase, OrderStore};
    use crate::error::GatewayError;
    use crate::payments::{ScriptedGateway, signature};
    use crate::provisioning::xray;
    use crate::provisioning::{InMemoryConfigResource, NoopHostBackend, ServiceConfigResource};
    use secrecy::SecretString;

    const GATEWAY_KEY: &str = "tripay-private-key";

    struct Harness {
        service: Arc<OrderService>,
        db: InMemoryDatabase,
        gateway: Arc<ScriptedGateway>,
        host: Arc<NoopHostBackend>,
        xray: Arc<InMemoryConfigResource>,
        notifier: Arc<RecordingNotifier>,
    }

    fn harness() -> Harness {
        let db = InMemoryDatabase::new();
        let gateway = Arc::new(ScriptedGateway::new(GATEWAY_KEY).with_references(["R1", "R2"]));
        let host = Arc::new(NoopHostBackend::new());
        let xray = Arc::new(InMemoryConfigResource::with_default_inbounds());
        let notifier = Arc::new(RecordingNotifier::new());
        let provisioning = Arc::new(ProvisioningService::new(
            host.clone(),
            xray.clone(),
            "vpn.example.com",
        ));
        let sealer = PayloadSealer::new(&SecretString::from(
            "0123456789abcdef0123456789abcdef".to_string(),
        ))
        .unwrap();
        let service = Arc::new(OrderService::new(
            Arc::new(db.clone()),
            gateway.clone(),
            provisioning,
            sealer,
            notifier.clone(),
            PricingConfig::fixed(15_000),
        ));
        Harness {
            service,
            db,
            gateway,
            host,
            xray,
            notifier,
        }
    }

    fn draft(kind: &str, username: &str) -> OrderDraft {
        OrderDraft {
            service_type: kind.to_string(),
            username: username.to_string(),
            password: (kind == "ssh").then(|| "hunter2".to_string()),
            customer_name: "Budi".to_string(),
            customer_phone: Some("081234567890".to_string()),
            payment_method: "QRIS".to_string(),
            duration_days: 30,
            origin_channel: Some("telegram:42".to_string()),
        }
    }

    async fn vless_clients(h: &Harness) -> Vec<serde_json::Value> {
        let doc = h.xray.read().await.unwrap();
        xray::clients(&doc, ServiceKind::Vless).unwrap()
    }

    #[tokio::test]
    async fn vless_order_paid_once_provisions_and_notifies() {
        let h = harness();
        let created = h.service.create_order(draft("vless", "alice")).await.unwrap();
        assert_eq!(created.reference, "R1");
        assert_eq!(created.amount, 15_000);

        let outcome = h
            .service
            .handle_callback(&h.gateway.signed_callback("R1", "PAID"))
            .await
            .unwrap();
        assert!(matches!(outcome, CallbackOutcome::Provisioned { .. }));

        let accounts = h.db.list_accounts(None, None).await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].username, "alice");
        assert_eq!(accounts[0].order_reference.as_deref(), Some("R1"));

        let clients = vless_clients(&h).await;
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0]["email"], "alice");

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "telegram:42");
        assert!(sent[0].1.to_message().contains("vless://"));
    }

    #[tokio::test]
    async fn duplicate_paid_callback_has_no_side_effects() {
        let h = harness();
        h.service.create_order(draft("vless", "alice")).await.unwrap();
        let callback = h.gateway.signed_callback("R1", "PAID");

        h.service.handle_callback(&callback).await.unwrap();
        let second = h.service.handle_callback(&callback).await.unwrap();

        assert_eq!(
            second,
            CallbackOutcome::AlreadyFinal {
                reference: "R1".to_string(),
                status: OrderStatus::Paid,
            }
        );
        assert_eq!(h.db.list_accounts(None, None).await.unwrap().len(), 1);
        assert_eq!(h.xray.mutation_count(), 1);
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_paid_callbacks_provision_exactly_once() {
        let h = harness();
        h.service.create_order(draft("trojan", "bob")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let service = h.service.clone();
            let callback = h.gateway.signed_callback("R1", "PAID");
            handles.push(tokio::spawn(async move {
                service.handle_callback(&callback).await
            }));
        }
        let mut provisioned = 0;
        for handle in handles {
            if let CallbackOutcome::Provisioned { .. } = handle.await.unwrap().unwrap() {
                provisioned += 1;
            }
        }

        assert_eq!(provisioned, 1);
        assert_eq!(h.db.list_accounts(None, None).await.unwrap().len(), 1);
        assert_eq!(h.xray.mutation_count(), 1);
    }

    #[tokio::test]
    async fn tampered_signature_changes_nothing() {
        let h = harness();
        h.service.create_order(draft("vless", "alice")).await.unwrap();

        let mut callback = h.gateway.signed_callback("R1", "PAID");
        callback.header_signature = Some("0".repeat(64));

        let err = h.service.handle_callback(&callback).await.unwrap_err();
        assert!(matches!(err, OrderError::SignatureInvalid));
        let order = h.db.get_order("R1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(h.xray.mutation_count(), 0);
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn failed_before_paid_is_final() {
        let h = harness();
        h.service.create_order(draft("vless", "alice")).await.unwrap();

        let failed = h
            .service
            .handle_callback(&h.gateway.signed_callback("R1", "FAILED"))
            .await
            .unwrap();
        assert_eq!(
            failed,
            CallbackOutcome::Closed {
                reference: "R1".to_string(),
                status: OrderStatus::Failed,
            }
        );
        let paid = h
            .service
            .handle_callback(&h.gateway.signed_callback("R1", "PAID"))
            .await
            .unwrap();
        assert!(matches!(paid, CallbackOutcome::AlreadyFinal { .. }));

        let order = h.db.get_order("R1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Failed);
        assert!(h.db.list_accounts(None, None).await.unwrap().is_empty());
        assert_eq!(h.xray.mutation_count(), 0);
        assert!(matches!(
            h.notifier.sent()[0].1,
            Notification::PaymentNotCompleted { .. }
        ));
    }

    #[tokio::test]
    async fn unknown_reference_and_unhandled_status() {
        let h = harness();
        let err = h
            .service
            .handle_callback(&h.gateway.signed_callback("NOPE", "PAID"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::NotFound { .. }));

        h.service.create_order(draft("vless", "alice")).await.unwrap();
        let outcome = h
            .service
            .handle_callback(&h.gateway.signed_callback("R1", "UNPAID"))
            .await
            .unwrap();
        assert!(matches!(outcome, CallbackOutcome::Ignored { .. }));
        let order = h.db.get_order("R1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn ssh_order_creates_host_identity_with_sealed_password() {
        let h = harness();
        h.service.create_order(draft("ssh", "carol")).await.unwrap();

        let stored = h.db.get_order("R1").await.unwrap().unwrap();
        assert!(!stored.provisioning_payload.contains("hunter2"));
        assert!(!stored.merchant_ref.contains("carol"));

        h.service
            .handle_callback(&h.gateway.signed_callback("R1", "PAID"))
            .await
            .unwrap();
        assert!(h.host.exists("carol"));
        let account = h.db.account_for_order("R1").await.unwrap().unwrap();
        assert_eq!(account.secret, "hunter2");
    }

    #[tokio::test]
    async fn provisioning_failure_shows_up_in_reconciliation() {
        let h = harness();
        h.service.create_order(draft("ssh", "dave")).await.unwrap();
        h.host.fail_creates(true);

        let outcome = h
            .service
            .handle_callback(&h.gateway.signed_callback("R1", "PAID"))
            .await
            .unwrap();
        assert!(matches!(outcome, CallbackOutcome::ProvisioningFailed { .. }));

        let report = h.service.reconciliation_report().await.unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].reference, "R1");
        assert!(matches!(
            h.notifier.sent()[0].1,
            Notification::ProvisioningFailed { .. }
        ));

        h.host.fail_creates(false);
        let retried = h.service.retry_provisioning("R1").await.unwrap();
        assert!(matches!(retried, CallbackOutcome::Provisioned { .. }));
        assert!(h.service.reconciliation_report().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn validation_rejects_bad_drafts_before_the_gateway() {
        let h = harness();

        let mut bad_kind = draft("vless", "alice");
        bad_kind.service_type = "wireguard".to_string();
        let mut no_password = draft("ssh", "alice");
        no_password.password = None;
        let mut bad_user = draft("vless", "ab cd");
        bad_user.username = "ab cd".to_string();
        let mut bad_phone = draft("vless", "alice");
        bad_phone.customer_phone = Some("12345".to_string());
        let mut bad_days = draft("vless", "alice");
        bad_days.duration_days = 0;
        let mut bad_method = draft("vless", "alice");
        bad_method.payment_method = "PAYPAL".to_string();
        let mut no_name = draft("vless", "alice");
        no_name.customer_name = "  ".to_string();

        for d in [
            bad_kind,
            no_password,
            bad_user,
            bad_phone,
            bad_days,
            bad_method,
            no_name,
        ] {
            let err = h.service.create_order(d).await.unwrap_err();
            assert!(matches!(err, OrderError::Validation(_)), "{err}");
        }
        assert!(h.gateway.requests().is_empty());
    }

    #[tokio::test]
    async fn gateway_failure_persists_nothing() {
        let h = harness();
        h.gateway.fail_next(GatewayError::Timeout {
            timeout: std::time::Duration::from_secs(15),
        });
        let err = h
            .service
            .create_order(draft("vless", "alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::Gateway(GatewayError::Timeout { .. })));
        assert!(h.db.get_order("R1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn active_username_cannot_be_bought_twice() {
        let h = harness();
        h.service.create_order(draft("vless", "alice")).await.unwrap();
        h.service
            .handle_callback(&h.gateway.signed_callback("R1", "PAID"))
            .await
            .unwrap();

        let err = h
            .service
            .create_order(draft("vless", "alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)));
        // Other kinds are independent.
        h.service.create_order(draft("vmess", "alice")).await.unwrap();
    }

    #[tokio::test]
    async fn status_view_and_recent_orders() {
        let h = harness();
        h.service.create_order(draft("vless", "alice")).await.unwrap();
        h.service.create_order(draft("vmess", "alice")).await.unwrap();
        h.service
            .handle_callback(&h.gateway.signed_callback("R1", "PAID"))
            .await
            .unwrap();

        let view = h.service.get_status("R1").await.unwrap();
        assert_eq!(view.status, OrderStatus::Paid);
        assert!(view.provisioned);
        assert!(view.paid_at.is_some());

        let recent = h.service.recent_orders("telegram:42", 5).await.unwrap();
        assert_eq!(recent.len(), 2);

        assert!(matches!(
            h.service.get_status("missing").await,
            Err(OrderError::NotFound { .. })
        ));
    }

    fn channel(code: &str, active: bool) -> PaymentChannel {
        PaymentChannel {
            code: code.to_string(),
            name: code.to_string(),
            group: None,
            active,
        }
    }

    #[tokio::test]
    async fn expired_callback_closes_the_order() {
        let h = harness();
        h.service.create_order(draft("vless", "alice")).await.unwrap();

        let outcome = h
            .service
            .handle_callback(&h.gateway.signed_callback("R1", "EXPIRED"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            CallbackOutcome::Closed {
                reference: "R1".to_string(),
                status: OrderStatus::Expired,
            }
        );
        let order = h.db.get_order("R1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Expired);
        assert!(h.db.list_accounts(None, None).await.unwrap().is_empty());
        assert_eq!(
            h.notifier.sent()[0].1,
            Notification::PaymentNotCompleted {
                reference: "R1".to_string(),
                status: OrderStatus::Expired,
            }
        );
    }

    #[tokio::test]
    async fn signed_malformed_callback_is_rejected() {
        let h = harness();
        h.service.create_order(draft("vless", "alice")).await.unwrap();

        for body in [
            serde_json::json!({"status": "PAID"}).to_string(),
            "not json".to_string(),
        ] {
            let sig = signature::sign_callback_body(GATEWAY_KEY, body.as_bytes());
            let envelope = CallbackEnvelope::new(body.into_bytes(), Some(sig));
            let err = h.service.handle_callback(&envelope).await.unwrap_err();
            assert!(matches!(err, OrderError::MalformedCallback(_)));
            assert_eq!(err.to_error_payload().code, "validation.malformed_callback");
        }

        let order = h.db.get_order("R1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(h.xray.mutation_count(), 0);
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn inactive_gateway_channel_is_rejected() {
        let h = harness();
        h.gateway
            .set_channels(vec![channel("QRIS", false), channel("BRIVA", true)]);

        let err = h
            .service
            .create_order(draft("vless", "alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)));
        assert!(h.gateway.requests().is_empty());

        let mut order = draft("vless", "alice");
        order.payment_method = "BRIVA".to_string();
        h.service.create_order(order).await.unwrap();

        // One channel fetch serves both orders.
        assert_eq!(h.gateway.channel_requests(), 1);
        let listed = h.service.payment_channels().await;
        assert_eq!(listed, vec![channel("BRIVA", true)]);
    }

    #[tokio::test]
    async fn pending_status_applies_a_paid_transaction() {
        let h = harness();
        h.service.create_order(draft("vless", "alice")).await.unwrap();
        h.gateway.set_transaction_status("R1", "PAID");

        let view = h.service.get_status("R1").await.unwrap();
        assert_eq!(view.status, OrderStatus::Paid);
        assert!(view.provisioned);
        assert!(view.account_id.is_some());
        assert_eq!(vless_clients(&h).await.len(), 1);
        assert_eq!(h.notifier.sent().len(), 1);

        // A terminal order is not looked up again.
        h.service.get_status("R1").await.unwrap();
        assert_eq!(h.gateway.detail_requests(), 1);

        // A late callback finds it already final.
        let late = h
            .service
            .handle_callback(&h.gateway.signed_callback("R1", "PAID"))
            .await
            .unwrap();
        assert!(matches!(late, CallbackOutcome::AlreadyFinal { .. }));
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn unpaid_or_unreachable_lookup_keeps_stored_status() {
        let h = harness();
        h.service.create_order(draft("vless", "alice")).await.unwrap();

        let view = h.service.get_status("R1").await.unwrap();
        assert_eq!(view.status, OrderStatus::Pending);

        h.gateway.set_transaction_status("R1", "PAID");
        h.gateway.fail_lookups(true);
        let view = h.service.get_status("R1").await.unwrap();
        assert_eq!(view.status, OrderStatus::Pending);
        assert!(!view.provisioned);
        assert_eq!(h.xray.mutation_count(), 0);
        assert_eq!(h.gateway.detail_requests(), 2);
    }
}
