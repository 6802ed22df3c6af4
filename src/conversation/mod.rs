//! Step-by-step collection of an order draft from a chat.
//!
//! `(no session) -> awaiting_username -> [awaiting_password, ssh only] ->
//! awaiting_name -> awaiting_phone -> awaiting_payment_method -> order`.
//! Inputs for one session are processed one at a time; sessions are
//! independent of each other.

mod session;

use std::sync::Arc;

use crate::channels::markdown;
use crate::config::ConversationConfig;
use crate::error::ConversationError;
use crate::model::ServiceKind;
use crate::orders::validation;
use crate::orders::{OrderCreated, OrderDraft, OrderPlacer};
use crate::payments::PAYMENT_METHODS;

pub use self::session::{Session, SessionStore, Step};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationInput {
    SelectService(ServiceKind),
    Text(String),
    SelectPaymentMethod(String),
    Restart,
}

/// What the channel should show next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    AskUsername { kind: ServiceKind },
    AskPassword,
    AskName,
    AskPhone,
    ChoosePaymentMethod,
    OrderPlaced(OrderCreated),
    /// The order could not be created; the session is gone.
    OrderFailed { message: String },
    Restarted,
    /// Input arrived with no session in progress.
    Ignored,
}

impl Reply {
    /// Markdown text for chat transports.
    pub fn to_message(&self) -> String {
        match self {
            Self::AskUsername { kind } => format!(
                "You chose *{}*.\nSend the username you want (letters, digits and `_`).",
                kind.label()
            ),
            Self::AskPassword => "Send the password for your SSH account.".to_string(),
            Self::AskName => "Send your name.".to_string(),
            Self::AskPhone => "Send your phone number (e.g. 081234567890).".to_string(),
            Self::ChoosePaymentMethod => {
                let methods: Vec<String> = PAYMENT_METHODS
                    .iter()
                    .map(|(_, name)| markdown::escape(name))
                    .collect();
                format!("Choose a payment method:\n{}", methods.join("\n"))
            }
            Self::OrderPlaced(order) => {
                let link = order
                    .checkout_url
                    .as_deref()
                    .or(order.pay_url.as_deref())
                    .unwrap_or("-");
                let mut text = format!(
                    "🧾 Order {}\n{} {} days\nAmount: {}\nPay here: {}",
                    markdown::code(&order.reference),
                    order.service_type.label(),
                    order.duration_days,
                    order.amount,
                    markdown::escape(link)
                );
                if let Some(expires_at) = order.expires_at {
                    text.push_str(&format!(
                        "\nPay before: {}",
                        expires_at.format("%Y-%m-%d %H:%M UTC")
                    ));
                }
                text
            }
            Self::OrderFailed { message } => format!("❌ {}", markdown::escape(message)),
            Self::Restarted => "Order cancelled. Choose a service to start again.".to_string(),
            Self::Ignored => "Choose a service to start an order.".to_string(),
        }
    }
}

pub struct ConversationMachine {
    sessions: SessionStore,
    placer: Arc<dyn OrderPlacer>,
    default_duration_days: u32,
}

impl ConversationMachine {
    pub fn new(placer: Arc<dyn OrderPlacer>, config: &ConversationConfig) -> Self {
        Self {
            sessions: SessionStore::new(config.session_ttl),
            placer,
            default_duration_days: config.default_duration_days,
        }
    }

    /// Process one input. `origin_channel` is recorded on the order for notifications.
    ///
    /// A rejected input leaves the session where it was.
    pub async fn handle(
        &self,
        session_id: &str,
        origin_channel: &str,
        input: ConversationInput,
    ) -> Result<Reply, ConversationError> {
        let mut guard = self.sessions.acquire(session_id).await;

        match input {
            ConversationInput::Restart => {
                guard.clear();
                Ok(Reply::Restarted)
            }
            ConversationInput::SelectService(kind) => {
                guard.replace(Session::new(kind));
                tracing::debug!(session_id = %session_id, kind = %kind, "Conversation started");
                Ok(Reply::AskUsername { kind })
            }
            ConversationInput::Text(text) => {
                let Some(session) = guard.current() else {
                    return Ok(Reply::Ignored);
                };
                let reply = apply_text(session, text.trim())?;
                session.touch();
                Ok(reply)
            }
            ConversationInput::SelectPaymentMethod(method) => {
                let Some(session) = guard.current() else {
                    return Err(ConversationError::SessionExpired {
                        session_id: session_id.to_string(),
                    });
                };
                if session.step != Step::AwaitingPaymentMethod {
                    return Err(ConversationError::Validation(
                        "Please finish the current step first".to_string(),
                    ));
                }
                validation::check_payment_method(&method).map_err(ConversationError::Validation)?;

                let draft = OrderDraft {
                    service_type: session.kind.map(|k| k.to_string()).unwrap_or_default(),
                    username: session.username.clone().unwrap_or_default(),
                    password: session.password.clone(),
                    customer_name: session.customer_name.clone().unwrap_or_default(),
                    customer_phone: session.customer_phone.clone(),
                    payment_method: method,
                    duration_days: self.default_duration_days,
                    origin_channel: Some(origin_channel.to_string()),
                };
                guard.clear();

                match self.placer.place_order(draft).await {
                    Ok(created) => Ok(Reply::OrderPlaced(created)),
                    Err(err) => {
                        if err.is_client_error() {
                            tracing::debug!(session_id = %session_id, error = %err, "Order rejected");
                        } else {
                            tracing::error!(session_id = %session_id, error = %err, "Order creation failed");
                        }
                        Ok(Reply::OrderFailed {
                            message: err.to_error_payload().message,
                        })
                    }
                }
            }
        }
    }

    pub fn prune_sessions(&self) -> usize {
        self.sessions.prune()
    }

    pub async fn recent_orders(
        &self,
        origin_channel: &str,
        limit: usize,
    ) -> Result<Vec<crate::orders::OrderStatusView>, crate::error::OrderError> {
        self.placer.recent_orders(origin_channel, limit).await
    }
}

fn apply_text(session: &mut Session, text: &str) -> Result<Reply, ConversationError> {
    match session.step {
        Step::AwaitingUsername => {
            validation::check_username(text).map_err(ConversationError::Validation)?;
            session.username = Some(text.to_string());
            if session.kind.is_some_and(ServiceKind::requires_password) {
                session.step = Step::AwaitingPassword;
                Ok(Reply::AskPassword)
            } else {
                session.step = Step::AwaitingName;
                Ok(Reply::AskName)
            }
        }
        Step::AwaitingPassword => {
            validation::check_password(ServiceKind::Ssh, Some(text))
                .map_err(ConversationError::Validation)?;
            session.password = Some(text.to_string());
            session.step = Step::AwaitingName;
            Ok(Reply::AskName)
        }
        Step::AwaitingName => {
            if text.is_empty() {
                return Err(ConversationError::Validation("Name is required".to_string()));
            }
            session.customer_name = Some(text.to_string());
            session.step = Step::AwaitingPhone;
            Ok(Reply::AskPhone)
        }
        Step::AwaitingPhone => {
            if !validation::is_valid_phone(text) {
                return Err(ConversationError::Validation(
                    "Invalid phone number. Use 08xx, 62xx or +62xx followed by 9-12 digits"
                        .to_string(),
                ));
            }
            session.customer_phone = Some(text.to_string());
            session.step = Step::AwaitingPaymentMethod;
            Ok(Reply::ChoosePaymentMethod)
        }
        Step::AwaitingPaymentMethod => Err(ConversationError::Validation(
            "Choose a payment method from the list".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::error::{GatewayError, OrderError};
    use crate::orders::OrderStatusView;

    #[derive(Default)]
    struct FakePlacer {
        drafts: Mutex<Vec<OrderDraft>>,
        fail: bool,
    }

    #[async_trait]
    impl OrderPlacer for FakePlacer {
        async fn place_order(&self, draft: OrderDraft) -> Result<OrderCreated, OrderError> {
            self.drafts.lock().unwrap().push(draft.clone());
            if self.fail {
                return Err(OrderError::Gateway(GatewayError::Unavailable {
                    reason: "down".to_string(),
                }));
            }
            Ok(OrderCreated {
                reference: "R1".to_string(),
                merchant_ref: "INV-1-abcdef".to_string(),
                service_type: draft.service_type.parse().unwrap(),
                duration_days: draft.duration_days,
                amount: 10_000,
                payment_method: draft.payment_method,
                payment_name: None,
                pay_url: None,
                checkout_url: Some("https://pay.example/R1".to_string()),
                expires_at: None,
            })
        }

        async fn recent_orders(
            &self,
            _origin_channel: &str,
            _limit: usize,
        ) -> Result<Vec<OrderStatusView>, OrderError> {
            Ok(Vec::new())
        }
    }

    fn machine(placer: Arc<FakePlacer>, ttl: Duration) -> ConversationMachine {
        ConversationMachine::new(
            placer,
            &ConversationConfig {
                session_ttl: ttl,
                default_duration_days: 30,
            },
        )
    }

    fn text(s: &str) -> ConversationInput {
        ConversationInput::Text(s.to_string())
    }

    #[tokio::test]
    async fn full_vless_flow_hands_draft_to_orders() {
        let placer = Arc::new(FakePlacer::default());
        let m = machine(placer.clone(), Duration::from_secs(60));
        let ch = "telegram:1";

        assert_eq!(
            m.handle("s", ch, ConversationInput::SelectService(ServiceKind::Vless))
                .await
                .unwrap(),
            Reply::AskUsername {
                kind: ServiceKind::Vless
            }
        );
        assert_eq!(m.handle("s", ch, text("ab_cd9")).await.unwrap(), Reply::AskName);
        assert_eq!(m.handle("s", ch, text(" Budi ")).await.unwrap(), Reply::AskPhone);
        assert_eq!(
            m.handle("s", ch, text("081234567890")).await.unwrap(),
            Reply::ChoosePaymentMethod
        );
        let placed = m
            .handle("s", ch, ConversationInput::SelectPaymentMethod("QRIS".into()))
            .await
            .unwrap();
        assert!(matches!(placed, Reply::OrderPlaced(_)));

        let drafts = placer.drafts.lock().unwrap().clone();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].username, "ab_cd9");
        assert_eq!(drafts[0].customer_name, "Budi");
        assert_eq!(drafts[0].duration_days, 30);
        assert_eq!(drafts[0].origin_channel.as_deref(), Some(ch));

        // Session is gone after hand-off.
        assert_eq!(m.handle("s", ch, text("hello")).await.unwrap(), Reply::Ignored);
    }

    #[tokio::test]
    async fn ssh_asks_for_password() {
        let m = machine(Arc::new(FakePlacer::default()), Duration::from_secs(60));
        m.handle("s", "c", ConversationInput::SelectService(ServiceKind::Ssh))
            .await
            .unwrap();
        assert_eq!(m.handle("s", "c", text("alice")).await.unwrap(), Reply::AskPassword);
        assert_eq!(m.handle("s", "c", text("hunter2")).await.unwrap(), Reply::AskName);
    }

    #[tokio::test]
    async fn invalid_username_and_phone_keep_the_step() {
        let m = machine(Arc::new(FakePlacer::default()), Duration::from_secs(60));
        m.handle("s", "c", ConversationInput::SelectService(ServiceKind::Trojan))
            .await
            .unwrap();

        assert!(matches!(
            m.handle("s", "c", text("ab cd")).await,
            Err(ConversationError::Validation(_))
        ));
        assert_eq!(m.handle("s", "c", text("ab_cd9")).await.unwrap(), Reply::AskName);
        m.handle("s", "c", text("Budi")).await.unwrap();

        for bad in ["12345", "08123"] {
            assert!(matches!(
                m.handle("s", "c", text(bad)).await,
                Err(ConversationError::Validation(_))
            ));
        }
        assert_eq!(
            m.handle("s", "c", text("081234567890")).await.unwrap(),
            Reply::ChoosePaymentMethod
        );
    }

    #[tokio::test]
    async fn input_without_session_is_ignored() {
        let m = machine(Arc::new(FakePlacer::default()), Duration::from_secs(60));
        assert_eq!(m.handle("s", "c", text("hi")).await.unwrap(), Reply::Ignored);
    }

    #[tokio::test]
    async fn payment_selection_after_expiry_is_session_expired() {
        let placer = Arc::new(FakePlacer::default());
        let m = machine(placer.clone(), Duration::from_millis(1));
        m.handle("s", "c", ConversationInput::SelectService(ServiceKind::Vless))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = m
            .handle("s", "c", ConversationInput::SelectPaymentMethod("QRIS".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ConversationError::SessionExpired { .. }));
        assert!(placer.drafts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_order_still_clears_session() {
        let placer = Arc::new(FakePlacer {
            fail: true,
            ..Default::default()
        });
        let m = machine(placer, Duration::from_secs(60));
        for input in [
            ConversationInput::SelectService(ServiceKind::Vmess),
            text("carol"),
            text("Carol"),
            text("6281234567890"),
        ] {
            m.handle("s", "c", input).await.unwrap();
        }
        let reply = m
            .handle("s", "c", ConversationInput::SelectPaymentMethod("BRIVA".into()))
            .await
            .unwrap();
        assert!(matches!(reply, Reply::OrderFailed { .. }));
        assert!(matches!(
            m.handle("s", "c", ConversationInput::SelectPaymentMethod("BRIVA".into()))
                .await,
            Err(ConversationError::SessionExpired { .. })
        ));
    }

    #[test]
    fn replies_escape_user_supplied_text() {
        let failed = Reply::OrderFailed {
            message: "Username 'budi_x' already has an active VLESS account".to_string(),
        };
        assert!(markdown::is_well_formed(&failed.to_message()));
        assert!(failed.to_message().contains("budi\\_x"));

        let placed = Reply::OrderPlaced(OrderCreated {
            reference: "T0001_R1".to_string(),
            merchant_ref: "INV-1-abcdef".to_string(),
            service_type: ServiceKind::Vless,
            duration_days: 30,
            amount: 15_000,
            payment_method: "QRIS".to_string(),
            payment_name: None,
            pay_url: None,
            checkout_url: Some("https://pay.example/checkout?ref=T0001_R1".to_string()),
            expires_at: None,
        });
        assert!(markdown::is_well_formed(&placed.to_message()));

        for reply in [
            Reply::AskUsername {
                kind: ServiceKind::Ssh,
            },
            Reply::ChoosePaymentMethod,
        ] {
            assert!(markdown::is_well_formed(&reply.to_message()));
        }
    }

    #[tokio::test]
    async fn restart_destroys_session_and_sessions_are_independent() {
        let m = machine(Arc::new(FakePlacer::default()), Duration::from_secs(60));
        m.handle("a", "c", ConversationInput::SelectService(ServiceKind::Vless))
            .await
            .unwrap();
        m.handle("b", "c", ConversationInput::SelectService(ServiceKind::Ssh))
            .await
            .unwrap();

        assert_eq!(
            m.handle("a", "c", ConversationInput::Restart).await.unwrap(),
            Reply::Restarted
        );
        assert_eq!(m.handle("a", "c", text("alice")).await.unwrap(), Reply::Ignored);
        assert_eq!(m.handle("b", "c", text("bob")).await.unwrap(), Reply::AskPassword);
    }
}
