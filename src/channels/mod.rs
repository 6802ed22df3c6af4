//! Outbound delivery to the channel an order or account came from.
//!
//! Channel addresses are `<transport>:<id>`, e.g. `telegram:12345`.

pub mod markdown;
pub mod telegram;
pub mod web;

use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::ChannelError;
use crate::model::{OrderStatus, ServiceKind};
use crate::provisioning::ConnectionDescriptor;

pub use self::telegram::TelegramNotifier;

/// Buyer-facing events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    AccountReady {
        reference: String,
        account_id: Uuid,
        descriptor: ConnectionDescriptor,
    },
    PaymentNotCompleted {
        reference: String,
        status: OrderStatus,
    },
    ProvisioningFailed {
        reference: String,
    },
    AccountExpired {
        username: String,
        kind: ServiceKind,
    },
}

impl Notification {
    /// Markdown text sent to the buyer.
    pub fn to_message(&self) -> String {
        match self {
            Self::AccountReady {
                reference,
                descriptor,
                ..
            } => format!(
                "✅ Payment {} received.\n\n{}",
                markdown::code(reference),
                descriptor.to_message()
            ),
            Self::PaymentNotCompleted { reference, status } => format!(
                "❌ Payment {} was not completed (status: {status}). \
                 You can start a new order at any time.",
                markdown::code(reference)
            ),
            Self::ProvisioningFailed { reference } => format!(
                "⚠️ Payment {} was received but your account could not be \
                 created. Please contact support with this reference.",
                markdown::code(reference)
            ),
            Self::AccountExpired { username, kind } => format!(
                "Your {} account {} has expired.",
                kind.label(),
                markdown::code(username)
            ),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        origin_channel: &str,
        notification: &Notification,
    ) -> Result<(), ChannelError>;
}

/// Used when no outbound transport is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        origin_channel: &str,
        notification: &Notification,
    ) -> Result<(), ChannelError> {
        let kind = match notification {
            Notification::AccountReady { .. } => "account_ready",
            Notification::PaymentNotCompleted { .. } => "payment_not_completed",
            Notification::ProvisioningFailed { .. } => "provisioning_failed",
            Notification::AccountExpired { .. } => "account_expired",
        };
        tracing::info!(channel = %origin_channel, notification = kind, "Notification not delivered: no transport configured");
        Ok(())
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, Notification)>>,
    fail: Mutex<bool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, Notification)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Record, then report a delivery failure.
    pub fn set_failing(&self, fail: bool) {
        if let Ok(mut flag) = self.fail.lock() {
            *flag = fail;
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        origin_channel: &str,
        notification: &Notification,
    ) -> Result<(), ChannelError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((origin_channel.to_string(), notification.clone()));
        }
        if self.fail.lock().map(|f| *f).unwrap_or(false) {
            return Err(ChannelError::SendFailed {
                name: "recording".to_string(),
                reason: "simulated failure".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_messages_mention_the_reference() {
        let failed = Notification::PaymentNotCompleted {
            reference: "R9".to_string(),
            status: OrderStatus::Expired,
        };
        assert!(failed.to_message().contains("R9"));
        assert!(failed.to_message().contains("expired"));

        let support = Notification::ProvisioningFailed {
            reference: "R9".to_string(),
        };
        assert!(support.to_message().contains("contact support"));
    }

    #[test]
    fn account_messages_are_well_formed_markdown() {
        let mut account = crate::db::memory::fixtures::account("budi_x", ServiceKind::Ssh);
        account.secret = "s`cr_t".to_string();
        let ready = Notification::AccountReady {
            reference: "T0001_R1".to_string(),
            account_id: account.id,
            descriptor: ConnectionDescriptor::render(&account, "vpn.example.com"),
        };
        assert!(markdown::is_well_formed(&ready.to_message()));
        assert!(ready.to_message().contains("`T0001_R1`"));

        let expired = Notification::AccountExpired {
            username: "budi_x".to_string(),
            kind: ServiceKind::Vless,
        };
        assert!(markdown::is_well_formed(&expired.to_message()));
    }

    #[tokio::test]
    async fn recording_notifier_records_even_when_failing() {
        let notifier = RecordingNotifier::new();
        notifier.set_failing(true);
        let result = notifier
            .notify(
                "telegram:1",
                &Notification::ProvisioningFailed {
                    reference: "R1".to_string(),
                },
            )
            .await;
        assert!(result.is_err());
        assert_eq!(notifier.sent().len(), 1);
    }
}
