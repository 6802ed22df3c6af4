//! Cached list of payment channels the gateway accepts.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::payments::{PaymentChannel, PaymentGateway};

pub const DEFAULT_CHANNEL_TTL: Duration = Duration::from_secs(3600);

struct Snapshot {
    fetched_at: Instant,
    channels: Vec<PaymentChannel>,
}

/// Gateway channel list, refreshed at most once per TTL.
///
/// A failed refresh keeps serving the last good list, or the built-in
/// [`PaymentChannel::defaults`] when nothing was ever fetched.
pub struct ChannelCatalog {
    gateway: Arc<dyn PaymentGateway>,
    ttl: Duration,
    snapshot: RwLock<Option<Snapshot>>,
}

impl ChannelCatalog {
    pub fn new(gateway: Arc<dyn PaymentGateway>, ttl: Duration) -> Self {
        Self {
            gateway,
            ttl,
            snapshot: RwLock::new(None),
        }
    }

    pub async fn channels(&self) -> Vec<PaymentChannel> {
        {
            let snapshot = self.snapshot.read().await;
            if let Some(current) = snapshot.as_ref()
                && current.fetched_at.elapsed() < self.ttl
            {
                return current.channels.clone();
            }
        }

        let mut snapshot = self.snapshot.write().await;
        if let Some(current) = snapshot.as_ref()
            && current.fetched_at.elapsed() < self.ttl
        {
            return current.channels.clone();
        }

        match self.gateway.payment_channels().await {
            Ok(channels) => {
                tracing::debug!(count = channels.len(), "Refreshed payment channels");
                *snapshot = Some(Snapshot {
                    fetched_at: Instant::now(),
                    channels: channels.clone(),
                });
                channels
            }
            Err(err) => {
                tracing::warn!(error = %err, "Could not refresh payment channels");
                match snapshot.as_ref() {
                    Some(stale) => stale.channels.clone(),
                    None => PaymentChannel::defaults(),
                }
            }
        }
    }

    /// `code` names a channel that is currently active.
    pub async fn is_available(&self, code: &str) -> bool {
        self.channels()
            .await
            .iter()
            .any(|c| c.active && c.code == code)
    }
}
