//! Service graph assembled from [`Config`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::accounts::AccountManager;
use crate::channels::telegram::TelegramBot;
use crate::channels::web::{AppState, RateLimiter};
use crate::channels::{LogNotifier, Notifier, TelegramNotifier};
use crate::config::Config;
use crate::conversation::ConversationMachine;
use crate::db;
use crate::error::{ConfigError, Error};
use crate::orders::{OrderPlacer, OrderService};
use crate::payments::PaymentGateway;
use crate::payments::tripay::TripayClient;
use crate::provisioning::ProvisioningService;
use crate::secrets::PayloadSealer;

/// Every long-lived service the binary runs.
pub struct Panel {
    pub orders: Arc<OrderService>,
    pub accounts: Arc<AccountManager>,
    pub conversation: Arc<ConversationMachine>,
    pub telegram: Option<Arc<TelegramBot>>,
    config: Config,
}

impl Panel {
    /// Open storage and wire services. Fails before anything is served.
    pub async fn from_config(config: Config) -> Result<Self, Error> {
        let db = db::connect_from_config(&config.database).await?;
        let provisioning = Arc::new(ProvisioningService::from_config(&config.provisioning));
        let gateway: Arc<dyn PaymentGateway> = Arc::new(TripayClient::new(&config.tripay)?);
        let sealer = PayloadSealer::new(&config.security.payload_key).map_err(|e| {
            ConfigError::InvalidValue {
                key: "PAYLOAD_ENCRYPTION_KEY".to_string(),
                message: e.to_string(),
            }
        })?;

        let telegram_notifier = TelegramNotifier::from_config(&config.telegram)?.map(Arc::new);
        let notifier: Arc<dyn Notifier> = match &telegram_notifier {
            Some(telegram) => telegram.clone(),
            None => {
                tracing::info!("No Telegram bot token configured; notifications go to the log");
                Arc::new(LogNotifier)
            }
        };

        let orders = Arc::new(OrderService::new(
            db.clone(),
            gateway,
            provisioning.clone(),
            sealer,
            notifier.clone(),
            config.pricing.clone(),
        )
        .with_channel_cache_ttl(config.tripay.channel_cache_ttl));
        let accounts = Arc::new(AccountManager::new(db.clone(), provisioning, notifier));
        let placer: Arc<dyn OrderPlacer> = orders.clone();
        let conversation = Arc::new(ConversationMachine::new(placer, &config.conversation));
        let telegram = telegram_notifier.map(|notifier| {
            Arc::new(
                TelegramBot::new(notifier, conversation.clone(), accounts.clone(), db)
                    .with_admin_contact(config.telegram.admin_contact.clone()),
            )
        });

        Ok(Self {
            orders,
            accounts,
            conversation,
            telegram,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn app_state(&self) -> Arc<AppState> {
        Arc::new(AppState {
            orders: self.orders.clone(),
            accounts: self.accounts.clone(),
            telegram: self.telegram.clone(),
            telegram_secret: self.config.telegram.webhook_secret.clone(),
        })
    }

    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(
            u64::from(self.config.http.rate_limit),
            self.config.http.rate_window,
        ))
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = format!("{}:{}", self.config.http.host, self.config.http.port);
        raw.parse().map_err(|e| ConfigError::InvalidValue {
            key: "HTTP_HOST".to_string(),
            message: format!("'{raw}' is not a socket address: {e}"),
        })
    }

    /// Background loops: session pruning and the expiry sweep.
    pub fn spawn_maintenance(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let conversation = self.conversation.clone();
        let prune_every = self
            .config
            .conversation
            .session_ttl
            .max(Duration::from_secs(60));
        let pruner = tokio::spawn(async move {
            let mut tick = tokio::time::interval(prune_every);
            tick.tick().await;
            loop {
                tick.tick().await;
                let removed = conversation.prune_sessions();
                if removed > 0 {
                    tracing::debug!(removed, "Pruned idle conversation sessions");
                }
            }
        });

        let accounts = self.accounts.clone();
        let sweep_every = self.config.provisioning.sweep_interval;
        let sweeper = tokio::spawn(async move {
            if sweep_every.is_zero() {
                tracing::info!("Expiry sweep disabled");
                return;
            }
            let mut tick = tokio::time::interval(sweep_every);
            loop {
                tick.tick().await;
                if let Err(err) = accounts.sweep_expired(chrono::Utc::now()).await {
                    tracing::error!(error = %err, "Expiry sweep failed");
                }
            }
        });

        vec![pruner, sweeper]
    }
}
