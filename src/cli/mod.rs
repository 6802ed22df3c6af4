//! Command-line interface.

mod doctor;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::app::Panel;
use crate::channels::web;
use crate::config::Config;

pub use self::doctor::run_doctor;

#[derive(Parser, Debug)]
#[command(name = "vpn-panel", version, about = "Sell and provision SSH and Xray accounts")]
pub struct Cli {
    /// Extra env file, applied before `./.env` and `~/.vpn-panel/.env`.
    #[arg(long, global = true, value_name = "PATH")]
    pub config_env: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Serve the HTTP API and Telegram webhook (default).
    Serve,
    /// Print paid orders that have no account, as JSON.
    Reconcile {
        /// Re-run provisioning for this gateway reference.
        #[arg(long, value_name = "REFERENCE")]
        retry: Option<String>,
    },
    /// Expire overdue accounts once and exit.
    Sweep,
    /// Revoke one account.
    Revoke { account_id: Uuid },
    /// Check configuration and host prerequisites.
    Doctor {
        /// Exit non-zero when any check fails.
        #[arg(long)]
        strict: bool,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let command = self.command.unwrap_or(Command::Serve);
        if let Command::Doctor { strict } = command {
            return run_doctor(self.config_env.as_deref(), strict).await;
        }

        let config = Config::from_env_with_file(self.config_env.as_deref())
            .context("failed to load configuration")?;
        let panel = Panel::from_config(config)
            .await
            .context("failed to start services")?;

        match command {
            Command::Serve => serve(panel).await,
            Command::Reconcile { retry: None } => {
                let report = panel.orders.reconciliation_report().await?;
                println!("{}", serde_json::to_string_pretty(&report)?);
                Ok(())
            }
            Command::Reconcile {
                retry: Some(reference),
            } => {
                let outcome = panel.orders.retry_provisioning(&reference).await?;
                println!("{}", serde_json::to_string_pretty(&outcome)?);
                Ok(())
            }
            Command::Sweep => {
                let report = panel.accounts.sweep_expired(chrono::Utc::now()).await?;
                println!("expired {}, failed {}", report.expired, report.failed);
                Ok(())
            }
            Command::Revoke { account_id } => {
                let summary = panel.accounts.revoke(account_id).await?;
                println!("{}", serde_json::to_string_pretty(&summary)?);
                Ok(())
            }
            Command::Doctor { .. } => Ok(()),
        }
    }
}

async fn serve(panel: Panel) -> anyhow::Result<()> {
    let addr = panel.listen_addr()?;
    let app = web::router(
        panel.app_state(),
        panel.config().security.api_key.clone(),
        panel.rate_limiter(),
    );
    let maintenance = panel.spawn_maintenance();

    tracing::info!(
        domain = %panel.config().provisioning.domain,
        telegram = panel.telegram.is_some(),
        "vpn-panel starting"
    );

    let result = web::serve(addr, app, shutdown_signal()).await;
    for task in maintenance {
        task.abort();
    }
    result.map_err(Into::into)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
