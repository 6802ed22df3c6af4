//! vpn-panel: sells time-boxed SSH and Xray tunnel accounts.
//!
//! A buyer picks a service through a chat conversation or the HTTP API, pays
//! through the Tripay gateway, and the signed payment callback provisions the
//! account on the host and delivers a connection descriptor back to the
//! channel the order came from.

pub mod accounts;
pub mod app;
pub mod bootstrap;
pub mod channels;
pub mod cli;
pub mod config;
pub mod conversation;
pub mod db;
pub mod error;
pub mod model;
pub mod orders;
pub mod payments;
pub mod provisioning;
pub mod secrets;

pub use app::Panel;
pub use config::Config;
pub use error::{Error, Result};
