//! HTTP surface.

pub mod auth;
pub mod server;
pub mod types;

pub use self::auth::RateLimiter;
pub use self::server::{AppState, router, serve};
