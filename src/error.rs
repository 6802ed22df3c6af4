//! Error types for vpn-panel.

use std::time::Duration;

use serde::Serialize;

/// Top-level error type for the panel.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Provisioning error: {0}")]
    Provision(#[from] ProvisionError),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Conversation error: {0}")]
    Conversation(#[from] ConversationError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Failure domains surfaced to API clients and channels.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorDomain {
    Validation,
    Gateway,
    Security,
    NotFound,
    Provisioning,
    Session,
    Storage,
    Channel,
    Config,
}

/// Structured error payload attached to API error bodies.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub domain: ErrorDomain,
    pub code: &'static str,
    pub retryable: bool,
    pub message: String,
}

impl ErrorPayload {
    pub fn new(
        domain: ErrorDomain,
        code: &'static str,
        retryable: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            domain,
            code,
            retryable,
            message: message.into(),
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[cfg(feature = "libsql")]
    #[error("LibSQL error: {0}")]
    LibSql(#[from] libsql::Error),
}

/// Payment gateway errors. Never retried by the client itself.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Payment gateway unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Payment gateway timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Payment gateway rejected the request: {message}")]
    Rejected { message: String },

    #[error("Invalid response from payment gateway: {reason}")]
    InvalidResponse { reason: String },
}

/// Host and tunnel-config provisioning errors.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("Host operation {operation} failed for {username}: {reason}")]
    HostOperationFailed {
        operation: &'static str,
        username: String,
        reason: String,
    },

    #[error("Host operation {operation} timed out after {timeout:?}")]
    HostOperationTimeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Service configuration mutation failed: {reason}")]
    ConfigMutationFailed { reason: String },

    #[error("Invalid provisioning input: {reason}")]
    InvalidInput { reason: String },
}

/// Order lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Callback signature is invalid")]
    SignatureInvalid,

    #[error("Order {reference} not found")]
    NotFound { reference: String },

    #[error("Malformed callback payload: {0}")]
    MalformedCallback(String),

    #[error("Sealed provisioning payload could not be opened for order {reference}")]
    PayloadUnreadable { reference: String },

    #[error("Provisioning payload could not be sealed: {0}")]
    Sealing(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Conversation state machine errors.
#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    #[error("{0}")]
    Validation(String),

    #[error("Session {session_id} expired; start again from service selection")]
    SessionExpired { session_id: String },
}

/// Outbound channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send message on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl GatewayError {
    fn to_error_payload(&self) -> ErrorPayload {
        match self {
            Self::Unavailable { .. } | Self::Timeout { .. } => ErrorPayload::new(
                ErrorDomain::Gateway,
                "gateway.unavailable",
                true,
                "Payment service is temporarily unavailable, please try again",
            ),
            Self::Rejected { message } => ErrorPayload::new(
                ErrorDomain::Gateway,
                "gateway.rejected",
                false,
                format!("Payment could not be created: {message}"),
            ),
            Self::InvalidResponse { .. } => ErrorPayload::new(
                ErrorDomain::Gateway,
                "gateway.invalid_response",
                true,
                "Payment service returned an unexpected response, please try again",
            ),
        }
    }
}

impl ProvisionError {
    fn to_error_payload(&self) -> ErrorPayload {
        match self {
            Self::InvalidInput { reason } => ErrorPayload::new(
                ErrorDomain::Validation,
                "validation.provisioning_input",
                false,
                reason.clone(),
            ),
            Self::HostOperationFailed { .. } | Self::HostOperationTimeout { .. } => {
                ErrorPayload::new(
                    ErrorDomain::Provisioning,
                    "provisioning.host_failed",
                    false,
                    "Account could not be created, please contact support",
                )
            }
            Self::ConfigMutationFailed { .. } => ErrorPayload::new(
                ErrorDomain::Provisioning,
                "provisioning.config_failed",
                false,
                "Account could not be created, please contact support",
            ),
        }
    }
}

impl OrderError {
    /// Map an order error to the structured surface shown to API clients and buyers.
    pub fn to_error_payload(&self) -> ErrorPayload {
        match self {
            Self::Validation(reason) => ErrorPayload::new(
                ErrorDomain::Validation,
                "validation.invalid_order",
                false,
                reason.clone(),
            ),
            Self::SignatureInvalid => ErrorPayload::new(
                ErrorDomain::Security,
                "security.signature_invalid",
                false,
                "Invalid signature",
            ),
            Self::NotFound { .. } => ErrorPayload::new(
                ErrorDomain::NotFound,
                "not_found.order",
                false,
                "Payment not found",
            ),
            Self::MalformedCallback(reason) => ErrorPayload::new(
                ErrorDomain::Validation,
                "validation.malformed_callback",
                false,
                reason.clone(),
            ),
            Self::PayloadUnreadable { .. } => ErrorPayload::new(
                ErrorDomain::Provisioning,
                "provisioning.payload_unreadable",
                false,
                "Account could not be created, please contact support",
            ),
            Self::Sealing(_) => ErrorPayload::new(
                ErrorDomain::Storage,
                "storage.seal_failed",
                true,
                "Internal error, please try again",
            ),
            Self::Gateway(err) => err.to_error_payload(),
            Self::Provision(err) => err.to_error_payload(),
            Self::Database(_) => ErrorPayload::new(
                ErrorDomain::Storage,
                "storage.failed",
                true,
                "Internal error, please try again",
            ),
        }
    }

    /// Validation and not-found errors are client errors handled at the boundary.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::NotFound { .. } | Self::MalformedCallback(_)
        ) || matches!(self, Self::Provision(ProvisionError::InvalidInput { .. }))
    }
}

impl Error {
    /// Map any error into the structured payload.
    pub fn to_error_payload(&self) -> ErrorPayload {
        match self {
            Self::Order(err) => err.to_error_payload(),
            Self::Gateway(err) => err.to_error_payload(),
            Self::Provision(err) => err.to_error_payload(),
            Self::Conversation(ConversationError::Validation(reason)) => ErrorPayload::new(
                ErrorDomain::Validation,
                "validation.conversation_input",
                false,
                reason.clone(),
            ),
            Self::Conversation(err @ ConversationError::SessionExpired { .. }) => {
                ErrorPayload::new(
                    ErrorDomain::Session,
                    "session.expired",
                    false,
                    err.to_string(),
                )
            }
            Self::Channel(err) => ErrorPayload::new(
                ErrorDomain::Channel,
                "channel.send_failed",
                true,
                err.to_string(),
            ),
            Self::Database(err) => ErrorPayload::new(
                ErrorDomain::Storage,
                "storage.failed",
                true,
                err.to_string(),
            ),
            Self::Config(err) => ErrorPayload::new(
                ErrorDomain::Config,
                "config.invalid",
                false,
                err.to_string(),
            ),
        }
    }
}

/// Result type alias for the panel.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_gateway_timeouts_as_retryable() {
        let err = Error::from(GatewayError::Timeout {
            timeout: Duration::from_secs(15),
        });
        let payload = err.to_error_payload();

        assert_eq!(payload.domain, ErrorDomain::Gateway);
        assert_eq!(payload.code, "gateway.unavailable");
        assert!(payload.retryable);
    }

    #[test]
    fn maps_signature_failures_to_security_domain() {
        let payload = OrderError::SignatureInvalid.to_error_payload();

        assert_eq!(payload.domain, ErrorDomain::Security);
        assert_eq!(payload.code, "security.signature_invalid");
        assert!(!payload.retryable);
    }

    #[test]
    fn provisioning_failures_hide_host_detail() {
        let err = OrderError::from(ProvisionError::HostOperationFailed {
            operation: "useradd",
            username: "alice".to_string(),
            reason: "useradd: user 'alice' already exists".to_string(),
        });
        let payload = err.to_error_payload();

        assert_eq!(payload.code, "provisioning.host_failed");
        assert!(!payload.message.contains("useradd"));
        assert!(!err.is_client_error());
    }

    #[test]
    fn validation_and_not_found_are_client_errors() {
        assert!(OrderError::Validation("bad".into()).is_client_error());
        assert!(
            OrderError::NotFound {
                reference: "R1".into()
            }
            .is_client_error()
        );
        assert!(!OrderError::SignatureInvalid.is_client_error());
    }

    #[test]
    fn storage_failures_are_retryable_and_opaque() {
        let err = OrderError::from(DatabaseError::Constraint("UNIQUE constraint failed".into()));
        let payload = err.to_error_payload();
        assert_eq!(payload.code, "storage.failed");
        assert!(payload.retryable);
        assert!(!payload.message.contains("UNIQUE"));

        let config = ConfigError::InvalidValue {
            key: "HTTP_PORT".into(),
            message: "must be a valid port number".into(),
        };
        assert!(config.to_string().contains("HTTP_PORT"));
    }

    #[test]
    fn serializes_error_payload() {
        let payload = OrderError::Validation("Invalid service type".into()).to_error_payload();
        let value = serde_json::to_value(&payload).expect("valid json");

        assert_eq!(value["domain"], "validation");
        assert_eq!(value["code"], "validation.invalid_order");
        assert_eq!(value["message"], "Invalid service type");
    }
}
