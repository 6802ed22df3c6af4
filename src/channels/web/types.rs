//! Request and response DTOs for the HTTP API.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorDomain, ErrorPayload, GatewayError, OrderError, ProvisionError};

/// `{success, message?, data?, code?}`, the envelope every endpoint returns.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn data(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            code: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl ApiResponse<()> {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
            data: None,
            code: None,
        }
    }
}

// --- Health ---

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
}

// --- Users ---

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default, alias = "duration_days")]
    pub days: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

pub const DEFAULT_USER_DAYS: u32 = 30;

// --- Errors ---

/// An error rendered as an `ApiResponse` with a matching status code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub payload: ErrorPayload,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        domain: ErrorDomain,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            payload: ErrorPayload::new(domain, code, false, message),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::from(OrderError::Validation(message.into()))
    }

    pub fn status_for(err: &OrderError) -> StatusCode {
        match err {
            OrderError::Validation(_)
            | OrderError::MalformedCallback(_)
            | OrderError::SignatureInvalid
            | OrderError::Provision(ProvisionError::InvalidInput { .. }) => StatusCode::BAD_REQUEST,
            OrderError::NotFound { .. } => StatusCode::NOT_FOUND,
            OrderError::Gateway(GatewayError::Unavailable { .. } | GatewayError::Timeout { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            OrderError::Gateway(_) => StatusCode::BAD_GATEWAY,
            OrderError::Provision(_)
            | OrderError::PayloadUnreadable { .. }
            | OrderError::Sealing(_)
            | OrderError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        let status = Self::status_for(&err);
        if status.is_server_error() {
            tracing::error!(error = %err, "Request failed");
        } else if !err.is_client_error() {
            tracing::warn!(error = %err, "Request rejected");
        }
        Self {
            status,
            payload: err.to_error_payload(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            success: false,
            message: Some(self.payload.message),
            data: None,
            code: Some(self.payload.code),
        };
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;
