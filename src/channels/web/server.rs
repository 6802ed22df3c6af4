//! Axum HTTP server: payment webhook, order API, operator API, Telegram webhook.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    middleware,
    routing::{delete, get, post},
};
use secrecy::SecretString;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::accounts::{AccountDetails, AccountManager, AccountSummary};
use crate::channels::telegram::{TelegramBot, Update};
use crate::channels::web::auth::{
    AuthState, RateLimiter, api_key_matches, auth_middleware, rate_limit_middleware,
};
use crate::channels::web::types::*;
use crate::error::{ChannelError, ErrorDomain};
use crate::model::{AccountStatus, ServiceKind};
use crate::orders::{
    CallbackOutcome, OrderCreated, OrderDraft, OrderService, OrderStatusView, ReconciliationEntry,
};
use crate::payments::{CallbackEnvelope, PaymentChannel};

const CALLBACK_SIGNATURE_HEADER: &str = "x-callback-signature";
const TELEGRAM_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Shared state for all handlers.
pub struct AppState {
    pub orders: Arc<OrderService>,
    pub accounts: Arc<AccountManager>,
    /// Present when a bot token is configured.
    pub telegram: Option<Arc<TelegramBot>>,
    pub telegram_secret: Option<SecretString>,
}

/// Build the full router.
pub fn router(state: Arc<AppState>, api_key: SecretString, limiter: Arc<RateLimiter>) -> Router {
    let auth_state = AuthState {
        api_key: Arc::new(api_key),
    };

    // Public routes (no auth)
    let public = Router::new()
        .route("/health", get(health_handler))
        .route("/api/payments/callback", post(payment_callback_handler));

    let protected = Router::new()
        .route("/api/payments/create", post(create_payment_handler))
        .route("/api/payments/channels", get(payment_channels_handler))
        .route("/api/payments/{reference}", get(payment_status_handler))
        .route("/api/users", post(create_user_handler).get(list_users_handler))
        .route("/api/users/{id}", delete(delete_user_handler))
        .route("/api/users/{id}/config", get(user_config_handler))
        .route("/api/admin/reconciliation", get(reconciliation_handler))
        .route(
            "/api/admin/reconciliation/{reference}/retry",
            post(reconciliation_retry_handler),
        )
        .route_layer(middleware::from_fn_with_state(auth_state, auth_middleware))
        .route_layer(middleware::from_fn_with_state(
            limiter.clone(),
            rate_limit_middleware,
        ));

    let telegram = Router::new()
        .route("/api/telegram/webhook", post(telegram_webhook_handler))
        .route_layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));

    Router::new()
        .merge(public)
        .merge(protected)
        .merge(telegram)
        .fallback(not_found_handler)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1 MB max request body
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve<F>(addr: SocketAddr, app: Router, shutdown: F) -> Result<(), ChannelError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ChannelError::StartupFailed {
            name: "http".to_string(),
            reason: format!("Failed to bind to {addr}: {e}"),
        })?;
    let bound = listener
        .local_addr()
        .map_err(|e| ChannelError::StartupFailed {
            name: "http".to_string(),
            reason: format!("Failed to get local addr: {e}"),
        })?;
    tracing::info!(addr = %bound, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            tracing::info!("HTTP server shutting down");
        })
        .await
        .map_err(|e| ChannelError::StartupFailed {
            name: "http".to_string(),
            reason: e.to_string(),
        })
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| ApiError::bad_request(e.body_text()))
}

async fn health_handler() -> Json<ApiResponse<HealthResponse>> {
    Json(ApiResponse::data(HealthResponse {
        status: "healthy",
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}

async fn not_found_handler() -> (StatusCode, Json<ApiResponse<()>>) {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse {
            success: false,
            message: Some("Endpoint not found".to_string()),
            data: None,
            code: Some("not_found.endpoint"),
        }),
    )
}

// --- Payments ---

async fn payment_callback_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<()> {
    let signature = headers
        .get(CALLBACK_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let envelope = CallbackEnvelope::new(body, signature);

    let outcome = state.orders.handle_callback(&envelope).await?;
    tracing::debug!(?outcome, "Payment callback accepted");
    Ok((StatusCode::OK, Json(ApiResponse::ok())))
}

async fn create_payment_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<OrderDraft>, JsonRejection>,
) -> ApiResult<OrderCreated> {
    let draft = json_body(payload)?;
    let created = state.orders.create_order(draft).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::data(created).with_message("Payment created")),
    ))
}

async fn payment_status_handler(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
) -> ApiResult<OrderStatusView> {
    let view = state.orders.get_status(&reference).await?;
    Ok((StatusCode::OK, Json(ApiResponse::data(view))))
}

async fn payment_channels_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<PaymentChannel>> {
    let channels = state.orders.payment_channels().await;
    Ok((StatusCode::OK, Json(ApiResponse::data(channels))))
}

// --- Users ---

async fn create_user_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> ApiResult<AccountDetails> {
    let request = json_body(payload)?;
    let kind: ServiceKind = request
        .kind
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid type. Must be one of: ssh, vless, vmess, trojan"))?;
    let details = state
        .accounts
        .provision_direct(
            &request.username,
            kind,
            request.password.as_deref(),
            request.days.unwrap_or(DEFAULT_USER_DAYS),
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::data(details).with_message("User created successfully")),
    ))
}

async fn list_users_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListUsersQuery>,
) -> ApiResult<Vec<AccountSummary>> {
    let kind = query
        .kind
        .as_deref()
        .map(str::parse::<ServiceKind>)
        .transpose()
        .map_err(ApiError::bad_request)?;
    let status = query
        .status
        .as_deref()
        .map(|s| {
            AccountStatus::parse(s)
                .ok_or_else(|| ApiError::bad_request(format!("Invalid status '{s}'")))
        })
        .transpose()?;

    let accounts = state.accounts.list(kind, status).await?;
    Ok((StatusCode::OK, Json(ApiResponse::data(accounts))))
}

fn parse_account_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|_| ApiError::bad_request("Invalid user ID"))
}

async fn delete_user_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<AccountSummary> {
    let id = parse_account_id(&id)?;
    let summary = state.accounts.revoke(id).await?;
    Ok((
        StatusCode::OK,
        Json(ApiResponse::data(summary).with_message("User revoked")),
    ))
}

async fn user_config_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<AccountDetails> {
    let id = parse_account_id(&id)?;
    let details = state.accounts.descriptor(id).await?;
    Ok((StatusCode::OK, Json(ApiResponse::data(details))))
}

// --- Reconciliation ---

async fn reconciliation_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<ReconciliationEntry>> {
    let report = state.orders.reconciliation_report().await?;
    Ok((StatusCode::OK, Json(ApiResponse::data(report))))
}

async fn reconciliation_retry_handler(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
) -> ApiResult<CallbackOutcome> {
    let outcome = state.orders.retry_provisioning(&reference).await?;
    Ok((StatusCode::OK, Json(ApiResponse::data(outcome))))
}

// --- Telegram ---

async fn telegram_webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<Update>, JsonRejection>,
) -> ApiResult<()> {
    let Some(bot) = &state.telegram else {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            ErrorDomain::NotFound,
            "not_found.endpoint",
            "Telegram is not configured",
        ));
    };
    if let Some(secret) = &state.telegram_secret {
        let presented = headers
            .get(TELEGRAM_SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !api_key_matches(secret, presented) {
            tracing::warn!("Rejected Telegram update with bad secret token");
            return Err(ApiError::new(
                StatusCode::FORBIDDEN,
                ErrorDomain::Security,
                "security.telegram_secret_invalid",
                "Invalid secret token",
            ));
        }
    }
    let update = json_body(payload)?;

    // Telegram retries on non-2xx; delivery failures are only logged.
    if let Err(err) = bot.handle_update(&update).await {
        tracing::warn!(update_id = update.update_id, error = %err, "Failed to answer Telegram update");
    }
    Ok((StatusCode::OK, Json(ApiResponse::ok())))
}
