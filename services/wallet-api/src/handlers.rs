use crate::errors::ApiError;
use crate::idempotency::{idempotent, Reply};
use crate::models::{
    parse_body, parse_id, AmountRequest, CreateUserRequest, HealthCheck, HealthResponse,
    MessageResponse, TransferRequest,
};
use crate::state::AppState;
use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse};
use chrono::Utc;
use ledger_core::LedgerStore;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::error;

type State<S> = web::Data<AppState<S>>;

/// Health check endpoint; 503 when the store does not answer
pub async fn health_check<S: LedgerStore>(state: State<S>) -> HttpResponse {
    let started = Instant::now();
    let ping = state.ledger.store().ping().await;
    let duration_ms = started.elapsed().as_millis() as u64;

    let (status, message) = match ping {
        Ok(()) => (StatusCode::OK, None),
        Err(e) => {
            error!(error = %e, "Store health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, Some(e.to_string()))
        }
    };
    let label = if status.is_success() { "healthy" } else { "unhealthy" };

    let mut checks = BTreeMap::new();
    checks.insert(
        "store".to_string(),
        HealthCheck {
            name: "store".to_string(),
            status: label.to_string(),
            message,
            duration_ms,
            last_checked: Utc::now(),
        },
    );

    HttpResponse::build(status).json(HealthResponse {
        status: label.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: state.environment.to_string(),
        timestamp: Utc::now(),
        checks,
    })
}

/// Prometheus metrics endpoint
pub async fn metrics_handler<S: LedgerStore>(state: State<S>) -> Result<HttpResponse, ApiError> {
    let body = state
        .metrics
        .render()
        .map_err(|e| ApiError::Internal(format!("Failed to encode metrics: {}", e)))?;

    Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(body))
}

/// Create a user together with its wallet
pub async fn create_user<S: LedgerStore>(
    state: State<S>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let provisioner = &state.provisioner;
    let payload: &[u8] = &body;

    idempotent(&state.idempotency, &req, payload, move || async move {
        let request: CreateUserRequest = parse_body(payload)?;
        let created = provisioner.create_user_with_wallet(&request.name).await?;
        Reply::json(StatusCode::CREATED, &created)
    })
    .await
}

/// Get a user and its wallet
pub async fn get_user<S: LedgerStore>(
    state: State<S>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let user_id = parse_id(&path, "user")?;
    let user = state.provisioner.get_user_with_wallet(user_id).await?;
    Ok(HttpResponse::Ok().json(user))
}

/// Deposit into a wallet
pub async fn deposit<S: LedgerStore>(
    state: State<S>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let wallet_id = parse_id(&path, "wallet")?;
    let ledger = &state.ledger;
    let payload: &[u8] = &body;

    idempotent(&state.idempotency, &req, payload, move || async move {
        let request: AmountRequest = parse_body(payload)?;
        let wallet = ledger.deposit(wallet_id, request.amount.to_amount()?).await?;
        Reply::json(StatusCode::OK, &wallet)
    })
    .await
}

/// Withdraw from a wallet
pub async fn withdraw<S: LedgerStore>(
    state: State<S>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let wallet_id = parse_id(&path, "wallet")?;
    let ledger = &state.ledger;
    let payload: &[u8] = &body;

    idempotent(&state.idempotency, &req, payload, move || async move {
        let request: AmountRequest = parse_body(payload)?;
        let wallet = ledger.withdraw(wallet_id, request.amount.to_amount()?).await?;
        Reply::json(StatusCode::OK, &wallet)
    })
    .await
}

/// Transfer between two wallets
pub async fn transfer<S: LedgerStore>(
    state: State<S>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let from_wallet_id = parse_id(&path, "wallet")?;
    let ledger = &state.ledger;
    let payload: &[u8] = &body;

    idempotent(&state.idempotency, &req, payload, move || async move {
        let request: TransferRequest = parse_body(payload)?;
        let amount = request.amount.to_amount()?;
        ledger
            .transfer(from_wallet_id, request.to_wallet_id, amount, request.description)
            .await?;
        Reply::json(
            StatusCode::OK,
            &MessageResponse {
                message: "Transfer completed successfully".to_string(),
            },
        )
    })
    .await
}

/// Current wallet balance
pub async fn get_balance<S: LedgerStore>(
    state: State<S>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let wallet_id = parse_id(&path, "wallet")?;
    let wallet = state.ledger.get_balance(wallet_id).await?;
    Ok(HttpResponse::Ok().json(wallet))
}

/// Wallet history, newest first
pub async fn get_transactions<S: LedgerStore>(
    state: State<S>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let wallet_id = parse_id(&path, "wallet")?;
    let entries = state.ledger.get_history(wallet_id).await?;
    Ok(HttpResponse::Ok().json(entries))
}

/// Configure routes
pub fn configure_routes<S: LedgerStore>(cfg: &mut web::ServiceConfig, api_version: &str) {
    cfg.route("/health", web::get().to(health_check::<S>))
        .route("/metrics", web::get().to(metrics_handler::<S>))
        .service(
            web::scope(&format!("/api/{}", api_version))
                .route("/health", web::get().to(health_check::<S>))
                .route("/users", web::post().to(create_user::<S>))
                .route("/users/{id}", web::get().to(get_user::<S>))
                .route("/wallets/{id}/deposit", web::post().to(deposit::<S>))
                .route("/wallets/{id}/withdraw", web::post().to(withdraw::<S>))
                .route("/wallets/{id}/transfer", web::post().to(transfer::<S>))
                .route("/wallets/{id}/balance", web::get().to(get_balance::<S>))
                .route(
                    "/wallets/{id}/transactions",
                    web::get().to(get_transactions::<S>),
                ),
        );
}
