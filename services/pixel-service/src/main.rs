use anyhow::Context;
use axum::{
    Json, Router,
    http::StatusCode,
    routing::{get, post},
};
use px_color::{ColorPairGenerator, RandomColorPairs};
use px_ledger::{LedgerClient, MemoryLedger};
use px_ledger_rpc::{RpcLedger, RpcWallet};
use px_sync::{PixelSyncController, SyncHandle, driver};
use px_types::AccountId;
use px_wallet::{MemoryWalletProvider, WalletProvider, WalletSession};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

mod account;
mod config;
mod pixels;

use config::{LedgerMode, ServiceConfig};

const SERVICE_NAME: &str = "pixel-service";

/// Account the offline demo wallet hands out.
const DEMO_ACCOUNT: &str = "0x0000000000000000000000000000000000000001";

#[derive(Debug, Serialize)]
struct HealthResponse {
    service: &'static str,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct VersionResponse {
    service: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    error: String,
}

pub(crate) type ApiError = (StatusCode, Json<ErrorResponse>);
pub(crate) type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) session: Arc<WalletSession>,
    pub(crate) sync: SyncHandle,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ServiceConfig::from_env().context("failed to load configuration")?;

    let provider: Arc<dyn WalletProvider> = match config.ledger {
        LedgerMode::Rpc => Arc::new(RpcWallet::new(&config.rpc.endpoint)),
        LedgerMode::Memory => {
            let wallet = MemoryWalletProvider::new(vec![AccountId(DEMO_ACCOUNT.to_owned())]);
            wallet.authorize_all().await;
            Arc::new(wallet)
        }
    };
    let session = Arc::new(WalletSession::new(Some(provider)));
    session.detect_existing_account().await;
    session.follow_provider();

    let ledger: Arc<dyn LedgerClient> = match config.ledger {
        LedgerMode::Rpc => {
            info!(
                "syncing contract {} via {}",
                config.rpc.contract, config.rpc.endpoint
            );
            Arc::new(RpcLedger::new(config.rpc.clone(), session.watch()))
        }
        LedgerMode::Memory => {
            info!("syncing against the in-memory demo ledger");
            Arc::new(MemoryLedger::new(session.watch()))
        }
    };
    let colors: Arc<dyn ColorPairGenerator> = Arc::new(RandomColorPairs);

    let (sync, sync_task) = driver::spawn(PixelSyncController::new(ledger, colors));
    let state = AppState { session, sync };

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;
    info!("{} listening on {}", SERVICE_NAME, config.addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router held the last command handles; the sync task now unsubscribes.
    sync_task.await.context("pixel sync task failed")?;
    info!("{} stopped", SERVICE_NAME);

    Ok(())
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .route("/account", get(account::current_account))
        .route("/account/connect", post(account::connect))
        .route("/pixels", get(pixels::list_pixels))
        .route("/pixels/count", get(pixels::pixel_count))
        .route("/colors", get(pixels::draft_colors).put(pixels::set_colors))
        .route("/colors/random", get(pixels::random_colors))
        .route(
            "/submission",
            get(pixels::submission).post(pixels::submit),
        )
        .route("/submission/ack", post(pixels::acknowledge))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for ctrl-c: {}", err);
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        service: SERVICE_NAME,
        status: "ok",
    })
}

async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub(crate) fn bad_request(message: &str) -> ApiError {
    error_response(StatusCode::BAD_REQUEST, message)
}

pub(crate) fn forbidden(message: &str) -> ApiError {
    error_response(StatusCode::FORBIDDEN, message)
}

pub(crate) fn conflict(message: &str) -> ApiError {
    error_response(StatusCode::CONFLICT, message)
}

pub(crate) fn unavailable(message: &str) -> ApiError {
    error_response(StatusCode::SERVICE_UNAVAILABLE, message)
}

pub(crate) fn internal_error(err: impl std::fmt::Display) -> ApiError {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
}

fn error_response(status: StatusCode, message: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.to_owned(),
        }),
    )
}
