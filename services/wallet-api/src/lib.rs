//! HTTP surface for the wallet ledger

pub mod errors;
pub mod handlers;
pub mod idempotency;
pub mod models;
pub mod settings;
pub mod state;

pub use errors::{ApiError, Result};
pub use settings::{AppEnvironment, Settings};
pub use state::AppState;

use actix_web::web;
use ledger_core::LedgerStore;

/// Register state and routes on an app or test service
pub fn configure_app<S: LedgerStore>(
    cfg: &mut web::ServiceConfig,
    state: web::Data<AppState<S>>,
    api_version: &str,
) {
    cfg.app_data(state);
    handlers::configure_routes::<S>(cfg, api_version);
}
