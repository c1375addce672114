use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use ledger_core::{Backend, LedgerStore, MemoryStore, PostgresStore, RocksStore};
use tracing::info;
use tracing_subscriber::EnvFilter;
use wallet_api::{configure_app, AppEnvironment, AppState, Settings};

fn init_tracing(environment: AppEnvironment) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(true)
        .with_target(false);

    if environment == AppEnvironment::Production {
        builder.json().init();
    } else {
        builder.with_file(true).with_line_number(true).init();
    }
}

async fn serve<S: LedgerStore>(settings: Settings, store: S) -> anyhow::Result<()> {
    let state = web::Data::new(AppState::new(
        store,
        settings.ledger.idempotency.clone(),
        settings.environment,
    )?);
    let api_version = settings.api_version.clone();

    info!(
        host = %settings.server.host,
        port = settings.server.port,
        backend = ?settings.ledger.backend,
        "Starting Wallet API"
    );

    HttpServer::new(move || {
        let state = state.clone();
        let api_version = api_version.clone();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .configure(move |cfg| configure_app(cfg, state, &api_version))
    })
    .workers(settings.server.workers)
    .bind(settings.bind_address())?
    .run()
    .await?;

    Ok(())
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let settings = Settings::load().context("Failed to load configuration")?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    init_tracing(settings.environment);

    let ledger = settings.ledger.clone();
    match ledger.backend {
        Backend::Memory => {
            let store = MemoryStore::new(ledger.lock_timeout());
            serve(settings, store).await
        }
        Backend::Rocksdb => {
            let store = RocksStore::open(&ledger.data_dir, &ledger.rocksdb, ledger.lock_timeout())
                .context("Failed to open RocksDB")?;
            serve(settings, store).await
        }
        Backend::Postgres => {
            let url = ledger.database_url.clone().unwrap_or_default();
            let store = PostgresStore::connect(&url, ledger.max_connections, ledger.lock_timeout())
                .await
                .context("Failed to connect to database")?;
            store.migrate().await.context("Failed to apply schema")?;
            serve(settings, store).await
        }
    }
}
