//! Refractor HTTP entrypoint.
//!
//! Wires the store, chain handlers, signer engine, finalization queue and
//! monitoring surface into an Axum server, then runs until SIGTERM/SIGINT.
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HOST`, `PORT` control the bind address
//! - `DATABASE_URL` selects Postgres; without it an in-memory store is used
//! - `RUST_LOG` controls log filtering
//! - `REFRACTOR_<CHAIN>_<NETWORK>_ENDPOINT` overrides chain endpoints

use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tower_http::cors;
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use refractor::chain::evm::EvmHandler;
use refractor::chain::onemoney::OneMoneyHandler;
use refractor::chain::stellar::{HorizonSchemaSource, StellarHandler};
use refractor::chain::HandlerRegistry;
use refractor::config::{self, Config};
use refractor::engine::SignerEngine;
use refractor::finalizer::Finalizer;
use refractor::handlers::{self, AppState};
use refractor::queue::FinalizationQueue;
use refractor::store::memory::MemoryProvider;
use refractor::store::postgres::PostgresProvider;
use refractor::store::DataProvider;
use refractor::submit::{CallbackClient, Submitter};
use refractor::util::SigDown;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load();

    let store: Arc<dyn DataProvider> = match &config.database_url {
        Some(url) => {
            let provider = PostgresProvider::connect(url, config.db_max_connections).await?;
            tracing::info!("Connected to Postgres");
            Arc::new(provider)
        }
        None => {
            tracing::warn!("No DATABASE_URL configured, using the in-memory store");
            Arc::new(MemoryProvider::new())
        }
    };

    let http_client = reqwest::Client::new();
    let mut handler_registry = HandlerRegistry::new();
    handler_registry.register(Arc::new(StellarHandler::new(Arc::new(
        HorizonSchemaSource::new(
            http_client.clone(),
            config::horizon_overrides(),
            config.chain_rpc_timeout(),
        ),
    ))));
    handler_registry.register(Arc::new(EvmHandler::new("ethereum")));
    handler_registry.register(Arc::new(EvmHandler::new("polygon")));
    handler_registry.register(Arc::new(EvmHandler::new("base")));
    handler_registry.register(Arc::new(OneMoneyHandler::new()));
    let handler_registry = Arc::new(handler_registry);

    let ready_notify = Arc::new(Notify::new());
    let queue = FinalizationQueue::new(config.queue_config());
    let submitter = Arc::new(Submitter::new(
        http_client.clone(),
        handler_registry.clone(),
        config::endpoint_overrides(),
        config.chain_rpc_timeout(),
    ));
    let callbacks = Arc::new(CallbackClient::new(http_client, config.callback_timeout()));

    let engine = Arc::new(SignerEngine::new(
        handler_registry,
        store.clone(),
        ready_notify.clone(),
    ));

    let sig_down = SigDown::try_new()?;
    let cancel = sig_down.cancellation_token();

    let finalizer = Arc::new(Finalizer::new(
        store.clone(),
        queue.clone(),
        submitter,
        callbacks,
        ready_notify,
        config.finalizer_config(),
    ));
    let finalizer_handle = finalizer.clone().spawn(cancel.clone());
    let sweeper_handle = Finalizer::spawn_sweeper(
        store.clone(),
        config.finalizer_config().sweep_interval,
        cancel.clone(),
    );

    let state = Arc::new(AppState {
        engine,
        store,
        queue: queue.clone(),
        admin_api_key: config.admin_api_key.clone(),
    });

    let app = Router::new()
        .merge(handlers::routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host, config.port);
    tracing::info!("Starting server at http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown_token = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown_token.cancelled().await })
        .await?;

    // Shutdown order: stop the loops, let in-flight tasks finish (bounded),
    // then drop the store.
    cancel.cancel();
    let _ = finalizer_handle.await;
    let _ = sweeper_handle.await;
    if tokio::time::timeout(Duration::from_secs(30), queue.drain())
        .await
        .is_err()
    {
        tracing::warn!("Queue drain timed out, abandoning in-flight tasks");
    }
    queue.shutdown();
    tracing::info!("Shutdown complete");

    Ok(())
}
