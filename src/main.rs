use alloy::primitives::Address;
use alloy::providers::ProviderBuilder;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use lpwatch_indexer::bindings;
use lpwatch_indexer::config::Config;
use lpwatch_indexer::db::repository::PgHolderStore;
use lpwatch_indexer::indexer::chain::run_dispatcher;
use lpwatch_indexer::indexer::pool_reader::RpcPoolReader;
use lpwatch_indexer::oracle::HttpPriceOracle;
use lpwatch_indexer::processor::{Processor, ProcessorSettings};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    // Initialize structured logging (set RUST_LOG=info for output)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    tracing::info!("LPWatch Indexer starting");

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path)?;
    tracing::info!(chain = %config.chain.name, "Configuration loaded from {}", config_path);

    // Create database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .map_err(|e| eyre::eyre!("Failed to connect to database: {}", e))?;

    tracing::info!("Connected to PostgreSQL");

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| eyre::eyre!("Failed to run migrations: {}", e))?;

    tracing::info!("Database migrations complete");

    // Build the dispatch bindings and the reconciler's capabilities
    let bindings = bindings::bindings(&config.contracts)?;
    let settings = ProcessorSettings::from_config(&config.contracts)?;

    let store = PgHolderStore::new(pool.clone());

    let provider = ProviderBuilder::new().connect_http(
        config
            .chain
            .rpc_http
            .parse()
            .map_err(|e| eyre::eyre!("Invalid RPC URL: {}", e))?,
    );
    let pool_address: Address = config
        .contracts
        .pool
        .address
        .parse()
        .map_err(|e| eyre::eyre!("Invalid pool address: {}", e))?;
    let pool_reader = RpcPoolReader::new(pool_address, provider);

    let oracle = HttpPriceOracle::from_config(&config.oracle)?;

    let processor = Processor::new(store, pool_reader, oracle, settings);

    // Create shutdown signal and spawn the dispatcher
    let shutdown = CancellationToken::new();
    let chain_config = config.chain.clone();
    let chain_name = chain_config.name.clone();
    let dispatcher_pool = pool.clone();
    let dispatcher_shutdown = shutdown.clone();

    let handle = tokio::spawn(async move {
        if let Err(e) = run_dispatcher(
            chain_config,
            bindings,
            processor,
            dispatcher_pool,
            dispatcher_shutdown,
        )
        .await
        {
            tracing::error!(chain = %chain_name, error = %e, "Dispatcher failed");
        }
    });

    tracing::info!("Dispatcher started. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping dispatcher...");
    shutdown.cancel();

    let _ = handle.await;

    tracing::info!("LPWatch Indexer stopped gracefully");
    Ok(())
}
