use std::sync::Arc;

use anyhow::Context;
use persistence::{ClickHouseStore, TradeStore};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use trade_archiver::config::ArchiverConfig;
use trade_archiver::connector::StreamConnector;
use trade_archiver::dispatcher::Dispatcher;
use trade_archiver::logger::DiagnosticLogger;
use trade_archiver::transport::WsTransport;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = ArchiverConfig::default_path();
    let config = ArchiverConfig::load(&path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    let symbols = config.symbol_universe()?;
    let connector_config = config.connector_config()?;

    tracing::info!(
        version = trade_archiver::SERVICE_VERSION,
        symbols = symbols.len(),
        store_host = %config.store_host(),
        "Starting trade archiver"
    );

    let clickhouse = ClickHouseStore::new(config.store_config())?;
    clickhouse
        .ensure_schema()
        .await
        .context("creating archive tables")?;
    let store: Arc<dyn TradeStore> = Arc::new(clickhouse);

    let logger = Arc::new(DiagnosticLogger::new(
        Arc::clone(&store),
        config.log_to_console,
        config.store_write_timeout(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&store),
        Arc::clone(&logger),
        config.dispatcher_config(),
    ));

    let cancel = CancellationToken::new();
    let ticker = dispatcher.spawn_flush_ticker(config.flush_interval(), cancel.clone());

    logger.info("Starting event loop", "").await;

    let connector = Arc::new(StreamConnector::new(
        Arc::new(WsTransport),
        Arc::clone(&dispatcher),
        Arc::clone(&logger),
        connector_config,
    ));
    let tasks: Vec<_> = symbols
        .into_iter()
        .map(|symbol| {
            let connector = Arc::clone(&connector);
            let cancel = cancel.clone();
            tokio::spawn(async move { connector.run(symbol, cancel).await })
        })
        .collect();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    cancel.cancel();

    for task in tasks {
        if let Err(err) = task.await {
            tracing::error!(error = %err, "Connector task failed");
        }
    }
    let outcome = ticker.await?;
    let stats = dispatcher.stats();
    tracing::info!(
        ?outcome,
        accepted = stats.accepted,
        persisted = stats.persisted,
        failed_flushes = stats.failed_flushes,
        dropped = stats.dropped,
        "Trade archiver stopped"
    );

    Ok(())
}
