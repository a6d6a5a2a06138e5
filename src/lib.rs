pub mod block;
pub mod config;
pub mod error;
pub mod format;
pub mod notifier;
pub mod pool_api;
pub mod state;
pub mod watchers;

use config::AppConfig;
use error::AppError;
use notifier::{NotificationSink, TelegramNotifier, TracingNotifier};
use pool_api::PoolApiClient;
use state::{BlockStateStore, JsonFileBackend};
use std::sync::Arc;
use watchers::detector::TimestampChanged;
use watchers::WatchService;

/// Loads config and state, runs one watcher per coin until Ctrl-C, then flushes state.
pub async fn run(config_arg: Option<String>) -> Result<(), AppError> {
    tracing_subscriber::fmt::init();

    let config_path = AppConfig::resolve_path(config_arg)?;
    let config = AppConfig::load(&config_path)?;
    tracing::info!(
        "Loaded config from {} ({} coins)",
        config_path.display(),
        config.coins.len()
    );

    let state_path = config.state_path()?;
    let store = Arc::new(BlockStateStore::new(Box::new(JsonFileBackend::new(
        state_path.clone(),
    ))));
    store.load_all();
    tracing::info!("Block state at {}", state_path.display());

    let sink: Arc<dyn NotificationSink> = match &config.telegram {
        Some(telegram) => Arc::new(TelegramNotifier::new(
            telegram,
            config.coins.clone(),
            config.request_timeout(),
        )),
        None => {
            tracing::info!("No telegram section, announcing blocks to the log only");
            Arc::new(TracingNotifier::new(config.coins.clone()))
        }
    };
    let source = Arc::new(PoolApiClient::new(
        config.coins.clone(),
        config.request_timeout(),
    ));

    let service = WatchService::start(
        config.coins.coins().map(str::to_string).collect::<Vec<_>>(),
        source,
        store,
        sink,
        TimestampChanged,
        config.poll_interval(),
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
    tracing::info!("Shutting down {} watchers", service.len());
    service.shutdown().await;

    Ok(())
}
