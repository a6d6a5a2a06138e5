pub mod block_watcher;
pub mod detector;

use crate::notifier::NotificationSink;
use crate::pool_api::StatsSource;
use crate::state::BlockStateStore;
use block_watcher::BlockWatcher;
use detector::ChangePolicy;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Owns one watcher task per coin and their shared shutdown token.
pub struct WatchService {
    tasks: JoinSet<String>,
    cancel: CancellationToken,
    store: Arc<BlockStateStore>,
}

impl WatchService {
    /// Spawns a watcher for every coin. Must be called inside a tokio runtime.
    pub fn start<P, I>(
        coins: I,
        source: Arc<dyn StatsSource>,
        store: Arc<BlockStateStore>,
        sink: Arc<dyn NotificationSink>,
        policy: P,
        interval: Duration,
    ) -> Self
    where
        P: ChangePolicy + Clone + 'static,
        I: IntoIterator<Item = String>,
    {
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        for coin in coins {
            let watcher = BlockWatcher::new(
                coin.clone(),
                Arc::clone(&source),
                Arc::clone(&store),
                Arc::clone(&sink),
                policy.clone(),
                interval,
            );
            let token = cancel.child_token();
            tasks.spawn(async move {
                watcher.run(token).await;
                coin
            });
        }

        tracing::info!("Started {} block watchers", tasks.len());
        Self {
            tasks,
            cancel,
            store,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Signals every watcher, waits for all of them, then flushes the store.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(coin) => tracing::debug!(coin = %coin, "Watcher exited"),
                Err(e) if e.is_panic() => tracing::error!("Watcher panicked: {e}"),
                Err(e) => tracing::warn!("Watcher aborted: {e}"),
            }
        }

        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.persist()).await {
            Ok(true) => tracing::info!("Final block state persisted"),
            Ok(false) => tracing::warn!("Final persist failed, last updates may be lost"),
            Err(e) => tracing::error!("Final persist task failed: {e}"),
        }
    }
}
