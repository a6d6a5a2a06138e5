use crate::block::BlockRecord;
use crate::error::AppError;
use crate::notifier::NotificationSink;
use crate::pool_api::{StatsSnapshot, StatsSource};
use crate::state::BlockStateStore;
use crate::watchers::detector::{
    extract_last_block_timestamp, resolve_block_by_timestamp, ChangePolicy,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Result of one poll.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Unchanged,
    /// Timestamp moved but no listed block carries it; the store was left alone.
    Unresolved { timestamp: i64 },
    Updated(BlockRecord),
}

/// Polls one coin until cancelled.
pub struct BlockWatcher<P: ChangePolicy> {
    coin: String,
    source: Arc<dyn StatsSource>,
    store: Arc<BlockStateStore>,
    sink: Arc<dyn NotificationSink>,
    policy: P,
    interval: Duration,
}

impl<P: ChangePolicy> BlockWatcher<P> {
    pub fn new(
        coin: String,
        source: Arc<dyn StatsSource>,
        store: Arc<BlockStateStore>,
        sink: Arc<dyn NotificationSink>,
        policy: P,
        interval: Duration,
    ) -> Self {
        Self {
            coin,
            source,
            store,
            sink,
            policy,
            interval,
        }
    }

    /// Fetch, compare and, on a resolved change, update the store and notify.
    pub async fn poll_once(&self) -> Result<CycleOutcome, AppError> {
        let snapshot = self.source.fetch_stats(&self.coin).await?;
        self.process_snapshot(snapshot).await
    }

    async fn process_snapshot(&self, snapshot: StatsSnapshot) -> Result<CycleOutcome, AppError> {
        let coin = self.coin.as_str();
        let current = extract_last_block_timestamp(&snapshot).ok_or_else(|| {
            AppError::DataNotFound(format!("stats.lastBlockFound missing for {coin}"))
        })?;

        let last = self.store.get(coin);
        if last.is_placeholder() {
            tracing::debug!(coin = %coin, "No last block data yet");
        }
        tracing::debug!(coin = %coin, "Comparing timestamps: current {current} vs last {}", last.timestamp);

        if !self.policy.has_new_block(&last, current) {
            return Ok(CycleOutcome::Unchanged);
        }

        let listing = self.source.fetch_blocks(coin).await?;
        let Some(record) = resolve_block_by_timestamp(coin, current, &listing) else {
            tracing::info!(coin = %coin, "No block found with the timestamp {current}");
            return Ok(CycleOutcome::Unresolved { timestamp: current });
        };

        tracing::info!(
            coin = %coin,
            "New block at height {:?} (timestamp {current}, previous {})",
            record.height,
            last.timestamp
        );
        self.store.put(coin, record.clone());

        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.persist()).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(coin = %coin, "Block state kept in memory only"),
            Err(e) => tracing::error!(coin = %coin, "Persist task failed: {e}"),
        }

        if let Err(e) = self.sink.publish(&record).await {
            tracing::warn!(coin = %coin, "Failed to publish new block: {e}");
        }

        Ok(CycleOutcome::Updated(record))
    }

    /// Loops until `cancel` fires.
    ///
    /// Cancellation interrupts the stats request; once a change is being resolved
    /// the cycle runs to completion so an update is never half-applied.
    pub async fn run(self, cancel: CancellationToken) {
        let coin = self.coin.clone();
        tracing::info!(coin = %coin, "Starting block watcher every {:?}", self.interval);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                fetched = self.source.fetch_stats(&coin) => fetched,
            };

            let outcome = match fetched {
                Ok(snapshot) => self.process_snapshot(snapshot).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(CycleOutcome::Unchanged) => {
                    tracing::debug!(coin = %coin, "Same timestamp as last one, no notification");
                }
                Ok(_) => {}
                Err(e) if e.is_transient() => {
                    tracing::warn!(coin = %coin, "Poll skipped: {e}");
                }
                Err(e) => {
                    tracing::error!(coin = %coin, "Poll failed: {e}");
                }
            }
        }

        tracing::info!(coin = %coin, "Block watcher stopped");
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::state::JsonFileBackend;
    use crate::watchers::detector::TimestampChanged;
    use serde_json::json;
    use tempfile::TempDir;

    struct Harness {
        _tmp: TempDir,
        source: Arc<ScriptedSource>,
        store: Arc<BlockStateStore>,
        sink: Arc<RecordingSink>,
        watcher: BlockWatcher<TimestampChanged>,
    }

    fn harness() -> Harness {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(BlockStateStore::new(Box::new(JsonFileBackend::new(
            tmp.path().join("blocks.json"),
        ))));
        let source = Arc::new(ScriptedSource::default());
        let sink = Arc::new(RecordingSink::default());
        let watcher = BlockWatcher::new(
            "etc".to_string(),
            source.clone(),
            store.clone(),
            sink.clone(),
            TimestampChanged,
            Duration::from_millis(10),
        );
        Harness {
            _tmp: tmp,
            source,
            store,
            sink,
            watcher,
        }
    }

    fn stats(last_block_found: i64) -> serde_json::Value {
        json!({"hashrate": 1000, "stats": {"lastBlockFound": last_block_found}})
    }

    fn seed(store: &BlockStateStore, timestamp: i64, height: u64) {
        store.put(
            "etc",
            BlockRecord {
                height: Some(height),
                timestamp,
                ..BlockRecord::placeholder("etc")
            },
        );
    }

    #[tokio::test]
    async fn test_unchanged_then_new_block() {
        let h = harness();
        seed(&h.store, 1000, 400);

        h.source.push_stats(Ok(stats(1000)));
        assert_eq!(h.watcher.poll_once().await.unwrap(), CycleOutcome::Unchanged);
        assert_eq!(*h.source.blocks_calls.lock().unwrap(), 0);
        assert!(h.sink.published.lock().unwrap().is_empty());
        assert_eq!(h.store.get("etc").height, Some(400));

        h.source.push_stats(Ok(stats(2000)));
        h.source.push_blocks(Ok(json!({
            "candidates": [{"height": 500, "timestamp": 2000}],
            "immature": [],
            "matured": [{"height": 400, "timestamp": 1000}]
        })));
        let record = match h.watcher.poll_once().await.unwrap() {
            CycleOutcome::Updated(record) => record,
            other => panic!("expected update, got {other:?}"),
        };
        assert_eq!(record.height, Some(500));
        assert_eq!(record.timestamp, 2000);

        let stored = h.store.get("etc");
        assert_eq!(stored.timestamp, 2000);
        assert_eq!(stored.height, Some(500));

        let published = h.sink.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0], stored);
    }

    #[tokio::test]
    async fn test_unresolved_change_leaves_store_untouched() {
        let h = harness();
        seed(&h.store, 1000, 400);

        h.source.push_stats(Ok(stats(3000)));
        h.source.push_blocks(Ok(json!({
            "candidates": [{"height": 401, "timestamp": 1500}],
            "immature": null,
            "matured": [{"height": 400, "timestamp": 1000}]
        })));

        let outcome = h.watcher.poll_once().await.unwrap();
        assert_eq!(outcome, CycleOutcome::Unresolved { timestamp: 3000 });
        assert_eq!(h.store.get("etc").timestamp, 1000);
        assert!(h.sink.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_first_sighting_from_placeholder() {
        let h = harness();
        h.source.push_stats(Ok(stats(1000)));
        h.source.push_blocks(Ok(json!({"matured": [{"height": 400, "timestamp": 1000}]})));

        let outcome = h.watcher.poll_once().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Updated(_)));
        assert_eq!(h.store.get("etc").height, Some(400));
    }

    #[tokio::test]
    async fn test_missing_last_block_found_is_data_not_found() {
        let h = harness();
        h.source.push_stats(Ok(json!({"hashrate": 5, "stats": {}})));

        let err = h.watcher.poll_once().await.unwrap_err();
        assert!(matches!(err, AppError::DataNotFound(_)));
        assert_eq!(*h.source.blocks_calls.lock().unwrap(), 0);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_blocks_fetch_failure_leaves_store_untouched() {
        let h = harness();
        seed(&h.store, 1000, 400);
        h.source.push_stats(Ok(stats(2000)));
        h.source
            .push_blocks(Err(AppError::RemoteUnavailable("connection reset".into())));

        assert!(h.watcher.poll_once().await.is_err());
        assert_eq!(h.store.get("etc").timestamp, 1000);
        assert!(h.sink.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_poll_does_not_block_next_poll() {
        let h = harness();
        seed(&h.store, 1000, 400);
        h.source
            .push_stats(Err(AppError::RemoteUnavailable("timeout".into())));
        h.source.push_stats(Ok(stats(2000)));
        h.source.push_blocks(Ok(json!({"candidates": [{"height": 500, "timestamp": 2000}]})));

        assert!(h.watcher.poll_once().await.is_err());
        let outcome = h.watcher.poll_once().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Updated(_)));
    }

    #[tokio::test]
    async fn test_update_is_persisted() {
        let h = harness();
        h.source.push_stats(Ok(stats(2000)));
        h.source.push_blocks(Ok(json!({"candidates": [{"height": 500, "timestamp": 2000}]})));
        h.watcher.poll_once().await.unwrap();

        let reloaded = BlockStateStore::new(Box::new(JsonFileBackend::new(
            h._tmp.path().join("blocks.json"),
        )));
        reloaded.load_all();
        assert_eq!(reloaded.get("etc").height, Some(500));
    }

    #[tokio::test]
    async fn test_sink_failure_keeps_update() {
        let h = harness();
        let watcher = BlockWatcher::new(
            "etc".to_string(),
            h.source.clone(),
            h.store.clone(),
            Arc::new(FailingSink),
            TimestampChanged,
            Duration::from_millis(10),
        );
        h.source.push_stats(Ok(stats(2000)));
        h.source.push_blocks(Ok(json!({"candidates": [{"height": 500, "timestamp": 2000}]})));

        let outcome = watcher.poll_once().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Updated(_)));
        assert_eq!(h.store.get("etc").timestamp, 2000);
    }

    #[tokio::test]
    async fn test_numeric_string_timestamps_resolve() {
        let h = harness();
        seed(&h.store, 1000, 400);
        h.source
            .push_stats(Ok(json!({"stats": {"lastBlockFound": "2000"}})));
        h.source.push_blocks(Ok(json!({
            "candidates": [{"height": "500", "timestamp": "2000"}]
        })));

        let outcome = h.watcher.poll_once().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Updated(_)));
        assert_eq!(h.store.get("etc").height, Some(500));
        assert_eq!(h.store.get("etc").timestamp, 2000);
        assert_eq!(h.sink.published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_matured_entry_does_not_hide_candidate() {
        let h = harness();
        seed(&h.store, 1000, 400);
        h.source.push_stats(Ok(stats(2000)));
        h.source.push_blocks(Ok(json!({
            "candidates": [{"height": 500, "timestamp": 2000}],
            "matured": [null]
        })));

        let outcome = h.watcher.poll_once().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Updated(_)));
        assert_eq!(h.store.get("etc").height, Some(500));
        assert_eq!(h.sink.published.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_stalled_stats_request() {
        let h = harness();
        let watcher = BlockWatcher::new(
            "etc".to_string(),
            Arc::new(StalledSource),
            h.store.clone(),
            h.sink.clone(),
            TimestampChanged,
            Duration::from_millis(10),
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(watcher.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("watcher did not stop while its request was pending")
            .unwrap();
        assert!(h.sink.published.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_keeps_polling_after_errors_and_stops_on_cancel() {
        let h = harness();
        h.source
            .push_stats(Err(AppError::RemoteUnavailable("down".into())));
        h.source.push_stats(Ok(stats(2000)));
        h.source.push_blocks(Ok(json!({"candidates": [{"height": 500, "timestamp": 2000}]})));

        let cancel = CancellationToken::new();
        let source = h.source.clone();
        let sink = h.sink.clone();
        let task = tokio::spawn(h.watcher.run(cancel.clone()));

        // Paused clock auto-advances through the 10ms ticks
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if !sink.published.lock().unwrap().is_empty() {
                break;
            }
        }
        cancel.cancel();
        task.await.unwrap();

        assert!(*source.stats_calls.lock().unwrap() >= 2);
        assert_eq!(sink.published.lock().unwrap().len(), 1);
        assert_eq!(h.store.get("etc").height, Some(500));
    }
}
