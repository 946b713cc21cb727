//! Periodic auto-save
//!
//! An [`AutoSaver`] saves whatever its snapshot closure returns on a fixed
//! interval. Ticks are independent of manual saves to the same key; both
//! go through the facade lock, so the later write wins with a whole payload.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::data::DataFacade;
use crate::observability::Logger;

/// Handle on a running auto-save task
#[derive(Debug)]
pub struct AutoSaver {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<u64>,
}

impl AutoSaver {
    /// Starts saving `snapshot()` under `store`/`key` every `period`.
    ///
    /// A tick where `snapshot` returns `None` writes nothing. The first save
    /// happens one full period after start.
    pub fn start<F>(
        facade: Arc<DataFacade>,
        store: impl Into<String>,
        key: impl Into<String>,
        period: Duration,
        snapshot: F,
    ) -> Self
    where
        F: Fn() -> Option<Value> + Send + 'static,
    {
        let store = store.into();
        let key = key.into();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut timer = tokio::time::interval(period);
            // interval() fires immediately on the first tick
            timer.tick().await;
            let mut saves = 0u64;

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let Some(data) = snapshot() else { continue };
                        if facade.save_data(&store, &key, data).await {
                            saves += 1;
                        } else {
                            Logger::warn("AUTOSAVE_FAILED", &[("store", &store), ("key", &key)]);
                        }
                    }
                    _ = &mut stop_rx => break,
                }
            }
            saves
        });

        Self { stop_tx, task }
    }

    /// Stops the task and returns how many saves it performed
    pub async fn stop(self) -> u64 {
        // Err means the task already ended
        let _ = self.stop_tx.send(());
        self.task.await.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_autosaver_saves_latest_snapshot() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::new(dir.path()).with_store_names(["notes"]);
        let facade = Arc::new(DataFacade::open(&config, config.registry().unwrap()));

        let counter = Arc::new(AtomicU64::new(0));
        let source = Arc::clone(&counter);
        let saver = AutoSaver::start(
            Arc::clone(&facade),
            "notes",
            "draft",
            Duration::from_millis(10),
            move || Some(json!({"rev": source.fetch_add(1, Ordering::SeqCst)})),
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        let saves = saver.stop().await;
        assert!(saves >= 1);

        let stored = facade.load_data("notes", "draft").await.unwrap();
        assert_eq!(stored["rev"].as_u64().unwrap(), counter.load(Ordering::SeqCst) - 1);
    }

    #[tokio::test]
    async fn test_none_snapshot_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::new(dir.path()).with_store_names(["notes"]);
        let facade = Arc::new(DataFacade::open(&config, config.registry().unwrap()));

        let saver = AutoSaver::start(Arc::clone(&facade), "notes", "draft", Duration::from_millis(5), || None);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(saver.stop().await, 0);
        assert!(facade.load_data("notes", "draft").await.is_none());
    }
}
