use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::store::MemoryStore;

/// Background task that compacts the WAL once `threshold` events have been
/// appended since the last compaction. Checks every `every`.
pub async fn run_compactor(store: Arc<MemoryStore>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        compact_if_due(&store, threshold).await;
    }
}

/// One compactor pass. Returns true if a compaction ran.
pub async fn compact_if_due(store: &MemoryStore, threshold: u64) -> bool {
    let appends = store.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    debug!("{appends} WAL appends since last compaction, compacting");
    match store.compact_wal().await {
        Ok(()) => true,
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Directory;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("shareit_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let store = MemoryStore::open(&path).unwrap();
        store.register_user(1).await.unwrap();
        store.list_item(1, 1, true).await.unwrap();

        assert!(!compact_if_due(&store, 5).await);
        for i in 0..4 {
            store.set_item_available(1, i % 2 == 0).await.unwrap();
        }
        assert_eq!(store.wal_appends_since_compact().await, 6);
        assert!(compact_if_due(&store, 5).await);
        assert_eq!(store.wal_appends_since_compact().await, 0);
        assert!(!compact_if_due(&store, 5).await);
    }

    #[tokio::test]
    async fn background_loop_compacts() {
        let path = test_wal_path("loop.wal");
        let store = Arc::new(MemoryStore::open(&path).unwrap());
        store.register_user(1).await.unwrap();
        store.register_user(2).await.unwrap();

        let task = tokio::spawn(run_compactor(store.clone(), 2, Duration::from_millis(10)));
        let mut compacted = false;
        for _ in 0..100 {
            if store.wal_appends_since_compact().await == 0 {
                compacted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        task.abort();
        assert!(compacted, "compactor never ran");

        drop(store);
        let reopened = MemoryStore::open(&path).unwrap();
        assert!(reopened.user_exists(2).await.unwrap());
    }
}
