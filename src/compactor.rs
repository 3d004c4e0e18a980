use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites the WAL once `threshold` appends have piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&engine, threshold).await;
    }
}

/// Returns true if a compaction ran and succeeded.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            error!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("allocd_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(path.clone()).unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();

        let rid = engine.create_resource("Van".into(), "vehicle".into()).await.unwrap();
        assert!(!compact_if_needed(&engine, 5).await);

        for h in 8..12 {
            let eid = engine
                .create_event(
                    "Delivery".into(),
                    None,
                    day.and_hms_opt(h, 0, 0).unwrap(),
                    day.and_hms_opt(h, 30, 0).unwrap(),
                )
                .await
                .unwrap();
            engine.delete_event(eid).await.unwrap();
        }
        assert_eq!(engine.wal_appends_since_compact().await, 9);

        assert!(compact_if_needed(&engine, 5).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        drop(engine);
        let reopened = Engine::new(path).unwrap();
        assert_eq!(reopened.list_resources().await.len(), 1);
        assert_eq!(reopened.get_resource(rid).await.unwrap().name, "Van");
        assert!(reopened.list_events().await.is_empty());
    }
}
