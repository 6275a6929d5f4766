use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

/// Periodically rewrites the WAL once `threshold` appends have piled up
/// since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            debug!("compactor: {appends} appends, below {threshold}");
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compactor: folded {appends} appends"),
            Err(e) => warn!("compactor: compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewServicePoint;
    use crate::notify::NotifyHub;
    use std::collections::BTreeSet;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("tireslot_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_after_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Arc::new(Engine::new(path.clone(), Arc::new(NotifyHub::default())).unwrap());
        let point = engine
            .create_service_point(NewServicePoint {
                partner_id: Ulid::new(),
                name: "Depot".into(),
                city_id: None,
                location: None,
                default_slot_duration: 30,
                status: Default::default(),
                offered_categories: BTreeSet::new(),
            })
            .await
            .unwrap();
        for _ in 0..3 {
            engine
                .set_offered_categories(point.id, BTreeSet::from([Ulid::new()]))
                .await
                .unwrap();
        }
        assert_eq!(engine.wal_appends_since_compact().await, 4);

        let task = tokio::spawn(run_compactor(engine.clone(), 2, Duration::from_millis(10)));
        for _ in 0..100 {
            if engine.wal_appends_since_compact().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        task.abort();
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        drop(engine);
        let replayed = crate::wal::Wal::replay(&path).unwrap();
        assert_eq!(replayed.events.len(), 1);
        let _ = std::fs::remove_file(&path);
    }
}
