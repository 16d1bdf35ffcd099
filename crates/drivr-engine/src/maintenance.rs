//! Background maintenance.

use std::sync::Arc;
use std::time::Duration;

use crate::engine::Engine;

/// Spawn a task that runs [`Engine::run_maintenance`] every `interval`.
///
/// The task runs until the returned handle is aborted or the runtime stops.
pub fn start_maintenance_task(engine: Arc<Engine>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let report = engine.run_maintenance().await;
            if report.sessions_swept > 0
                || report.cache_entries_purged > 0
                || report.idle_clients_pruned > 0
            {
                tracing::debug!(
                    sessions_swept = report.sessions_swept,
                    cache_entries_purged = report.cache_entries_purged,
                    idle_clients_pruned = report.idle_clients_pruned,
                    "Maintenance pass completed"
                );
            }
        }
    })
}
