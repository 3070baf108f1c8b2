use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::sync::{SyncEngine, SyncOutcome};

/// Runs `perform_sync` on a background thread every `interval` until
/// stopped or dropped. The first pass starts immediately.
pub struct PeriodicSync {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicSync {
    pub fn start(engine: Arc<SyncEngine>, interval: Duration) -> Self {
        let (stop, stopped) = channel::<()>();
        let handle = thread::spawn(move || loop {
            match engine.perform_sync() {
                Ok(SyncOutcome::Busy) => log::info!("Periodic sync skipped, a pass is still running"),
                Ok(SyncOutcome::Finished(_)) => {}
                Err(e) => log::error!("Periodic sync failed: {:#}", e),
            }
            match stopped.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });
        Self {
            stop: Some(stop),
            handle: Some(handle),
        }
    }

    /// Uses the engine's configured `sync_interval`.
    pub fn from_config(engine: Arc<SyncEngine>) -> Self {
        let interval = engine.config().sync_interval;
        Self::start(engine, interval)
    }

    /// Waits for a running pass to finish, then stops.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Periodic sync thread panicked");
            }
        }
    }
}

impl Drop for PeriodicSync {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounting;
    use crate::administration::MockAdministration;
    use crate::registry::Registry;
    use crate::sync::{SyncConfig, SyncEvent};
    use serde_json::json;

    #[test]
    fn runs_until_stopped() -> anyhow::Result<()> {
        let administration = MockAdministration::new();
        administration.insert("contacts", json!({"id": "1", "version": 1, "company_name": "Landolfio"}))?;
        let engine = Arc::new(
            SyncEngine::builder()
                .administration(Arc::new(administration.clone()))
                .registry(Registry::new(vec![accounting::contacts()]))
                .config(SyncConfig::default())
                .build()?,
        );
        let events = engine.notifier().observer();

        let periodic = PeriodicSync::start(engine.clone(), Duration::from_millis(10));
        let mut finished = 0;
        while finished < 2 {
            if let SyncEvent::Finished(_) = events.recv_timeout(Duration::from_secs(5))? {
                finished += 1;
            }
        }
        periodic.stop();

        let requests = administration.requests()?.len();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(administration.requests()?.len(), requests);
        let contacts = engine.db().transaction(|t| t.moneybird_ids("contacts", None))?;
        assert_eq!(contacts, vec!["1".to_string()]);
        Ok(())
    }
}
