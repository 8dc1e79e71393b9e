//! Debounced, single-flight persistence of the DB.
//!
//! At most one save is in flight at a time (`SaveState` transitions
//! `Idle -> Saving -> Idle` through a compare-exchange). Requests that arrive
//! while a save is running are skipped. The dirty flag is cleared before the
//! snapshot is taken, and the running save checks it again when it finishes,
//! so a mutation that lands mid-save is written by a follow-up save.

use chrono::Utc;
use convoke_config::{PersistenceConfig, ScopeDefaults};
use convoke_core::error::StorageError;
use convoke_core::event::{DomainEvent, EventBus};
use convoke_core::storage::StorageBackend;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::db::Db;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SaveState {
    Idle = 0,
    Saving = 1,
}

impl SaveState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Saving,
            _ => Self::Idle,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved { bytes: usize, duration: Duration },
    /// Another save was already in flight.
    Skipped,
    Failed(String),
}

/// Resets the state to `Idle` however the save ends.
struct SavingGuard<'a>(&'a AtomicU8);

impl Drop for SavingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(SaveState::Idle as u8, Ordering::Release);
    }
}

/// Load the DB from storage, or start empty when nothing was saved yet.
pub async fn load_db(
    storage: &dyn StorageBackend,
    defaults: ScopeDefaults,
) -> Result<Db, StorageError> {
    match storage.load().await? {
        Some(bytes) => {
            let db = Db::from_bytes(&bytes, defaults)?;
            info!(
                backend = storage.name(),
                scopes = db.scope_ids().await.len(),
                "Loaded DB"
            );
            Ok(db)
        }
        None => {
            info!(backend = storage.name(), "No saved DB found, starting empty");
            Ok(Db::new(defaults))
        }
    }
}

pub struct PersistenceManager {
    db: Arc<Db>,
    storage: Arc<dyn StorageBackend>,
    config: PersistenceConfig,
    state: AtomicU8,
    dirty: AtomicBool,
    completed: AtomicU64,
    periodic: Mutex<Option<JoinHandle<()>>>,
    events: Option<Arc<EventBus>>,
}

impl PersistenceManager {
    pub fn new(db: Arc<Db>, storage: Arc<dyn StorageBackend>, config: PersistenceConfig) -> Self {
        Self {
            db,
            storage,
            config,
            state: AtomicU8::new(SaveState::Idle as u8),
            dirty: AtomicBool::new(false),
            completed: AtomicU64::new(0),
            periodic: Mutex::new(None),
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn db(&self) -> &Arc<Db> {
        &self.db
    }

    pub fn state(&self) -> SaveState {
        SaveState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Number of saves that reached storage.
    pub fn completed_saves(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    /// Snapshot the DB and write it out, unless a save is already running.
    ///
    /// If the DB was marked dirty while writing, saves again before returning.
    pub async fn save(&self) -> SaveOutcome {
        let mut outcome = self.save_once().await;
        while matches!(outcome, SaveOutcome::Saved { .. }) && self.is_dirty() {
            debug!("DB changed during save, saving again");
            match self.save_once().await {
                SaveOutcome::Skipped => break,
                next => outcome = next,
            }
        }
        outcome
    }

    async fn save_once(&self) -> SaveOutcome {
        if self
            .state
            .compare_exchange(
                SaveState::Idle as u8,
                SaveState::Saving as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            debug!("Save already in progress, skipping");
            return SaveOutcome::Skipped;
        }
        let guard = SavingGuard(&self.state);

        self.dirty.store(false, Ordering::Release);
        let start = Instant::now();

        let result = match self.db.snapshot().await {
            Ok(bytes) => {
                let len = bytes.len();
                self.storage.save(bytes).await.map(|_| len)
            }
            Err(e) => Err(e),
        };
        drop(guard);

        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                self.mark_dirty();
                error!(backend = self.storage.name(), error = %e, "Failed to save DB");
                return SaveOutcome::Failed(e.to_string());
            }
        };

        let duration = start.elapsed();
        let previous = self.completed.fetch_add(1, Ordering::AcqRel);
        if previous == 0 {
            info!(bytes, duration_ms = duration.as_millis() as u64, "DB saved");
        } else {
            debug!(bytes, duration_ms = duration.as_millis() as u64, "DB saved");
        }

        if let Some(events) = &self.events {
            events.publish(DomainEvent::SaveCompleted {
                bytes,
                duration_ms: duration.as_millis() as u64,
                timestamp: Utc::now(),
            });
        }

        if self.is_periodic_running() && !self.db.any_persisting().await {
            self.stop_periodic();
        }

        SaveOutcome::Saved { bytes, duration }
    }

    /// Mark the DB dirty and save in the background.
    pub fn schedule(self: &Arc<Self>) {
        self.mark_dirty();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.save().await;
        });
    }

    /// Save, waiting out any save already in flight.
    pub async fn flush(&self) -> SaveOutcome {
        loop {
            match self.save().await {
                SaveOutcome::Skipped => tokio::time::sleep(Duration::from_millis(10)).await,
                outcome => return outcome,
            }
        }
    }

    pub fn is_periodic_running(&self) -> bool {
        self.periodic
            .lock()
            .map(|h| h.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Start the periodic save loop if it is not already running.
    pub fn start_periodic(self: &Arc<Self>) {
        let Ok(mut slot) = self.periodic.lock() else {
            warn!("Periodic save handle poisoned, not starting");
            return;
        };
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let this = Arc::clone(self);
        let initial_delay = self.config.initial_delay();
        let interval = self.config.interval();
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(initial_delay).await;
            loop {
                if !this.db.any_persisting().await {
                    info!("No scope persists conversations, stopping periodic saves");
                    break;
                }
                if this.is_dirty() {
                    this.save().await;
                }
                tokio::time::sleep(interval).await;
            }
        }));
        info!(
            interval_secs = interval.as_secs(),
            "Periodic save loop started"
        );
    }

    /// Restart the periodic loop when some scope persists conversations.
    pub async fn ensure_periodic(self: &Arc<Self>) {
        if !self.is_periodic_running() && self.db.any_persisting().await {
            self.start_periodic();
        }
    }

    pub fn stop_periodic(&self) {
        if let Ok(mut slot) = self.periodic.lock()
            && let Some(handle) = slot.take()
        {
            handle.abort();
            info!("Periodic save loop cancelled");
        }
    }

    /// Cancel the periodic loop and write a final snapshot.
    pub async fn shutdown(&self) -> SaveOutcome {
        self.stop_periodic();
        self.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryStorage;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    /// Blocks every save until released.
    struct GatedStorage {
        inner: InMemoryStorage,
        entered: Notify,
        release: Notify,
    }

    impl GatedStorage {
        fn new() -> Self {
            Self {
                inner: InMemoryStorage::new(),
                entered: Notify::new(),
                release: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl StorageBackend for GatedStorage {
        fn name(&self) -> &str {
            "gated"
        }

        async fn load(&self) -> Result<Option<Vec<u8>>, StorageError> {
            self.inner.load().await
        }

        async fn save(&self, data: Vec<u8>) -> Result<(), StorageError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.save(data).await
        }
    }

    struct FailingStorage;

    #[async_trait]
    impl StorageBackend for FailingStorage {
        fn name(&self) -> &str {
            "failing"
        }

        async fn load(&self) -> Result<Option<Vec<u8>>, StorageError> {
            Ok(None)
        }

        async fn save(&self, _data: Vec<u8>) -> Result<(), StorageError> {
            Err(StorageError::Io {
                path: "/dev/null".into(),
                reason: "disk full".into(),
            })
        }
    }

    fn manager(storage: Arc<dyn StorageBackend>) -> Arc<PersistenceManager> {
        let db = Arc::new(Db::new(ScopeDefaults::default()));
        Arc::new(PersistenceManager::new(db, storage, PersistenceConfig::default()))
    }

    #[tokio::test]
    async fn concurrent_save_is_skipped_and_late_mutation_is_captured() {
        let storage = Arc::new(GatedStorage::new());
        let pm = manager(storage.clone());
        pm.db().scope(1).await;

        let first = {
            let pm = pm.clone();
            tokio::spawn(async move { pm.save().await })
        };
        storage.entered.notified().await;
        assert_eq!(pm.state(), SaveState::Saving);

        // Second request while the first is in flight
        assert_eq!(pm.save().await, SaveOutcome::Skipped);

        // Mutation after the in-flight snapshot was taken
        pm.db().scope(2).await;
        pm.mark_dirty();
        storage.release.notify_one();

        // The running save goes again on its own
        storage.entered.notified().await;
        assert_eq!(storage.inner.save_count(), 1);
        let saved = storage.inner.contents().unwrap();
        assert!(Db::from_bytes(&saved, ScopeDefaults::default()).unwrap().get(2).await.is_none());

        storage.release.notify_one();
        assert!(matches!(first.await.unwrap(), SaveOutcome::Saved { .. }));
        assert_eq!(storage.inner.save_count(), 2);
        assert_eq!(pm.state(), SaveState::Idle);
        assert!(!pm.is_dirty());

        let saved = storage.inner.contents().unwrap();
        let restored = Db::from_bytes(&saved, ScopeDefaults::default()).unwrap();
        assert_eq!(restored.scope_ids().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn scheduled_mutation_during_save_is_written_without_periodic_loop() {
        let storage = Arc::new(GatedStorage::new());
        let pm = manager(storage.clone());
        pm.db().scope(1).await;
        assert!(!pm.db().any_persisting().await);

        pm.schedule();
        storage.entered.notified().await;

        // A memory-style mutation while that save is in flight
        pm.db().scope(3).await;
        pm.schedule();
        storage.release.notify_one();

        storage.entered.notified().await;
        storage.release.notify_one();
        for _ in 0..100 {
            if storage.inner.save_count() == 2 && pm.state() == SaveState::Idle {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(!pm.is_periodic_running());
        assert_eq!(storage.inner.save_count(), 2);
        assert!(!pm.is_dirty());
        let saved = storage.inner.contents().unwrap();
        let restored = Db::from_bytes(&saved, ScopeDefaults::default()).unwrap();
        assert_eq!(restored.scope_ids().await, vec![1, 3]);
    }

    #[tokio::test]
    async fn failed_save_marks_dirty_again() {
        let pm = manager(Arc::new(FailingStorage));
        pm.mark_dirty();

        let outcome = pm.save().await;
        assert!(matches!(outcome, SaveOutcome::Failed(ref reason) if reason.contains("disk full")));
        assert!(pm.is_dirty());
        assert_eq!(pm.state(), SaveState::Idle);
        assert_eq!(pm.completed_saves(), 0);
    }

    #[tokio::test]
    async fn schedule_saves_in_background() {
        let storage = Arc::new(InMemoryStorage::new());
        let pm = manager(storage.clone());
        pm.db().scope(7).await;

        pm.schedule();
        for _ in 0..100 {
            if storage.save_count() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(storage.save_count(), 1);
        assert!(!pm.is_dirty());
    }

    #[tokio::test]
    async fn save_publishes_event() {
        let storage = Arc::new(InMemoryStorage::new());
        let db = Arc::new(Db::new(ScopeDefaults::default()));
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let pm = PersistenceManager::new(db, storage, PersistenceConfig::default())
            .with_events(bus.clone());

        pm.save().await;
        let event = rx.recv().await.unwrap();
        assert!(matches!(event.as_ref(), DomainEvent::SaveCompleted { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_loop_saves_dirty_db_and_stops_without_persisting_scopes() {
        let storage = Arc::new(InMemoryStorage::new());
        let pm = manager(storage.clone());
        pm.db().scope(1).await.write().await.persist_conversations = true;

        pm.ensure_periodic().await;
        assert!(pm.is_periodic_running());

        pm.mark_dirty();
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(storage.save_count(), 1);

        // Not dirty: the next tick writes nothing
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(storage.save_count(), 1);

        pm.db().scope(1).await.write().await.persist_conversations = false;
        tokio::time::sleep(Duration::from_secs(121)).await;
        assert!(!pm.is_periodic_running());

        // Restartable once a scope persists again
        pm.db().scope(1).await.write().await.persist_conversations = true;
        pm.ensure_periodic().await;
        assert!(pm.is_periodic_running());
        pm.stop_periodic();
        assert!(!pm.is_periodic_running());
    }

    #[tokio::test]
    async fn load_db_from_empty_and_saved_storage() {
        let empty = InMemoryStorage::new();
        let db = load_db(&empty, ScopeDefaults::default()).await.unwrap();
        assert!(db.scope_ids().await.is_empty());

        let source = Db::new(ScopeDefaults::default());
        source.scope(99).await;
        let seeded = InMemoryStorage::with_document(source.snapshot().await.unwrap());
        let db = load_db(&seeded, ScopeDefaults::default()).await.unwrap();
        assert_eq!(db.scope_ids().await, vec![99]);
    }

    #[tokio::test]
    async fn shutdown_flushes() {
        let storage = Arc::new(InMemoryStorage::new());
        let pm = manager(storage.clone());
        pm.db().scope(3).await;
        assert!(matches!(pm.shutdown().await, SaveOutcome::Saved { .. }));
        assert_eq!(storage.save_count(), 1);
    }
}
