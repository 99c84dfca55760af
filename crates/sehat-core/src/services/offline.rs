//! Process-wide offline support: storage, connectivity, sync and caching
//! behind one service.

use chrono::NaiveDate;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use crate::cache::{
    AssetFetcher, CacheSession, CacheStatus, CacheWorker, CacheWorkerHandle, WorkerPlatform,
};
use crate::config::SyncSettings;
use crate::db::{keys, Database, PersistentStore, SqliteStore};
use crate::error::{Error, Result};
use crate::models::{
    decode_nutrition_log, ActionKind, ActionStatus, ChwShare, NutritionEntry, QueuedAction,
};
use crate::network::{ConnectivityState, NetworkMonitor};
use crate::queue::SyncQueue;
use crate::sync::{
    CycleOutcome, CycleReport, EngineHandle, EngineState, ReconciliationEngine, SyncEndpoint,
    SyncEvent,
};
use crate::util::normalize_text_option;

type RegisterWorker = Box<dyn FnOnce(Database) -> Result<CacheWorkerHandle> + Send>;

/// Builder for [`OfflineSupportService`].
pub struct ServiceBuilder<E> {
    database: Database,
    endpoint: E,
    settings: SyncSettings,
    connectivity: ConnectivityState,
    worker: Option<RegisterWorker>,
}

impl<E: SyncEndpoint> ServiceBuilder<E> {
    /// Use these settings instead of the defaults
    #[must_use]
    pub fn settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Initial platform connectivity (defaults to online)
    #[must_use]
    pub const fn connectivity(mut self, connectivity: ConnectivityState) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// Register a cache worker on the given platform at startup
    #[must_use]
    pub fn cache_worker<F: AssetFetcher>(mut self, platform: WorkerPlatform, fetcher: F) -> Self {
        self.worker = Some(Box::new(move |db| {
            CacheWorker::register(&platform, db, fetcher)
        }));
        self
    }

    /// Start the service.
    ///
    /// Loads or creates the device id, puts actions interrupted mid-delivery
    /// back in line, starts the reconciliation engine and registers the cache
    /// worker. A worker that cannot register leaves the service in degraded
    /// mode; queuing and sync keep working.
    pub async fn init(self) -> Result<OfflineSupportService> {
        let store = SqliteStore::new(self.database.clone());
        let queue = SyncQueue::new(self.database.clone());
        let device_id = load_or_create_device_id(&store)?;

        let recovered = queue.recover_in_flight()?;
        if recovered > 0 {
            tracing::info!("Recovered {recovered} interrupted deliveries");
        }

        let monitor = NetworkMonitor::new(self.connectivity);
        let engine = ReconciliationEngine::new(
            queue.clone(),
            monitor.clone(),
            self.endpoint,
            device_id.clone(),
        )
        .with_policy(self.settings.retry_policy())
        .with_delivery_timeout(self.settings.delivery_timeout())
        .spawn();

        let cache = match self.worker.map(|register| register(self.database.clone())) {
            Some(Ok(handle)) => {
                if self.settings.precache.is_empty() {
                    tracing::debug!("Empty precache manifest, skipping install");
                } else {
                    handle.spawn_install(self.settings.manifest());
                }
                Some(handle)
            }
            Some(Err(error)) => {
                tracing::warn!("Offline asset cache unavailable, continuing without it: {error}");
                None
            }
            None => {
                tracing::warn!("No cache worker configured; offline assets unavailable");
                None
            }
        };

        tracing::info!(
            "Offline support ready ({}, {} pending)",
            monitor.state(),
            queue.pending_count()?
        );
        // Let the engine pick up anything left from a previous run
        tokio::task::yield_now().await;

        Ok(OfflineSupportService {
            store,
            queue,
            monitor,
            engine,
            cache,
            device_id,
        })
    }
}

/// Offline-first facade used by the pages.
///
/// Every user action is persisted locally first and then queued for
/// delivery; the reconciliation engine drains the queue whenever the
/// platform reports connectivity.
pub struct OfflineSupportService {
    store: SqliteStore,
    queue: SyncQueue,
    monitor: NetworkMonitor,
    engine: EngineHandle,
    cache: Option<CacheWorkerHandle>,
    device_id: String,
}

impl std::fmt::Debug for OfflineSupportService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineSupportService")
            .field("device_id", &self.device_id)
            .field("connectivity", &self.monitor.state())
            .field("degraded", &self.is_degraded())
            .finish_non_exhaustive()
    }
}

impl OfflineSupportService {
    /// Start building a service over `database`, delivering to `endpoint`.
    pub fn builder<E: SyncEndpoint>(database: Database, endpoint: E) -> ServiceBuilder<E> {
        ServiceBuilder {
            database,
            endpoint,
            settings: SyncSettings::default(),
            connectivity: ConnectivityState::Online,
            worker: None,
        }
    }

    /// Record a user action and queue it for delivery.
    ///
    /// The data of record and the queued action are written in one
    /// transaction, so the user's change is visible locally even if it never
    /// syncs. On a storage failure neither is written.
    pub fn log_action(&self, kind: ActionKind, payload: &Value) -> Result<QueuedAction> {
        let (key, record) = match kind {
            ActionKind::NutritionLogEntry => {
                let entry: NutritionEntry = decode_payload(kind, payload)?;
                let mut log = self.nutrition_log()?;
                log.push(entry);
                (keys::NUTRITION_LOG, serde_json::to_string(&log)?)
            }
            ActionKind::ChwShare => {
                let share: ChwShare = decode_payload(kind, payload)?;
                (keys::PENDING_CHW_SHARE, serde_json::to_string(&share)?)
            }
        };

        let action = self.queue.enqueue_with_record(kind, payload, key, &record)?;
        if self.monitor.is_online() {
            self.engine.trigger();
        }
        Ok(action)
    }

    /// Log a meal.
    pub fn log_nutrition_entry(&self, food: &str) -> Result<QueuedAction> {
        let entry = NutritionEntry::new(food)?;
        self.log_action(ActionKind::NutritionLogEntry, &serde_json::to_value(&entry)?)
    }

    /// Share the current nutrition log with the community health worker.
    pub fn share_with_chw(&self, date: NaiveDate) -> Result<QueuedAction> {
        let share = ChwShare::from_entries(&self.nutrition_log()?, date)?;
        self.log_action(ActionKind::ChwShare, &serde_json::to_value(&share)?)
    }

    /// The local nutrition log, oldest first.
    pub fn nutrition_log(&self) -> Result<Vec<NutritionEntry>> {
        self.store
            .get(keys::NUTRITION_LOG)?
            .map_or_else(|| Ok(Vec::new()), |raw| decode_nutrition_log(&raw))
    }

    /// The most recent CHW share, if any.
    pub fn pending_share(&self) -> Result<Option<ChwShare>> {
        self.store.get_json(keys::PENDING_CHW_SHARE)
    }

    /// Whether the platform reports no connectivity.
    pub fn is_offline(&self) -> bool {
        !self.monitor.is_online()
    }

    /// Actions pending or in flight; failed ones are not counted.
    pub fn pending_count(&self) -> Result<usize> {
        self.queue.pending_count()
    }

    /// Actions that hit the retry ceiling and wait for a manual retry.
    pub fn failed_actions(&self) -> Result<Vec<QueuedAction>> {
        self.queue.list_by_status(ActionStatus::Failed)
    }

    /// Every action still in the queue, oldest first.
    pub fn queued_actions(&self) -> Result<Vec<QueuedAction>> {
        self.queue.list()
    }

    /// User-triggered retry: re-queue failed actions and drain now.
    ///
    /// Does nothing while offline.
    pub async fn flush(&self) -> Result<CycleReport> {
        if self.is_offline() {
            tracing::info!("Flush requested while offline; actions stay queued");
            return Ok(CycleReport {
                outcome: CycleOutcome::Offline,
                ..CycleReport::default()
            });
        }
        self.engine.flush().await
    }

    /// Run a drain cycle now and wait for it.
    pub async fn drain(&self) -> Result<CycleReport> {
        self.engine.drain_now().await
    }

    /// Feed a platform connectivity signal. Returns whether it changed state.
    pub fn set_connectivity(&self, online: bool) -> bool {
        self.monitor.report(online)
    }

    /// The connectivity monitor, for components that want transitions.
    pub const fn monitor(&self) -> &NetworkMonitor {
        &self.monitor
    }

    /// Delivery progress events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.engine.subscribe()
    }

    /// Current reconciliation engine state.
    pub fn engine_state(&self) -> EngineState {
        self.engine.state()
    }

    /// Watch reconciliation engine state changes.
    pub fn watch_engine_state(&self) -> watch::Receiver<EngineState> {
        self.engine.watch_state()
    }

    /// Open a cache session pinned to the active asset version.
    pub async fn cache_session(&self) -> Result<CacheSession> {
        self.worker()?.open_session().await
    }

    /// Cache worker state.
    pub async fn cache_status(&self) -> Result<CacheStatus> {
        self.worker()?.status().await
    }

    /// Whether the service runs without the cache worker.
    pub const fn is_degraded(&self) -> bool {
        self.cache.is_none()
    }

    /// Installation id used in idempotency keys.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Stop the background tasks and close connectivity subscriptions.
    pub async fn teardown(self) {
        self.engine.shutdown().await;
        if let Some(cache) = self.cache {
            cache.shutdown().await;
        }
        self.monitor.teardown();
        tracing::info!("Offline support stopped");
    }

    fn worker(&self) -> Result<&CacheWorkerHandle> {
        self.cache.as_ref().ok_or_else(|| {
            Error::WorkerUnsupported("offline asset cache is not running".to_string())
        })
    }
}

fn decode_payload<T: serde::de::DeserializeOwned>(kind: ActionKind, payload: &Value) -> Result<T> {
    T::deserialize(payload)
        .map_err(|error| Error::InvalidInput(format!("invalid {kind} payload: {error}")))
}

fn load_or_create_device_id(store: &SqliteStore) -> Result<String> {
    if let Some(id) = normalize_text_option(store.get(keys::DEVICE_ID)?) {
        return Ok(id);
    }
    let id = Uuid::now_v7().to_string();
    store.put(keys::DEVICE_ID, &id)?;
    tracing::info!("Generated device id {id}");
    Ok(id)
}
