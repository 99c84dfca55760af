//! Cache worker task: install, activation and fetch handling

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::strategy::respond;
use super::{
    precache_name, AssetFetcher, AssetResponse, CacheManifest, CacheStorage, FetchStrategy,
    VersionState, WorkerPlatform, RUNTIME_CACHE,
};
use crate::db::Database;
use crate::error::{Error, Result};

/// Result of an install request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The version was precached and is now serving
    Activated,
    /// Precached; activates once sessions on the old version close
    Waiting,
    /// That version is already serving
    AlreadyActive,
}

/// Snapshot of the worker's cache state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStatus {
    /// Version serving sessions
    pub active: Option<String>,
    /// Precached version waiting for activation
    pub waiting: Option<String>,
    /// Version currently being installed
    pub installing: Option<String>,
    /// Open sessions
    pub sessions: usize,
    /// Entries in the active precache
    pub precached: usize,
    /// Entries in the runtime cache
    pub runtime: usize,
}

enum WorkerMessage {
    Install {
        manifest: CacheManifest,
        reply: oneshot::Sender<Result<InstallOutcome>>,
    },
    Staged {
        manifest: CacheManifest,
        result: Result<()>,
        reply: oneshot::Sender<Result<InstallOutcome>>,
    },
    OpenSession {
        reply: oneshot::Sender<u64>,
    },
    CloseSession {
        id: u64,
    },
    Fetch {
        session: u64,
        url: String,
        reply: oneshot::Sender<Result<AssetResponse>>,
    },
    Status {
        reply: oneshot::Sender<Result<CacheStatus>>,
    },
    Shutdown,
}

/// Background task serving cached assets.
///
/// All state lives in the task; callers talk to it through a
/// [`CacheWorkerHandle`] or a [`CacheSession`].
pub struct CacheWorker<F> {
    storage: CacheStorage,
    fetcher: Arc<F>,
    messages: mpsc::WeakUnboundedSender<WorkerMessage>,
    active: Option<CacheManifest>,
    waiting: Option<CacheManifest>,
    installing: Option<String>,
    // Session id -> version it was opened against
    sessions: HashMap<u64, Option<String>>,
    next_session: u64,
}

impl<F: AssetFetcher> CacheWorker<F> {
    /// Register the worker and start its task.
    ///
    /// Fails with `WorkerUnsupported` on platforms without background
    /// workers and on preview hosts. A version left waiting by a previous
    /// run is activated right away, since no session can hold it back yet.
    pub fn register(
        platform: &WorkerPlatform,
        db: Database,
        fetcher: F,
    ) -> Result<CacheWorkerHandle> {
        platform.ensure_supported()?;

        let storage = CacheStorage::new(db);
        let active = storage.version_in_state(VersionState::Active)?;
        let waiting = storage.version_in_state(VersionState::Waiting)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut worker = Self {
            storage,
            fetcher: Arc::new(fetcher),
            messages: tx.downgrade(),
            active,
            waiting,
            installing: None,
            sessions: HashMap::new(),
            next_session: 1,
        };
        if worker.waiting.is_some() {
            worker.activate_waiting()?;
        }

        tracing::info!(
            "Cache worker registered on {} (active version: {})",
            platform.host,
            worker.active_version().unwrap_or("none")
        );
        let task = tokio::spawn(worker.run(rx));
        Ok(CacheWorkerHandle { messages: tx, task })
    }

    async fn run(mut self, mut messages: mpsc::UnboundedReceiver<WorkerMessage>) {
        while let Some(message) = messages.recv().await {
            match message {
                WorkerMessage::Install { manifest, reply } => self.begin_install(manifest, reply),
                WorkerMessage::Staged {
                    manifest,
                    result,
                    reply,
                } => {
                    let outcome = self.finish_install(manifest, result);
                    let _ = reply.send(outcome);
                }
                WorkerMessage::OpenSession { reply } => {
                    let id = self.next_session;
                    self.next_session += 1;
                    let pinned = self.active_version().map(ToString::to_string);
                    self.sessions.insert(id, pinned);
                    let _ = reply.send(id);
                }
                WorkerMessage::CloseSession { id } => {
                    self.sessions.remove(&id);
                    if self.waiting.is_some() && self.can_activate() {
                        if let Err(error) = self.activate_waiting() {
                            tracing::error!("Cache activation failed: {error}");
                        }
                    }
                }
                WorkerMessage::Fetch {
                    session,
                    url,
                    reply,
                } => self.fetch(session, url, reply),
                WorkerMessage::Status { reply } => {
                    let _ = reply.send(self.status());
                }
                WorkerMessage::Shutdown => break,
            }
        }
        tracing::debug!("Cache worker stopped");
    }

    fn active_version(&self) -> Option<&str> {
        self.active.as_ref().map(|manifest| manifest.version.as_str())
    }

    /// No open session still uses the active version.
    fn can_activate(&self) -> bool {
        let Some(active) = self.active_version() else {
            return true;
        };
        self.sessions
            .values()
            .all(|pinned| pinned.as_deref() != Some(active))
    }

    fn begin_install(
        &mut self,
        manifest: CacheManifest,
        reply: oneshot::Sender<Result<InstallOutcome>>,
    ) {
        if self.active_version() == Some(manifest.version.as_str()) {
            let _ = reply.send(Ok(InstallOutcome::AlreadyActive));
            return;
        }
        if self
            .waiting
            .as_ref()
            .is_some_and(|waiting| waiting.version == manifest.version)
        {
            let _ = reply.send(Ok(InstallOutcome::Waiting));
            return;
        }
        if let Some(installing) = &self.installing {
            let _ = reply.send(Err(Error::InvalidInput(format!(
                "install of version {installing} already in progress"
            ))));
            return;
        }
        let Some(messages) = self.messages.upgrade() else {
            return;
        };

        tracing::info!(
            "Installing cache version {} ({} assets)",
            manifest.version,
            manifest.assets.len()
        );
        self.installing = Some(manifest.version.clone());
        let storage = self.storage.clone();
        let fetcher = Arc::clone(&self.fetcher);
        tokio::spawn(async move {
            let result = stage(&storage, fetcher.as_ref(), &manifest).await;
            let _ = messages.send(WorkerMessage::Staged {
                manifest,
                result,
                reply,
            });
        });
    }

    fn finish_install(
        &mut self,
        manifest: CacheManifest,
        result: Result<()>,
    ) -> Result<InstallOutcome> {
        self.installing = None;
        let precache = precache_name(&manifest.version);

        if let Err(error) = result {
            tracing::warn!(
                "Cache install of version {} failed, keeping {}: {error}",
                manifest.version,
                self.active_version().unwrap_or("no version")
            );
            self.storage.delete_cache(&precache)?;
            return Err(error);
        }

        self.storage.record_version(&manifest, VersionState::Waiting)?;
        if let Some(superseded) = self.waiting.replace(manifest) {
            self.storage
                .discard_version(&superseded.version, &precache_name(&superseded.version))?;
        }

        if self.can_activate() {
            self.activate_waiting()?;
            Ok(InstallOutcome::Activated)
        } else {
            tracing::info!("Cache {precache} waiting for open sessions to close");
            Ok(InstallOutcome::Waiting)
        }
    }

    fn activate_waiting(&mut self) -> Result<()> {
        let Some(next) = self.waiting.take() else {
            return Ok(());
        };
        let previous = self
            .active
            .as_ref()
            .map(|manifest| (manifest.version.clone(), precache_name(&manifest.version)));

        if let Err(error) = self.storage.activate(
            &next.version,
            previous
                .as_ref()
                .map(|(version, precache)| (version.as_str(), precache.as_str())),
        ) {
            self.waiting = Some(next);
            return Err(error);
        }

        // Sessions opened before any version was active adopt this one
        for pinned in self.sessions.values_mut() {
            if pinned.is_none() {
                *pinned = Some(next.version.clone());
            }
        }
        tracing::info!(
            "Activated cache version {} (replaced {})",
            next.version,
            previous.as_ref().map_or("nothing", |(version, _)| version.as_str())
        );
        self.active = Some(next);
        Ok(())
    }

    fn fetch(&self, session: u64, url: String, reply: oneshot::Sender<Result<AssetResponse>>) {
        let Some(pinned) = self.sessions.get(&session) else {
            let _ = reply.send(Err(Error::NotFound(format!("cache session {session}"))));
            return;
        };

        // Only the active or a waiting version can be pinned
        let manifest = [self.active.as_ref(), self.waiting.as_ref()]
            .into_iter()
            .flatten()
            .find(|manifest| Some(manifest.version.as_str()) == pinned.as_deref());
        let strategy = FetchStrategy::for_request(&url, manifest);
        let precache = pinned.as_deref().map(precache_name);

        let storage = self.storage.clone();
        let fetcher = Arc::clone(&self.fetcher);
        tokio::spawn(async move {
            let response =
                respond(&storage, fetcher.as_ref(), strategy, precache.as_deref(), &url).await;
            let _ = reply.send(response);
        });
    }

    fn status(&self) -> Result<CacheStatus> {
        let precached = match self.active_version() {
            Some(version) => self.storage.entry_count(&precache_name(version))?,
            None => 0,
        };
        Ok(CacheStatus {
            active: self.active_version().map(ToString::to_string),
            waiting: self.waiting.as_ref().map(|manifest| manifest.version.clone()),
            installing: self.installing.clone(),
            sessions: self.sessions.len(),
            precached,
            runtime: self.storage.entry_count(RUNTIME_CACHE)?,
        })
    }
}

/// Fetch every manifest asset into the version's precache.
async fn stage<F: AssetFetcher>(
    storage: &CacheStorage,
    fetcher: &F,
    manifest: &CacheManifest,
) -> Result<()> {
    let precache = precache_name(&manifest.version);
    // Leftovers from an interrupted install
    storage.delete_cache(&precache)?;

    for url in &manifest.assets {
        let asset = fetcher.fetch(url).await?;
        if !asset.is_success() {
            return Err(Error::Fetch(format!("{url} returned HTTP {}", asset.status)));
        }
        storage.put(&precache, url, &asset)?;
    }
    Ok(())
}

/// Handle to a registered [`CacheWorker`].
pub struct CacheWorkerHandle {
    messages: mpsc::UnboundedSender<WorkerMessage>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for CacheWorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheWorkerHandle").finish_non_exhaustive()
    }
}

impl CacheWorkerHandle {
    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> WorkerMessage,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.messages
            .send(message(reply))
            .map_err(|_| Error::TaskStopped("cache worker"))?;
        rx.await.map_err(|_| Error::TaskStopped("cache worker"))
    }

    /// Precache a manifest and activate it when possible.
    pub async fn install(&self, manifest: CacheManifest) -> Result<InstallOutcome> {
        self.request(|reply| WorkerMessage::Install { manifest, reply })
            .await?
    }

    /// Start an install without waiting for it; the outcome is logged.
    pub fn spawn_install(&self, manifest: CacheManifest) {
        let version = manifest.version.clone();
        let (reply, rx) = oneshot::channel();
        if self
            .messages
            .send(WorkerMessage::Install { manifest, reply })
            .is_err()
        {
            tracing::warn!("Cache worker stopped before installing version {version}");
            return;
        }
        tokio::spawn(async move {
            match rx.await {
                Ok(Ok(outcome)) => tracing::debug!("Cache install of {version}: {outcome:?}"),
                Ok(Err(error)) => tracing::warn!("Cache install of {version} failed: {error}"),
                Err(_) => tracing::debug!("Cache worker stopped during install of {version}"),
            }
        });
    }

    /// Open a session pinned to the currently active version.
    pub async fn open_session(&self) -> Result<CacheSession> {
        let id = self
            .request(|reply| WorkerMessage::OpenSession { reply })
            .await?;
        Ok(CacheSession {
            id,
            messages: self.messages.clone(),
        })
    }

    /// Current cache state.
    pub async fn status(&self) -> Result<CacheStatus> {
        self.request(|reply| WorkerMessage::Status { reply }).await?
    }

    /// Stop the worker task.
    pub async fn shutdown(self) {
        let _ = self.messages.send(WorkerMessage::Shutdown);
        if let Err(error) = self.task.await {
            tracing::error!("Cache worker task failed: {error}");
        }
    }
}

/// A page session served by the cache worker.
///
/// Holds a lease on the version that was active when it opened; a newer
/// version activates only after every such lease is dropped.
pub struct CacheSession {
    id: u64,
    messages: mpsc::UnboundedSender<WorkerMessage>,
}

impl std::fmt::Debug for CacheSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheSession").field("id", &self.id).finish()
    }
}

impl CacheSession {
    /// Session id
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Answer a request through the worker's fetch strategies.
    pub async fn fetch(&self, url: &str) -> Result<AssetResponse> {
        let (reply, rx) = oneshot::channel();
        self.messages
            .send(WorkerMessage::Fetch {
                session: self.id,
                url: url.to_string(),
                reply,
            })
            .map_err(|_| Error::TaskStopped("cache worker"))?;
        rx.await.map_err(|_| Error::TaskStopped("cache worker"))?
    }
}

impl Drop for CacheSession {
    fn drop(&mut self) {
        let _ = self.messages.send(WorkerMessage::CloseSession { id: self.id });
    }
}
