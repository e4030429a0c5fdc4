//! Workspace Server Registry: one language-server session per workspace folder.
//!
//! The registry maps each [`FolderKey`] to a *slot*: an async mutex around the
//! folder's optional [`ServerInstance`]. Every operation on a key first obtains
//! that key's single slot (under a short, synchronous map lock) and then holds
//! the slot's async lock for the whole start or stop. That gives:
//!
//! - at most one live session per key, even for concurrent duplicate starts;
//! - no lock held across unrelated folders, so different folders start and
//!   stop concurrently;
//! - stop-then-start ordering per key.
//!
//! Slots are dropped from the map once they are empty and no other operation
//! holds them. A stop waits for the slot's lock and for the session within
//! one stop timeout; if the lock isn't free by then the entry is dropped from
//! the map and the session dies with the last handle to its slot.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::join_all;
use saga_types::{DocumentSelector, FolderKey, WorkspaceFolder, normalize_path};
use url::Url;

use crate::error::{SessionError, StartError, StopError};
use crate::launch::LaunchSpec;
use crate::protocol;
use crate::session::{ClientFactory, ClientOptions, LanguageClient};
use crate::types::ServerConfig;

/// Surfaces user-visible error messages (the editor's error popup).
pub trait Notifier: Send + Sync + 'static {
    fn show_error(&self, message: &str);
}

/// Notifier that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn show_error(&self, message: &str) {
        tracing::error!("{message}");
    }
}

/// Observable lifecycle of one folder's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FolderState {
    Absent,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for FolderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Absent => "absent",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A live session already existed; nothing was launched.
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

/// Result of [`WorkspaceServerRegistry::shutdown_all`].
#[derive(Debug, Default)]
pub struct ShutdownReport {
    attempted: usize,
    failures: Vec<StopError>,
}

impl ShutdownReport {
    /// Number of sessions a stop was issued for.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.attempted
    }

    #[must_use]
    pub fn failures(&self) -> &[StopError] {
        &self.failures
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A started session, exclusively owned by its registry slot.
pub struct ServerInstance<C> {
    key: FolderKey,
    folder: WorkspaceFolder,
    client: C,
    selector: DocumentSelector,
}

impl<C> ServerInstance<C> {
    #[must_use]
    pub fn key(&self) -> &FolderKey {
        &self.key
    }

    #[must_use]
    pub fn folder(&self) -> &WorkspaceFolder {
        &self.folder
    }

    #[must_use]
    pub fn selector(&self) -> &DocumentSelector {
        &self.selector
    }
}

type Slot<C> = Arc<tokio::sync::Mutex<Option<ServerInstance<C>>>>;

struct SlotEntry<C> {
    slot: Slot<C>,
    state: FolderState,
}

pub struct WorkspaceServerRegistry<F: ClientFactory> {
    factory: F,
    config: ServerConfig,
    notifier: Arc<dyn Notifier>,
    slots: Mutex<HashMap<FolderKey, SlotEntry<F::Client>>>,
    /// Set by `shutdown_all`; no session starts afterwards.
    closing: AtomicBool,
}

impl<F: ClientFactory> WorkspaceServerRegistry<F> {
    pub fn new(factory: F, config: ServerConfig) -> Self {
        Self {
            factory,
            config,
            notifier: Arc::new(TracingNotifier),
            slots: Mutex::new(HashMap::new()),
            closing: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: impl Notifier) -> Self {
        self.notifier = Arc::new(notifier);
        self
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Start the session for `folder` unless one is already live.
    ///
    /// On failure nothing is stored, the user is notified, and a later call
    /// may retry.
    pub async fn start_server_for_folder(
        &self,
        folder: &WorkspaceFolder,
    ) -> Result<StartOutcome, StartError> {
        let key = folder.key();
        let slot = self.acquire(&key);
        let result = self.start_in_slot(&key, folder, &slot).await;
        self.release(&key, slot);
        result
    }

    async fn start_in_slot(
        &self,
        key: &FolderKey,
        folder: &WorkspaceFolder,
        slot: &Slot<F::Client>,
    ) -> Result<StartOutcome, StartError> {
        let mut guard = slot.lock().await;
        if guard.is_some() {
            tracing::debug!(folder = %key, "Server for '{}' already running", folder.name());
            return Ok(StartOutcome::AlreadyRunning);
        }
        if self.closing.load(Ordering::SeqCst) {
            tracing::debug!(folder = %key, "Shutting down, not starting '{}'", folder.name());
            return Err(StartError::Cancelled {
                folder: folder.name().to_string(),
            });
        }
        self.set_state(key, FolderState::Starting);

        let selector = match DocumentSelector::for_folder(folder, self.config.documents()) {
            Ok(selector) => selector,
            Err(source) => {
                let err = StartError::Selector {
                    folder: folder.name().to_string(),
                    source,
                };
                self.set_state(key, FolderState::Absent);
                self.report_start_failure(key, folder, &err);
                return Err(err);
            }
        };

        let launch = LaunchSpec::for_folder(&self.config, folder);
        let options = ClientOptions::new(
            folder.clone(),
            selector.clone(),
            self.config.start_timeout(),
        );
        let mut client = self.factory.create(launch, options);

        tracing::info!(folder = %key, "Starting NovelSaga server for '{}'", folder.name());
        match client.start().await {
            Ok(()) if !self.owns(key, slot) => {
                // A stop gave up waiting for this start and dropped the entry.
                tracing::info!(
                    folder = %key,
                    "Start of '{}' was abandoned, stopping it",
                    folder.name()
                );
                if let Err(e) = self.stop_client(&mut client).await {
                    tracing::warn!(folder = %key, "Stopping abandoned server failed: {e}");
                }
                Err(StartError::Cancelled {
                    folder: folder.name().to_string(),
                })
            }
            Ok(()) => {
                *guard = Some(ServerInstance {
                    key: key.clone(),
                    folder: folder.clone(),
                    client,
                    selector,
                });
                self.set_state(key, FolderState::Running);
                tracing::info!(folder = %key, "NovelSaga server for '{}' running", folder.name());
                Ok(StartOutcome::Started)
            }
            Err(source) => {
                let err = StartError::Session {
                    folder: folder.name().to_string(),
                    source,
                };
                self.set_state(key, FolderState::Absent);
                self.report_start_failure(key, folder, &err);
                Err(err)
            }
        }
    }

    fn report_start_failure(&self, key: &FolderKey, folder: &WorkspaceFolder, err: &StartError) {
        tracing::warn!(folder = %key, "Failed to start server for '{}': {err}", folder.name());
        self.notifier.show_error(&format!(
            "Failed to start NovelSaga server for {}: {err}",
            folder.name()
        ));
    }

    /// Stop the session for `folder`, if any.
    ///
    /// The entry is removed whether the stop succeeds, fails or times out.
    pub async fn stop_server_for_folder(
        &self,
        folder: &WorkspaceFolder,
    ) -> Result<StopOutcome, StopError> {
        self.stop_key(&folder.key()).await
    }

    /// [`stop_server_for_folder`](Self::stop_server_for_folder) by key.
    pub async fn stop_key(&self, key: &FolderKey) -> Result<StopOutcome, StopError> {
        let present = self.lock_slots().contains_key(key);
        if !present {
            tracing::debug!(folder = %key, "No server to stop");
            return Ok(StopOutcome::NotRunning);
        }
        let slot = self.acquire(key);
        let result = self.stop_in_slot(key, &slot).await;
        self.release(key, slot);
        result
    }

    async fn stop_in_slot(
        &self,
        key: &FolderKey,
        slot: &Slot<F::Client>,
    ) -> Result<StopOutcome, StopError> {
        let timeout = self.config.stop_timeout();
        let deadline = tokio::time::Instant::now() + timeout;
        let Ok(mut guard) = tokio::time::timeout_at(deadline, slot.lock()).await else {
            self.forget(key, slot);
            let err = StopError::TimedOut {
                folder: key.to_string(),
                timeout,
            };
            tracing::warn!(folder = %key, "Folder stayed busy, dropping its entry: {err}");
            return Err(err);
        };
        let Some(mut instance) = guard.take() else {
            tracing::debug!(folder = %key, "No server to stop");
            return Ok(StopOutcome::NotRunning);
        };
        self.set_state(key, FolderState::Stopping);

        let name = instance.folder.name().to_string();
        tracing::info!(folder = %key, "Stopping NovelSaga server for '{name}'");
        let outcome = tokio::time::timeout_at(deadline, instance.client.stop()).await;
        // Dropping the session kills a process that ignored shutdown.
        drop(instance);
        self.set_state(key, FolderState::Absent);

        match outcome {
            Ok(Ok(())) => Ok(StopOutcome::Stopped),
            Ok(Err(source)) => {
                let err = StopError::Shutdown {
                    folder: name,
                    source,
                };
                tracing::warn!(folder = %key, "{err}");
                Err(err)
            }
            Err(_) => {
                let err = StopError::TimedOut {
                    folder: name,
                    timeout,
                };
                tracing::warn!(folder = %key, "{err}");
                Err(err)
            }
        }
    }

    async fn stop_client(&self, client: &mut F::Client) -> Result<(), SessionError> {
        let timeout = self.config.stop_timeout();
        match tokio::time::timeout(timeout, client.stop()).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "no reply to shutdown within {}s",
                timeout.as_secs()
            )
            .into()),
        }
    }

    /// Stop every live session concurrently, then clear the registry.
    ///
    /// New starts are refused from the moment this is called, for the rest
    /// of the registry's life. The registry is empty afterwards regardless of
    /// individual failures.
    pub async fn shutdown_all(&self) -> ShutdownReport {
        self.closing.store(true, Ordering::SeqCst);
        let slots = self.snapshot(|_| true);
        let results = join_all(
            slots
                .iter()
                .map(|(key, slot)| self.stop_in_slot(key, slot)),
        )
        .await;
        self.lock_slots().clear();

        let mut report = ShutdownReport::default();
        for result in results {
            match result {
                Ok(StopOutcome::Stopped) => report.attempted += 1,
                Ok(StopOutcome::NotRunning) => {}
                Err(err) => {
                    report.attempted += 1;
                    report.failures.push(err);
                }
            }
        }
        tracing::info!(
            attempted = report.attempted,
            failed = report.failures.len(),
            "All NovelSaga servers stopped"
        );
        report
    }

    /// Send the full text of a document to every running session whose
    /// selector matches it. Returns how many sessions were notified.
    pub async fn notify_document_changed(&self, path: &Path, language: &str, text: &str) -> usize {
        let uri = match protocol::path_to_file_uri(&normalize_path(path)) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::debug!("Ignoring document event: {e}");
                return 0;
            }
        };

        let timeout = self.config.start_timeout();
        let mut notified = 0;
        // Starting slots are skipped so a slow start doesn't stall routing.
        for (key, slot) in self.snapshot(|state| state == FolderState::Running) {
            let forward = forward_document(&slot, &uri, language, text);
            match tokio::time::timeout(timeout, forward).await {
                Ok(Some(Ok(()))) => notified += 1,
                Ok(Some(Err(e))) => {
                    tracing::warn!(folder = %key, "Failed to forward {uri}: {e}");
                }
                Ok(None) => {}
                Err(_) => {
                    tracing::warn!(
                        folder = %key,
                        "Server did not take {uri} within {}s",
                        timeout.as_secs()
                    );
                }
            }
            self.release(&key, slot);
        }
        if notified == 0 {
            tracing::trace!("No session accepts {uri} ({language})");
        }
        notified
    }

    #[must_use]
    pub fn state(&self, key: &FolderKey) -> FolderState {
        self.lock_slots()
            .get(key)
            .map_or(FolderState::Absent, |entry| entry.state)
    }

    /// Whether a live session exists for `key` (running or stopping).
    #[must_use]
    pub fn contains(&self, key: &FolderKey) -> bool {
        is_live(self.state(key))
    }

    /// Keys with a live session, sorted.
    #[must_use]
    pub fn folder_keys(&self) -> Vec<FolderKey> {
        let mut keys: Vec<FolderKey> = self
            .lock_slots()
            .iter()
            .filter(|(_, entry)| is_live(entry.state))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_slots()
            .values()
            .filter(|entry| is_live(entry.state))
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<FolderKey, SlotEntry<F::Client>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The single slot for `key`, created empty if absent.
    fn acquire(&self, key: &FolderKey) -> Slot<F::Client> {
        let mut slots = self.lock_slots();
        let entry = slots.entry(key.clone()).or_insert_with(|| SlotEntry {
            slot: Arc::new(tokio::sync::Mutex::new(None)),
            state: FolderState::Absent,
        });
        Arc::clone(&entry.slot)
    }

    /// Whether `slot` is still the map's slot for `key`.
    fn owns(&self, key: &FolderKey, slot: &Slot<F::Client>) -> bool {
        self.lock_slots()
            .get(key)
            .is_some_and(|entry| Arc::ptr_eq(&entry.slot, slot))
    }

    /// Drop the map entry for `key` if it still points at `slot`.
    fn forget(&self, key: &FolderKey, slot: &Slot<F::Client>) {
        let mut slots = self.lock_slots();
        if slots
            .get(key)
            .is_some_and(|entry| Arc::ptr_eq(&entry.slot, slot))
        {
            slots.remove(key);
        }
    }

    /// Drop the map entry if its slot is empty and nobody else holds it.
    fn release(&self, key: &FolderKey, slot: Slot<F::Client>) {
        let mut slots = self.lock_slots();
        let Some(entry) = slots.get(key) else {
            return;
        };
        // Two references: the map's and ours.
        if Arc::ptr_eq(&entry.slot, &slot)
            && Arc::strong_count(&slot) == 2
            && slot.try_lock().is_ok_and(|guard| guard.is_none())
        {
            slots.remove(key);
        }
    }

    fn snapshot(&self, keep: impl Fn(FolderState) -> bool) -> Vec<(FolderKey, Slot<F::Client>)> {
        self.lock_slots()
            .iter()
            .filter(|(_, entry)| keep(entry.state))
            .map(|(key, entry)| (key.clone(), Arc::clone(&entry.slot)))
            .collect()
    }

    fn set_state(&self, key: &FolderKey, state: FolderState) {
        if let Some(entry) = self.lock_slots().get_mut(key) {
            entry.state = state;
        }
    }
}

/// `None` when the slot is empty or the document isn't for this session.
async fn forward_document<C: LanguageClient>(
    slot: &Slot<C>,
    uri: &Url,
    language: &str,
    text: &str,
) -> Option<Result<(), SessionError>> {
    let mut guard = slot.lock().await;
    let instance = guard.as_mut()?;
    if !instance.selector.matches_uri(uri, language) {
        return None;
    }
    Some(instance.client.notify_document(uri, language, text).await)
}

fn is_live(state: FolderState) -> bool {
    matches!(state, FolderState::Running | FolderState::Stopping)
}
