//! Maps workspace events onto registry operations.

use std::sync::Arc;

use futures_util::future::join_all;
use saga_types::WorkspaceFolder;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::events::{DocumentChange, FoldersChanged, WorkspaceEvent};
use crate::registry::{ShutdownReport, WorkspaceServerRegistry};
use crate::session::ClientFactory;

pub struct WorkspaceHost<F: ClientFactory> {
    registry: Arc<WorkspaceServerRegistry<F>>,
}

impl<F: ClientFactory> WorkspaceHost<F> {
    pub fn new(registry: WorkspaceServerRegistry<F>) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &WorkspaceServerRegistry<F> {
        &self.registry
    }

    /// Start a session for every folder already open, concurrently.
    ///
    /// Failures are reported by the registry and don't stop other folders.
    pub async fn activate(&self, folders: &[WorkspaceFolder]) {
        tracing::info!("Activating NovelSaga client for {} folder(s)", folders.len());
        let results = join_all(
            folders
                .iter()
                .map(|folder| self.registry.start_server_for_folder(folder)),
        )
        .await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            tracing::warn!("{failed} of {} server(s) failed to start", folders.len());
        }
    }

    /// Start each added folder, then stop each removed one.
    pub async fn on_folders_changed(&self, change: FoldersChanged) {
        apply_folder_change(&self.registry, change).await;
    }

    /// Returns how many sessions received the document.
    pub async fn on_document_changed(&self, change: &DocumentChange) -> usize {
        self.registry
            .notify_document_changed(&change.path, &change.language, &change.text)
            .await
    }

    pub async fn deactivate(&self) -> ShutdownReport {
        tracing::info!("Deactivating NovelSaga client");
        self.registry.shutdown_all().await
    }

    /// Drive the host from `events` until `Shutdown` or the channel closes,
    /// then tear every session down.
    ///
    /// Folder batches apply in arrival order on background tasks, one batch at
    /// a time, so a slow start never delays document routing.
    pub async fn run(&self, mut events: mpsc::Receiver<WorkspaceEvent>) -> ShutdownReport {
        let mut batches: Option<mpsc::UnboundedSender<FoldersChanged>> = None;
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(WorkspaceEvent::Folders(change)) if !change.is_empty() => {
                        let tx = batches.get_or_insert_with(|| {
                            let (tx, rx) = mpsc::unbounded_channel();
                            tasks.spawn(apply_batches(Arc::clone(&self.registry), rx));
                            tx
                        });
                        if tx.send(change).is_err() {
                            tracing::warn!("Folder worker gone, dropping folder change");
                        }
                    }
                    Some(WorkspaceEvent::Folders(_)) => {}
                    Some(WorkspaceEvent::Document(change)) => {
                        self.on_document_changed(&change).await;
                    }
                    Some(WorkspaceEvent::Shutdown) => {
                        tracing::debug!("Shutdown requested");
                        break;
                    }
                    None => {
                        tracing::debug!("Event source closed");
                        break;
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    batches = None;
                    if let Err(e) = joined {
                        tracing::warn!("Folder worker failed: {e}");
                    }
                }
            }
        }

        // Let queued batches finish so no start races the teardown.
        drop(batches);
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::warn!("Folder worker failed: {e}");
            }
        }
        self.deactivate().await
    }
}

async fn apply_batches<F: ClientFactory>(
    registry: Arc<WorkspaceServerRegistry<F>>,
    mut rx: mpsc::UnboundedReceiver<FoldersChanged>,
) {
    while let Some(change) = rx.recv().await {
        apply_folder_change(&registry, change).await;
    }
}

async fn apply_folder_change<F: ClientFactory>(
    registry: &WorkspaceServerRegistry<F>,
    change: FoldersChanged,
) {
    tracing::debug!(
        added = change.added.len(),
        removed = change.removed.len(),
        "Workspace folders changed"
    );
    // Errors are reported by the registry; one folder never blocks the rest.
    for folder in &change.added {
        let _ = registry.start_server_for_folder(folder).await;
    }
    for folder in &change.removed {
        let _ = registry.stop_server_for_folder(folder).await;
    }
}
