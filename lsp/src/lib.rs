//! Per-workspace-folder language client lifecycle for NovelSaga.
//!
//! [`WorkspaceServerRegistry`] keeps exactly one language-server session per
//! open workspace folder. [`WorkspaceHost`] maps workspace events onto it.

pub mod codec;
pub mod types;

mod error;
mod events;
mod host;
mod launch;
pub(crate) mod protocol;
mod registry;
mod session;

pub use error::{LaunchError, SessionError, StartError, StopError};
pub use events::{DocumentChange, FoldersChanged, WorkspaceEvent};
pub use host::WorkspaceHost;
pub use launch::{
    LOG_LEVEL_ENV, LaunchSpec, ProcessLauncher, ServerTransport, TokioLauncher,
    WORKSPACE_FOLDER_ENV,
};
pub use protocol::{PathToUriError, file_uri_to_path, path_to_file_uri};
pub use registry::{
    FolderState, Notifier, ServerInstance, ShutdownReport, StartOutcome, StopOutcome,
    TracingNotifier, WorkspaceServerRegistry,
};
pub use session::{
    ClientFactory, ClientOptions, LanguageClient, SessionFut, StdioClient, StdioClientFactory,
};
pub use types::ServerConfig;
