//! Failure types for launching, running, starting and stopping sessions.

use std::io;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("{command} not found in PATH")]
    NotFound {
        command: String,
        #[source]
        source: which::Error,
    },
    #[error("spawning {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("no {0} pipe from child")]
    MissingPipe(&'static str),
}

/// A language-client session failed.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error("initialize rejected by server: {0}")]
    InitializeRejected(String),
    #[error("shutdown rejected by server: {0}")]
    ShutdownRejected(String),
    #[error("session already started")]
    AlreadyStarted,
    #[error("session is not running")]
    NotRunning,
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

/// StartFailure: the folder keeps no registry entry.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("invalid document selector for '{folder}': {source}")]
    Selector {
        folder: String,
        #[source]
        source: saga_types::SelectorError,
    },
    #[error("{source}")]
    Session {
        folder: String,
        #[source]
        source: SessionError,
    },
    /// The registry is shutting down, or a stop gave up on the folder while
    /// it was starting.
    #[error("start of server for '{folder}' was cancelled")]
    Cancelled { folder: String },
}

impl StartError {
    #[must_use]
    pub fn folder(&self) -> &str {
        match self {
            Self::Selector { folder, .. }
            | Self::Session { folder, .. }
            | Self::Cancelled { folder } => folder,
        }
    }
}

/// StopFailure: the entry has already been removed when this is returned.
#[derive(Debug, Error)]
pub enum StopError {
    #[error("stopping server for '{folder}' failed: {source}")]
    Shutdown {
        folder: String,
        #[source]
        source: SessionError,
    },
    #[error("stopping server for '{folder}' timed out after {}s", timeout.as_secs())]
    TimedOut { folder: String, timeout: Duration },
}

impl StopError {
    #[must_use]
    pub fn folder(&self) -> &str {
        match self {
            Self::Shutdown { folder, .. } | Self::TimedOut { folder, .. } => folder,
        }
    }
}
