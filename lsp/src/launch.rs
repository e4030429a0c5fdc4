//! Launching the language server for one workspace folder.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use saga_types::WorkspaceFolder;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, ChildStderr, Command};

use crate::error::LaunchError;
use crate::types::ServerConfig;

/// Tells the server which folder it serves.
pub const WORKSPACE_FOLDER_ENV: &str = "WORKSPACE_FOLDER";
/// Diagnostics verbosity of the server's own logging.
pub const LOG_LEVEL_ENV: &str = "RUST_LOG";

/// Everything needed to spawn one server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    command: String,
    args: Vec<String>,
    cwd: PathBuf,
    env: BTreeMap<String, String>,
    env_denylist: Vec<String>,
    /// Folder display name, used to tag forwarded server output.
    label: String,
}

impl LaunchSpec {
    /// Working directory is the folder; env carries the folder path and log level.
    #[must_use]
    pub fn for_folder(config: &ServerConfig, folder: &WorkspaceFolder) -> Self {
        let mut env = config.env().clone();
        env.insert(
            WORKSPACE_FOLDER_ENV.to_string(),
            folder.path().to_string_lossy().into_owned(),
        );
        env.insert(LOG_LEVEL_ENV.to_string(), config.log_level().to_string());
        Self {
            command: config.command().to_string(),
            args: config.args().to_vec(),
            cwd: folder.path().to_path_buf(),
            env,
            env_denylist: config.env_denylist().to_vec(),
            label: folder.name().to_string(),
        }
    }

    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    #[must_use]
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    #[must_use]
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Names of inherited variables from `inherited` that must not reach the server.
    ///
    /// Variables set explicitly in [`env`](Self::env) are never stripped.
    pub fn stripped_vars<'a>(
        &self,
        inherited: impl IntoIterator<Item = &'a str>,
    ) -> Vec<&'a str> {
        inherited
            .into_iter()
            .filter(|key| !self.env.contains_key(*key))
            .filter(|key| {
                let upper = key.to_uppercase();
                self.env_denylist
                    .iter()
                    .any(|pat| env_glob_matches(pat, &upper))
            })
            .collect()
    }
}

/// Byte streams a session speaks LSP over, plus the process behind them.
pub struct ServerTransport {
    pub(crate) reader: Box<dyn AsyncRead + Send + Unpin>,
    pub(crate) writer: Box<dyn AsyncWrite + Send + Unpin>,
    pub(crate) child: Option<Child>,
}

impl ServerTransport {
    /// Take stdin/stdout from a spawned child. Stderr is left to the caller.
    pub fn from_child(mut child: Child) -> Result<Self, LaunchError> {
        let stdout = child.stdout.take().ok_or(LaunchError::MissingPipe("stdout"))?;
        let stdin = child.stdin.take().ok_or(LaunchError::MissingPipe("stdin"))?;
        Ok(Self {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            child: Some(child),
        })
    }

    /// A transport with no process behind it (in-process servers, tests).
    pub fn from_streams(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            child: None,
        }
    }
}

/// Spawns server processes. Implementations must not block.
pub trait ProcessLauncher: Send + Sync + 'static {
    fn launch(&self, spec: &LaunchSpec) -> Result<ServerTransport, LaunchError>;
}

/// Spawns the real server binary with tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLauncher;

impl ProcessLauncher for TokioLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<ServerTransport, LaunchError> {
        let resolved = which::which(spec.command()).map_err(|source| LaunchError::NotFound {
            command: spec.command().to_string(),
            source,
        })?;

        let mut cmd = Command::new(&resolved);
        cmd.args(spec.args())
            .current_dir(spec.cwd())
            .envs(spec.env())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let inherited: Vec<String> = std::env::vars_os()
            .filter_map(|(key, _)| key.into_string().ok())
            .collect();
        for key in spec.stripped_vars(inherited.iter().map(String::as_str)) {
            cmd.env_remove(key);
        }

        let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            command: spec.command().to_string(),
            source,
        })?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr, spec.label().to_string()));
        }

        tracing::debug!(
            folder = spec.label(),
            pid = child.id(),
            "Spawned {}",
            resolved.display()
        );
        ServerTransport::from_child(child)
    }
}

/// The server logs to stderr; surface each line as a tracing event.
async fn forward_stderr(stderr: ChildStderr, label: String) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::debug!(target: "saga_lsp::server", folder = %label, "{line}");
            }
            Ok(None) => break,
            Err(e) => {
                tracing::trace!(folder = %label, "Server stderr closed: {e}");
                break;
            }
        }
    }
}

/// Minimal glob matcher for env var denylist patterns.
/// Handles `*_SUFFIX`, `PREFIX_*`, `*_INFIX*`, and exact match.
/// Both pattern and key are compared in uppercase.
fn env_glob_matches(pattern: &str, key_upper: &str) -> bool {
    let pat = pattern.to_uppercase();
    match (pat.strip_prefix('*'), pat.strip_suffix('*')) {
        (Some(rest), Some(_)) if rest.len() > 1 => key_upper.contains(&rest[..rest.len() - 1]),
        (Some(suffix), None) => key_upper.ends_with(suffix),
        (None, Some(prefix)) => key_upper.starts_with(prefix),
        (Some(_), Some(_)) => true,
        (None, None) => key_upper == pat,
    }
}
