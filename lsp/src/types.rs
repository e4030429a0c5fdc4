//! Public configuration types consumed by the host and the config loader.

use std::collections::BTreeMap;
use std::time::Duration;

use saga_types::{DocumentKind, ENV_SECRET_DENYLIST};
use serde::Deserialize;

pub const DEFAULT_SERVER_COMMAND: &str = "novelsaga_server";
pub const DEFAULT_LOG_LEVEL: &str = "debug";
const DEFAULT_START_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;

/// How to launch and talk to the NovelSaga language server.
///
/// Deserialized from the `[server]` table; every field has a default, so an
/// empty table (or no table at all) yields a working configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Executable name (resolved through `PATH`) or path.
    command: String,
    args: Vec<String>,
    /// Passed to the server as `RUST_LOG`.
    log_level: String,
    /// Extra environment for the server process.
    env: BTreeMap<String, String>,
    /// Patterns of inherited variables to strip before spawning.
    env_denylist: Vec<String>,
    documents: Vec<DocumentKind>,
    start_timeout_secs: u64,
    stop_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_SERVER_COMMAND.to_string(),
            args: vec!["--lsp".to_string()],
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            env: BTreeMap::new(),
            env_denylist: ENV_SECRET_DENYLIST.iter().map(ToString::to_string).collect(),
            documents: DocumentKind::defaults(),
            start_timeout_secs: DEFAULT_START_TIMEOUT_SECS,
            stop_timeout_secs: DEFAULT_STOP_TIMEOUT_SECS,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    #[must_use]
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    #[must_use]
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    #[must_use]
    pub fn env_denylist(&self) -> &[String] {
        &self.env_denylist
    }

    #[must_use]
    pub fn documents(&self) -> &[DocumentKind] {
        &self.documents
    }

    /// Bound on each request round trip, including `initialize`.
    #[must_use]
    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    /// After this the registry entry is force-removed and the process killed.
    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn set_command(&mut self, command: impl Into<String>) {
        self.command = command.into();
    }

    pub fn set_log_level(&mut self, level: impl Into<String>) {
        self.log_level = level.into();
    }

    pub fn set_stop_timeout(&mut self, timeout: Duration) {
        self.stop_timeout_secs = timeout.as_secs();
    }

    /// Apply `f` to the command, every argument and every env value.
    pub fn map_strings(&mut self, f: impl Fn(&str) -> String) {
        self.command = f(&self.command);
        for arg in &mut self.args {
            *arg = f(arg);
        }
        for value in self.env.values_mut() {
            *value = f(value);
        }
    }
}
