//! Shared test utilities and fixtures
//!
//! A scripted [`ClientFactory`] whose sessions record every lifecycle call in
//! a shared journal, so tests can assert exact start/stop sequences without
//! spawning real servers.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use saga_lsp::{
    ClientFactory, ClientOptions, LanguageClient, LaunchSpec, Notifier, ServerConfig,
    SessionError, SessionFut, WorkspaceServerRegistry,
};
use saga_types::WorkspaceFolder;
use url::Url;

/// Ordered log of `start:<name>`, `stop:<name>` and `doc:<name>` entries.
#[derive(Debug, Default, Clone)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Entries starting with `prefix`, e.g. `"stop:"`.
    pub fn count(&self, prefix: &str) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().unwrap().iter().position(|e| e == entry)
    }
}

#[derive(Debug, Default, Clone)]
struct Script {
    fail_start: HashSet<String>,
    fail_stop: HashSet<String>,
    hang_stop: HashSet<String>,
    hang_document: HashSet<String>,
    start_delay: Duration,
    stop_delay: Duration,
}

/// Factory for sessions that behave as scripted per folder name.
#[derive(Default)]
pub struct MockFactory {
    script: Script,
    journal: Journal,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_start(mut self, name: &str) -> Self {
        self.script.fail_start.insert(name.to_string());
        self
    }

    pub fn fail_stop(mut self, name: &str) -> Self {
        self.script.fail_stop.insert(name.to_string());
        self
    }

    pub fn hang_stop(mut self, name: &str) -> Self {
        self.script.hang_stop.insert(name.to_string());
        self
    }

    /// The session accepts no documents: forwarding never completes.
    pub fn hang_document(mut self, name: &str) -> Self {
        self.script.hang_document.insert(name.to_string());
        self
    }

    pub fn start_delay(mut self, delay: Duration) -> Self {
        self.script.start_delay = delay;
        self
    }

    pub fn stop_delay(mut self, delay: Duration) -> Self {
        self.script.stop_delay = delay;
        self
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }
}

pub struct MockClient {
    name: String,
    script: Script,
    journal: Journal,
}

impl ClientFactory for MockFactory {
    type Client = MockClient;

    fn create(&self, _launch: LaunchSpec, options: ClientOptions) -> MockClient {
        MockClient {
            name: options.folder().name().to_string(),
            script: self.script.clone(),
            journal: self.journal.clone(),
        }
    }
}

impl LanguageClient for MockClient {
    fn start(&mut self) -> SessionFut<'_> {
        Box::pin(async move {
            if !self.script.start_delay.is_zero() {
                tokio::time::sleep(self.script.start_delay).await;
            }
            self.journal.push(format!("start:{}", self.name));
            if self.script.fail_start.contains(&self.name) {
                return Err(SessionError::InitializeRejected("scripted failure".into()));
            }
            Ok(())
        })
    }

    fn stop(&mut self) -> SessionFut<'_> {
        Box::pin(async move {
            self.journal.push(format!("stop:{}", self.name));
            if !self.script.stop_delay.is_zero() {
                tokio::time::sleep(self.script.stop_delay).await;
            }
            if self.script.hang_stop.contains(&self.name) {
                std::future::pending::<()>().await;
            }
            if self.script.fail_stop.contains(&self.name) {
                return Err(SessionError::ShutdownRejected("scripted failure".into()));
            }
            Ok(())
        })
    }

    fn notify_document<'a>(
        &'a mut self,
        _uri: &'a Url,
        _language_id: &'a str,
        _text: &'a str,
    ) -> SessionFut<'a> {
        Box::pin(async move {
            self.journal.push(format!("doc:{}", self.name));
            if self.script.hang_document.contains(&self.name) {
                std::future::pending::<()>().await;
            }
            Ok(())
        })
    }
}

/// Collects user-visible error messages.
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier(Arc<Mutex<Vec<String>>>);

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn show_error(&self, message: &str) {
        self.0.lock().unwrap().push(message.to_string());
    }
}

/// A folder under a fixed absolute root; no filesystem access.
pub fn folder(name: &str) -> WorkspaceFolder {
    #[cfg(windows)]
    let path = format!(r"C:\workspace\{name}");
    #[cfg(not(windows))]
    let path = format!("/workspace/{name}");
    WorkspaceFolder::from_path(path).unwrap()
}

pub fn registry(factory: MockFactory) -> WorkspaceServerRegistry<MockFactory> {
    WorkspaceServerRegistry::new(factory, ServerConfig::default())
}

pub fn registry_with_stop_timeout(
    factory: MockFactory,
    timeout: Duration,
) -> WorkspaceServerRegistry<MockFactory> {
    let mut config = ServerConfig::default();
    config.set_stop_timeout(timeout);
    WorkspaceServerRegistry::new(factory, config)
}
