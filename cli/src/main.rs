//! NovelSaga client - keeps one language server running per workspace folder.
//!
//! ```text
//! main() -> SagaConfig + CLI overrides -> stdin / Ctrl-C tasks
//!                                               |
//!                                  WorkspaceHost::activate(folders)
//!                                               |
//!                                  WorkspaceHost::run(events)
//!                                               |
//!                                               v
//!                                  shutdown_all() -> exit
//! ```
//!
//! Event lines look like:
//!
//! ```text
//! {"event":"folders","added":[{"path":"/w/book"}],"removed":[]}
//! {"event":"document","path":"/w/book/ch1.md","language":"markdown","text":"..."}
//! {"event":"shutdown"}
//! ```

mod input;

use std::env;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use saga_config::SagaConfig;
use saga_lsp::{
    Notifier, StdioClientFactory, TokioLauncher, WorkspaceEvent, WorkspaceHost,
    WorkspaceServerRegistry,
};
use saga_types::WorkspaceFolder;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Parser)]
#[command(
    name = "novelsaga-client",
    version,
    about = "Run one NovelSaga language server per workspace folder"
)]
struct Cli {
    /// Config file (default: ~/.novelsaga/client.toml).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Server executable, overriding the config.
    #[arg(long, value_name = "COMMAND")]
    server: Option<String>,

    /// `RUST_LOG` passed to each server.
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Workspace folders open at startup (default: current directory).
    #[arg(value_name = "FOLDER")]
    folders: Vec<PathBuf>,
}

/// User-visible errors go to stderr, outside the log stream.
struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn show_error(&self, message: &str) {
        eprintln!("novelsaga-client: {message}");
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_ansi(io::stderr().is_terminal())
                .with_writer(io::stderr),
        )
        .with(env_filter)
        .init();
}

fn resolve_folders(paths: &[PathBuf]) -> Result<Vec<WorkspaceFolder>> {
    let cwd = env::current_dir().context("reading current directory")?;
    if paths.is_empty() {
        return Ok(vec![WorkspaceFolder::from_path(&cwd)?]);
    }
    paths
        .iter()
        .map(|path| {
            let absolute = absolutize(&cwd, path);
            WorkspaceFolder::from_path(&absolute)
                .with_context(|| format!("invalid workspace folder {}", path.display()))
        })
        .collect()
}

fn absolutize(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut config = match &cli.config {
        Some(path) => SagaConfig::load_from(path)?,
        None => SagaConfig::load()?,
    };
    let server = config.server_mut();
    if let Some(command) = cli.server {
        server.set_command(command);
    }
    if let Some(level) = cli.log_level {
        server.set_log_level(level);
    }

    let folders = resolve_folders(&cli.folders)?;

    let registry = WorkspaceServerRegistry::new(
        StdioClientFactory::new(TokioLauncher),
        config.into_server(),
    )
    .with_notifier(StderrNotifier);
    let host = WorkspaceHost::new(registry);

    // Ctrl-C must be caught during activation too. Events queue until `run`.
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    let signal_tx = tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, shutting down");
            let _ = signal_tx.send(WorkspaceEvent::Shutdown).await;
        }
    });

    tokio::spawn(async move {
        let stdin = BufReader::new(tokio::io::stdin());
        match input::pump_events(stdin, &tx).await {
            Ok(count) => tracing::debug!("stdin closed after {count} event(s)"),
            Err(e) => tracing::warn!("Failed to read events from stdin: {e}"),
        }
        let _ = tx.send(WorkspaceEvent::Shutdown).await;
    });

    host.activate(&folders).await;
    let report = host.run(rx).await;
    for failure in report.failures() {
        tracing::warn!("{failure}");
    }

    // A pending stdin read would keep the runtime from shutting down.
    std::process::exit(i32::from(!report.is_clean()));
}
