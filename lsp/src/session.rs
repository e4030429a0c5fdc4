//! Language-client sessions: one RPC connection to one server process.
//!
//! [`LanguageClient`] is the seam the registry drives; [`StdioClient`] is the
//! production implementation speaking LSP over a [`ServerTransport`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use saga_types::{DocumentSelector, WorkspaceFolder};
use serde_json::Value;
use tokio::process::Child;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use url::Url;

use crate::codec::{FrameReader, FrameWriter};
use crate::error::SessionError;
use crate::launch::{LaunchSpec, ProcessLauncher, ServerTransport};
use crate::protocol::{self, Incoming, Notification, Request};

pub type SessionFut<'a> = Pin<Box<dyn Future<Output = Result<(), SessionError>> + Send + 'a>>;

/// How long the server gets to exit after `exit` before it is killed.
const EXIT_GRACE: Duration = Duration::from_secs(2);

const WRITER_CHANNEL_CAPACITY: usize = 64;

/// Client-side settings for one session, scoped to one folder.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    folder: WorkspaceFolder,
    selector: DocumentSelector,
    client_name: String,
    output_name: String,
    request_timeout: Duration,
}

impl ClientOptions {
    #[must_use]
    pub fn new(folder: WorkspaceFolder, selector: DocumentSelector, request_timeout: Duration) -> Self {
        let client_name = format!("NovelSaga Language Server ({})", folder.name());
        let output_name = format!("NovelSaga LSP ({})", folder.name());
        Self {
            folder,
            selector,
            client_name,
            output_name,
            request_timeout,
        }
    }

    #[must_use]
    pub fn folder(&self) -> &WorkspaceFolder {
        &self.folder
    }

    #[must_use]
    pub fn selector(&self) -> &DocumentSelector {
        &self.selector
    }

    #[must_use]
    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    /// Name server output is reported under.
    #[must_use]
    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

/// One RPC session with a language server.
pub trait LanguageClient: Send + 'static {
    /// Launch and complete the handshake. Resolves once the server is usable.
    fn start(&mut self) -> SessionFut<'_>;

    /// Graceful shutdown. Stopping a session that never started is a no-op.
    fn stop(&mut self) -> SessionFut<'_>;

    /// Send the full text of a document the session is responsible for.
    fn notify_document<'a>(
        &'a mut self,
        uri: &'a Url,
        language_id: &'a str,
        text: &'a str,
    ) -> SessionFut<'a>;
}

/// Builds unstarted sessions for the registry.
pub trait ClientFactory: Send + Sync + 'static {
    type Client: LanguageClient;

    fn create(&self, launch: LaunchSpec, options: ClientOptions) -> Self::Client;
}

pub struct StdioClientFactory<L> {
    launcher: Arc<L>,
}

impl<L: ProcessLauncher> StdioClientFactory<L> {
    pub fn new(launcher: L) -> Self {
        Self {
            launcher: Arc::new(launcher),
        }
    }
}

impl<L: ProcessLauncher> ClientFactory for StdioClientFactory<L> {
    type Client = StdioClient<L>;

    fn create(&self, launch: LaunchSpec, options: ClientOptions) -> Self::Client {
        StdioClient {
            launcher: Arc::clone(&self.launcher),
            launch,
            options,
            state: ClientState::Idle,
        }
    }
}

enum ClientState {
    Idle,
    Running(RunningServer),
    Stopped,
}

pub struct StdioClient<L> {
    launcher: Arc<L>,
    launch: LaunchSpec,
    options: ClientOptions,
    state: ClientState,
}

impl<L: ProcessLauncher> LanguageClient for StdioClient<L> {
    fn start(&mut self) -> SessionFut<'_> {
        Box::pin(async move {
            if !matches!(self.state, ClientState::Idle) {
                return Err(SessionError::AlreadyStarted);
            }
            let transport = self.launcher.launch(&self.launch)?;
            let server = RunningServer::start(transport, &self.options).await?;
            self.state = ClientState::Running(server);
            Ok(())
        })
    }

    fn stop(&mut self) -> SessionFut<'_> {
        Box::pin(async move {
            match std::mem::replace(&mut self.state, ClientState::Stopped) {
                ClientState::Running(server) => server.shutdown().await,
                ClientState::Idle | ClientState::Stopped => Ok(()),
            }
        })
    }

    fn notify_document<'a>(
        &'a mut self,
        uri: &'a Url,
        language_id: &'a str,
        text: &'a str,
    ) -> SessionFut<'a> {
        Box::pin(async move {
            match &mut self.state {
                ClientState::Running(server) => {
                    server.notify_document(uri.as_str(), language_id, text).await?;
                    Ok(())
                }
                ClientState::Idle | ClientState::Stopped => Err(SessionError::NotRunning),
            }
        })
    }
}

enum WriterCommand {
    Send(Value),
    Close,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// A server that completed `initialize`. Holding one is proof of a live handshake.
struct RunningServer {
    label: String,
    child: Option<Child>,
    writer_tx: mpsc::Sender<WriterCommand>,
    next_id: u64,
    pending: PendingMap,
    /// Last version sent per document URI; presence means didOpen was sent.
    doc_versions: HashMap<String, i32>,
    request_timeout: Duration,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
}

impl RunningServer {
    async fn start(transport: ServerTransport, options: &ClientOptions) -> Result<Self, SessionError> {
        let ServerTransport {
            reader,
            writer,
            child,
        } = transport;
        let label = options.folder().name().to_string();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);
        let writer_label = label.clone();
        let writer_handle = tokio::spawn(async move {
            let mut writer = FrameWriter::new(writer);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.write_frame(&frame).await {
                            tracing::warn!(folder = %writer_label, "LSP write error: {e}");
                            break;
                        }
                    }
                    WriterCommand::Close => {
                        let _ = writer.close().await;
                        break;
                    }
                }
            }
        });

        let reader_pending = Arc::clone(&pending);
        let reader_writer_tx = writer_tx.clone();
        let reader_label = label.clone();
        let reader_handle = tokio::spawn(async move {
            let mut reader = FrameReader::new(reader);
            loop {
                match reader.read_frame().await {
                    Ok(Some(frame)) => {
                        dispatch_frame(&frame, &reader_pending, &reader_writer_tx, &reader_label)
                            .await;
                    }
                    Ok(None) => {
                        tracing::info!(folder = %reader_label, "Language server closed stdout");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(folder = %reader_label, "LSP reader error: {e}");
                        break;
                    }
                }
            }
            // Fail outstanding requests now instead of at their timeout.
            reader_pending.lock().await.clear();
        });

        let mut server = Self {
            label,
            child,
            writer_tx,
            next_id: 1,
            pending,
            doc_versions: HashMap::new(),
            request_timeout: options.request_timeout(),
            reader_handle,
            writer_handle,
        };
        server.initialize(options).await?;
        tracing::debug!(folder = %server.label, "{} connected", options.output_name());
        Ok(server)
    }

    async fn initialize(&mut self, options: &ClientOptions) -> Result<(), SessionError> {
        let folder = options.folder();
        let params = protocol::initialize_params(
            folder.uri().as_str(),
            folder.name(),
            options.client_name(),
        );
        let response = self.send_request("initialize", Some(params)).await?;
        if let Some(message) = protocol::response_error(&response) {
            return Err(SessionError::InitializeRejected(message));
        }
        self.send_notification("initialized", Some(serde_json::json!({})))
            .await?;
        Ok(())
    }

    async fn send_request(
        &mut self,
        method: &'static str,
        params: Option<Value>,
    ) -> anyhow::Result<Value> {
        let id = self.next_id;
        self.next_id += 1;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = serde_json::to_value(Request::new(id, method, params))
            .context("serializing request")?;
        if self
            .writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .is_err()
        {
            self.pending.lock().await.remove(&id);
            bail!("writer channel closed");
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&id);
                bail!("server closed the connection before answering {method}");
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                bail!(
                    "{method} timed out after {}s",
                    self.request_timeout.as_secs()
                );
            }
        }
    }

    async fn send_notification(
        &self,
        method: &'static str,
        params: Option<Value>,
    ) -> anyhow::Result<()> {
        let frame = serde_json::to_value(Notification::new(method, params))
            .context("serializing notification")?;
        self.writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .map_err(|_| anyhow::anyhow!("writer channel closed"))
    }

    /// First text for a URI opens it; later texts are full-content changes.
    async fn notify_document(&mut self, uri: &str, language_id: &str, text: &str) -> anyhow::Result<()> {
        // Recorded only once the frame is queued.
        let (method, params, version) = match self.doc_versions.get(uri) {
            Some(version) => (
                "textDocument/didChange",
                protocol::did_change_params(uri, version + 1, text),
                version + 1,
            ),
            None => (
                "textDocument/didOpen",
                protocol::did_open_params(uri, language_id, 1, text),
                1,
            ),
        };
        self.send_notification(method, Some(params)).await?;
        self.doc_versions.insert(uri.to_string(), version);
        Ok(())
    }

    /// `shutdown` + `exit`, then make sure the process is gone.
    ///
    /// The process is torn down even when the `shutdown` request fails; the
    /// failure is still reported.
    async fn shutdown(mut self) -> Result<(), SessionError> {
        let outcome = self.send_request("shutdown", None).await;
        let _ = self.send_notification("exit", None).await;
        let _ = self.writer_tx.send(WriterCommand::Close).await;
        let _ = tokio::time::timeout(EXIT_GRACE, &mut self.writer_handle).await;

        if let Some(child) = self.child.as_mut()
            && tokio::time::timeout(EXIT_GRACE, child.wait()).await.is_err()
        {
            tracing::debug!(folder = %self.label, "Language server didn't exit in time, killing");
            let _ = child.kill().await;
        }

        let response = outcome?;
        match protocol::response_error(&response) {
            Some(message) => Err(SessionError::ShutdownRejected(message)),
            None => Ok(()),
        }
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}

async fn dispatch_frame(
    frame: &Value,
    pending: &Mutex<HashMap<u64, oneshot::Sender<Value>>>,
    writer_tx: &mpsc::Sender<WriterCommand>,
    label: &str,
) {
    let Some(incoming) = Incoming::classify(frame) else {
        tracing::trace!(folder = %label, "Ignoring malformed JSON-RPC frame");
        return;
    };

    match incoming {
        Incoming::Response { id, body } => {
            let sender = pending.lock().await.remove(&id);
            if let Some(tx) = sender {
                let _ = tx.send(body);
            }
        }
        Incoming::Request { id, method, params } => {
            let response = answer_server_request(&id, &method, params, label);
            let _ = writer_tx.send(WriterCommand::Send(response)).await;
        }
        Incoming::Notification { method, params } => {
            handle_notification(&method, params, label);
        }
    }
}

/// Servers block on some requests; everything gets an answer.
fn answer_server_request(id: &Value, method: &str, params: Option<Value>, label: &str) -> Value {
    match method {
        "workspace/configuration" => {
            let items = params
                .and_then(|p| serde_json::from_value::<protocol::ConfigurationParams>(p).ok())
                .map_or(0, |p| p.items.len());
            protocol::result_response(id, Value::Array(vec![Value::Null; items]))
        }
        "client/registerCapability"
        | "client/unregisterCapability"
        | "window/workDoneProgress/create" => protocol::result_response(id, Value::Null),
        _ => {
            tracing::debug!(folder = %label, "Server sent unsupported request: {method}");
            protocol::error_response(
                id,
                protocol::METHOD_NOT_FOUND,
                &format!("Method not found: {method}"),
            )
        }
    }
}

fn handle_notification(method: &str, params: Option<Value>, label: &str) {
    match method {
        "window/logMessage" | "window/showMessage" => {
            let Some(msg) = params
                .and_then(|p| serde_json::from_value::<protocol::MessageParams>(p).ok())
            else {
                tracing::trace!(folder = %label, "Unparseable {method}");
                return;
            };
            // LSP MessageType: 1 error, 2 warning, 3 info, 4 log.
            match msg.kind {
                1 | 2 => tracing::warn!(folder = %label, "{}", msg.message),
                3 => tracing::info!(folder = %label, "{}", msg.message),
                _ => tracing::debug!(folder = %label, "{}", msg.message),
            }
        }
        _ => {
            tracing::trace!(folder = %label, "Ignoring notification: {method}");
        }
    }
}
