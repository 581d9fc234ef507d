/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use bytes::BytesMut;
use lsp_types::{
    ClientCapabilities, ClientInfo, DidOpenTextDocumentParams, InitializeParams,
    InitializeResult, InitializedParams, TextDocumentItem, Uri, WorkspaceClientCapabilities,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{Mutex, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use super::error::ClientError;
use super::error_handler::{ConnectionEvent, Decision, ErrorHandler};
use super::options::ClientConfiguration;
use super::protocol::{
    self, Incoming, METHOD_NOT_FOUND, NotificationMessage, RequestId, RequestMessage,
    ResponseMessage,
};
use super::transport::{BoxedReader, BoxedWriter, ConnectionSupplier, Transport};

/// Default timeout for LSP requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long `shutdown` may take before the client gives up on a clean exit.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

type PendingMap = HashMap<RequestId, oneshot::Sender<ResponseMessage>>;

/// How the reader task ended.
enum ReaderExit {
    /// The stream reached EOF or failed.
    Closed,
    /// The error handler asked for the session to be torn down.
    Aborted,
}

/// State shared between the client handle, its driver and its reader.
struct Shared {
    config: Arc<ClientConfiguration>,
    handler: Arc<dyn ErrorHandler>,
    client_info: ClientInfo,
    next_id: AtomicI64,
    writer: Mutex<Option<BoxedWriter>>,
    pending: Mutex<PendingMap>,
    reader: std::sync::Mutex<Option<AbortHandle>>,
    alive: AtomicBool,
    stopping: AtomicBool,
}

/// A session with the NPL language server over a supplied transport.
pub struct LanguageClient {
    id: String,
    shared: Arc<Shared>,
    supplier: ConnectionSupplier,
    driver: Option<JoinHandle<()>>,
    initialize_result: Option<InitializeResult>,
}

impl LanguageClient {
    /// Creates a client. Nothing is connected until [`start`](Self::start).
    #[must_use]
    pub fn new(
        id: &str,
        client_info: ClientInfo,
        config: Arc<ClientConfiguration>,
        supplier: ConnectionSupplier,
        handler: Arc<dyn ErrorHandler>,
    ) -> Self {
        Self {
            id: id.to_string(),
            shared: Arc::new(Shared {
                config,
                handler,
                client_info,
                next_id: AtomicI64::new(1),
                writer: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                reader: std::sync::Mutex::new(None),
                alive: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
            }),
            supplier,
            driver: None,
            initialize_result: None,
        }
    }

    /// Client identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The configuration snapshot this client was built from.
    #[must_use]
    pub fn configuration(&self) -> &ClientConfiguration {
        &self.shared.config
    }

    /// The server's answer to `initialize`, once started.
    #[must_use]
    pub const fn initialize_result(&self) -> Option<&InitializeResult> {
        self.initialize_result.as_ref()
    }

    /// Returns true while the transport is connected.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    /// Acquires a transport and performs the `initialize` handshake.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connection`] if no transport could be supplied,
    /// or the handshake failure otherwise. The client holds no connection
    /// after a failed start.
    pub async fn start(&mut self) -> Result<&InitializeResult, ClientError> {
        let transport = self
            .supplier
            .supply()
            .await
            .map_err(ClientError::Connection)?;

        let (ready_tx, ready_rx) = oneshot::channel();
        self.driver = Some(tokio::spawn(drive(
            self.shared.clone(),
            self.supplier.clone(),
            transport,
            ready_tx,
        )));

        match ready_rx.await {
            Ok(Ok(result)) => Ok(self.initialize_result.insert(result)),
            Ok(Err(e)) => {
                self.abort_tasks();
                Err(e)
            }
            Err(_) => {
                self.abort_tasks();
                Err(ClientError::ConnectionClosed)
            }
        }
    }

    /// Sends `shutdown` and `exit`, then drops the connection.
    ///
    /// The connection is released even when the server does not answer.
    ///
    /// # Errors
    ///
    /// Returns the `shutdown` failure, if any.
    pub async fn stop(&mut self) -> Result<(), ClientError> {
        self.shared.stopping.store(true, Ordering::SeqCst);

        let result = if self.is_alive() {
            let shutdown: Result<serde_json::Value, ClientError> = self
                .shared
                .request("shutdown", serde_json::Value::Null, SHUTDOWN_TIMEOUT)
                .await;
            match shutdown {
                Ok(_) => self.shared.notify("exit", serde_json::Value::Null).await,
                Err(e) => Err(e),
            }
        } else {
            Ok(())
        };

        self.abort_tasks();
        self.shared.close().await;
        result
    }

    /// Opens a document on the server if the client's selector covers it.
    ///
    /// Returns `false` without contacting the server for documents the
    /// client is not responsible for.
    ///
    /// # Errors
    ///
    /// Returns an error if the notification cannot be sent.
    pub async fn did_open(
        &self,
        uri: &Url,
        language_id: &str,
        text: String,
    ) -> Result<bool, ClientError> {
        if !self.configuration().selector().matches(uri, language_id) {
            return Ok(false);
        }
        let uri: Uri = uri
            .as_str()
            .parse()
            .map_err(|e| ClientError::Protocol(format!("Invalid document URI {uri}: {e}")))?;
        self.shared
            .notify(
                "textDocument/didOpen",
                DidOpenTextDocumentParams {
                    text_document: TextDocumentItem {
                        uri,
                        language_id: language_id.to_string(),
                        version: 1,
                        text,
                    },
                },
            )
            .await?;
        Ok(true)
    }

    fn abort_tasks(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        self.shared.abort_reader();
    }
}

impl Drop for LanguageClient {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

/// Owns the connection for the client's lifetime: runs the handshake,
/// waits for the stream to close, and reconnects while the error handler
/// asks for it and the restart ceiling allows.
async fn drive(
    shared: Arc<Shared>,
    supplier: ConnectionSupplier,
    mut transport: Transport,
    ready: oneshot::Sender<Result<InitializeResult, ClientError>>,
) {
    let mut ready = Some(ready);
    let mut restarts = 0u32;

    loop {
        let Transport { reader, writer } = transport;
        shared.attach(writer).await;
        let reader_handle = tokio::spawn(reader_task(shared.clone(), reader));
        shared.set_reader(reader_handle.abort_handle());

        let handshake = shared.initialize().await;
        match (handshake, ready.take()) {
            (Ok(result), Some(tx)) => {
                let _ = tx.send(Ok(result));
            }
            (Ok(_), None) => info!("Reconnected to language server"),
            (Err(e), Some(tx)) => {
                reader_handle.abort();
                shared.close().await;
                let _ = tx.send(Err(e));
                return;
            }
            (Err(e), None) => {
                error!("Language server handshake failed after reconnect: {}", e);
                reader_handle.abort();
                break;
            }
        }

        let exit = reader_handle.await.unwrap_or(ReaderExit::Closed);
        shared.close().await;

        if shared.stopping.load(Ordering::SeqCst) {
            return;
        }
        if matches!(exit, ReaderExit::Aborted) {
            warn!("Language client session aborted by error handler");
            return;
        }

        match shared.handler.classify(&ConnectionEvent::Closed) {
            Decision::Abort => return,
            Decision::Continue if restarts >= shared.config.max_restart_count() => {
                error!(
                    "Language server connection closed {} times, not restarting",
                    restarts + 1
                );
                return;
            }
            Decision::Continue => {
                restarts += 1;
                info!(
                    "Reconnecting to language server (attempt {}/{})",
                    restarts,
                    shared.config.max_restart_count()
                );
                match supplier.supply().await {
                    Ok(next) => transport = next,
                    Err(_) => return,
                }
            }
        }
    }

    shared.close().await;
}

/// Reads framed messages and dispatches them until the stream ends.
async fn reader_task(shared: Arc<Shared>, mut reader: BoxedReader) -> ReaderExit {
    let mut buffer = BytesMut::with_capacity(8192);
    let mut temp = [0u8; 4096];
    let mut errors = 0u32;

    loop {
        match reader.read(&mut temp).await {
            Ok(0) => {
                debug!("Language server stream closed");
                return ReaderExit::Closed;
            }
            Ok(n) => buffer.extend_from_slice(&temp[..n]),
            Err(e) => {
                errors += 1;
                let error = anyhow::Error::new(e).context("Error reading from language server");
                let event = ConnectionEvent::Error {
                    error: &error,
                    message: None,
                    count: errors,
                };
                // A failed read leaves nothing to resume; only the
                // classification of the loss differs.
                return match shared.handler.classify(&event) {
                    Decision::Continue => ReaderExit::Closed,
                    Decision::Abort => ReaderExit::Aborted,
                };
            }
        }

        loop {
            let decision = match protocol::try_parse_message(&mut buffer) {
                Ok(None) => break,
                Ok(Some(body)) => {
                    trace!("Received LSP message: {}", body);
                    match protocol::decode(&body) {
                        Ok(message) => {
                            shared.dispatch(message).await;
                            Decision::Continue
                        }
                        Err(error) => {
                            errors += 1;
                            shared.handler.classify(&ConnectionEvent::Error {
                                error: &error,
                                message: Some(&body),
                                count: errors,
                            })
                        }
                    }
                }
                Err(error) => {
                    errors += 1;
                    shared.handler.classify(&ConnectionEvent::Error {
                        error: &error,
                        message: None,
                        count: errors,
                    })
                }
            };

            if decision == Decision::Abort {
                return ReaderExit::Aborted;
            }
        }
    }
}

impl Shared {
    async fn attach(&self, writer: BoxedWriter) {
        *self.writer.lock().await = Some(writer);
        self.alive.store(true, Ordering::SeqCst);
    }

    fn set_reader(&self, handle: AbortHandle) {
        if let Ok(mut reader) = self.reader.lock()
            && let Some(previous) = reader.replace(handle)
        {
            previous.abort();
        }
    }

    fn abort_reader(&self) {
        if let Ok(mut reader) = self.reader.lock()
            && let Some(handle) = reader.take()
        {
            handle.abort();
        }
    }

    /// Marks the connection dead, drops the writer and fails every pending
    /// request.
    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.pending.lock().await.clear();
    }

    async fn initialize(&self) -> Result<InitializeResult, ClientError> {
        let workspace_folders = self
            .config
            .workspace_folders()
            .map_err(|e| ClientError::Initialize(format!("{e:#}")))?;
        let initialization_options = self
            .config
            .initialization_options()
            .map_err(|e| ClientError::Initialize(format!("{e:#}")))?;

        let params = InitializeParams {
            process_id: Some(std::process::id()),
            client_info: Some(self.client_info.clone()),
            capabilities: ClientCapabilities {
                workspace: Some(WorkspaceClientCapabilities {
                    workspace_folders: Some(true),
                    configuration: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            },
            workspace_folders: Some(workspace_folders),
            initialization_options: Some(initialization_options),
            ..Default::default()
        };

        let result: InitializeResult = self
            .request("initialize", params, REQUEST_TIMEOUT)
            .await
            .map_err(|e| match e {
                ClientError::Server { code, message } => {
                    ClientError::Initialize(format!("{message} (code {code})"))
                }
                other => other,
            })?;

        if let Some(info) = &result.server_info {
            debug!(
                "Connected to {} {}",
                info.name,
                info.version.as_deref().unwrap_or("")
            );
        }

        self.notify("initialized", InitializedParams {}).await?;
        Ok(result)
    }

    /// Sends a request and waits for the response with timeout.
    async fn request<P: serde::Serialize, R: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: P,
        timeout: Duration,
    ) -> Result<R, ClientError> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));

        let request = RequestMessage {
            jsonrpc: "2.0".to_string(),
            id: id.clone(),
            method: method.to_string(),
            params: serde_json::to_value(params)
                .map_err(|e| ClientError::Protocol(e.to_string()))?,
        };

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        if let Err(e) = self.send_message(&request).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(ClientError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(ClientError::RequestTimeout {
                    method: method.to_string(),
                    timeout,
                });
            }
        };

        if let Some(error) = response.error {
            return Err(ClientError::Server {
                code: error.code,
                message: error.message,
            });
        }

        // Handle null/missing result - use JSON null as default
        let result = response.result.unwrap_or(serde_json::Value::Null);
        serde_json::from_value(result).map_err(|e| ClientError::Protocol(e.to_string()))
    }

    /// Sends a notification (no response expected).
    async fn notify<P: serde::Serialize>(&self, method: &str, params: P) -> Result<(), ClientError> {
        let notification = NotificationMessage {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params: serde_json::to_value(params)
                .map_err(|e| ClientError::Protocol(e.to_string()))?,
        };
        self.send_message(&notification).await
    }

    async fn send_message<T: serde::Serialize>(&self, message: &T) -> Result<(), ClientError> {
        let frame = protocol::encode(message).map_err(|e| ClientError::Protocol(e.to_string()))?;

        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(ClientError::ConnectionClosed)?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn dispatch(&self, message: Incoming) {
        match message {
            Incoming::Response(response) => {
                let Some(id) = &response.id else {
                    warn!("Received response without id");
                    return;
                };
                if let Some(sender) = self.pending.lock().await.remove(id) {
                    let _ = sender.send(response);
                } else {
                    warn!("Received response for unknown request id: {:?}", id);
                }
            }
            Incoming::Request(request) => {
                debug!("Received server request: {}", request.method);
                let response = self.answer(&request);
                if let Err(e) = self.send_message(&response).await {
                    warn!("Failed to answer {}: {}", request.method, e);
                }
            }
            Incoming::Notification(notification) => match notification.method.as_str() {
                "window/logMessage" | "window/showMessage" => {
                    if let Some(message) =
                        notification.params.get("message").and_then(|m| m.as_str())
                    {
                        debug!("Language server: {}", message);
                    }
                }
                _ => trace!("Ignoring notification: {}", notification.method),
            },
        }
    }

    /// Builds the reply to a server-initiated request.
    fn answer(&self, request: &RequestMessage) -> ResponseMessage {
        let id = request.id.clone();
        match request.method.as_str() {
            "workspace/workspaceFolders" => match self.config.workspace_folders() {
                Ok(folders) => ResponseMessage::ok(
                    id,
                    serde_json::to_value(folders).unwrap_or(serde_json::Value::Null),
                ),
                Err(e) => {
                    warn!("Cannot report workspace folders: {e:#}");
                    ResponseMessage::ok(id, serde_json::Value::Null)
                }
            },
            "workspace/configuration" => {
                let items = request
                    .params
                    .get("items")
                    .and_then(|items| items.as_array())
                    .map_or(0, Vec::len);
                ResponseMessage::ok(id, serde_json::Value::Array(vec![serde_json::Value::Null; items]))
            }
            "client/registerCapability"
            | "client/unregisterCapability"
            | "window/workDoneProgress/create" => ResponseMessage::ok(id, serde_json::Value::Null),
            method => ResponseMessage::error(
                id,
                METHOD_NOT_FOUND,
                format!("Method '{method}' not supported by client"),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::ActivationContext;
    use crate::lsp::error_handler::DefaultErrorHandler;
    use crate::lsp::testing::{Behavior, MockServerManager, wait_until};
    use crate::workspace::WorkspaceRoot;
    use anyhow::{Context, Result};
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    fn config() -> Arc<ClientConfiguration> {
        Arc::new(ClientConfiguration::new(
            vec![WorkspaceRoot::new("/proj/src", "root", 0)],
            300,
            Some(vec!["lib-a".to_string()]),
        ))
    }

    fn client_info() -> ClientInfo {
        ClientInfo {
            name: "npl-client-tests".to_string(),
            version: None,
        }
    }

    fn client(manager: &Arc<MockServerManager>, handler: Arc<dyn ErrorHandler>) -> LanguageClient {
        LanguageClient::new(
            "nplLanguageServer",
            client_info(),
            config(),
            ConnectionSupplier::new(manager.clone(), ActivationContext::default()),
            handler,
        )
    }

    /// Reconnects after every close and counts the errors it sees.
    #[derive(Default)]
    struct Reconnecting {
        errors: AtomicU32,
    }

    impl ErrorHandler for Reconnecting {
        fn classify(&self, event: &ConnectionEvent<'_>) -> Decision {
            if matches!(event, ConnectionEvent::Error { .. }) {
                self.errors.fetch_add(1, Ordering::SeqCst);
            }
            Decision::Continue
        }
    }

    #[tokio::test]
    async fn test_start_sends_initialization_options() -> Result<()> {
        let manager = Arc::new(MockServerManager::new(Behavior::default()));
        let mut client = client(&manager, Arc::new(DefaultErrorHandler));

        client.start().await?;
        assert!(client.is_alive());

        let params = manager.initialize_params().context("no initialize")?;
        assert_eq!(
            params["initializationOptions"],
            json!({
                "effectiveWorkspaceFolders": [{"uri": "file:///proj/src", "name": "root"}],
                "nplServerDebouncingTimeMs": 300,
                "nplContribLibraries": ["lib-a"],
            })
        );
        assert_eq!(params["workspaceFolders"][0]["name"], json!("root"));
        assert_eq!(params["clientInfo"]["name"], json!("npl-client-tests"));

        client.stop().await?;
        assert!(!client.is_alive());
        wait_until(|| manager.methods().contains(&"exit".to_string())).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_start_fails_when_supplier_fails() {
        let manager = Arc::new(MockServerManager::new(Behavior::default()));
        manager.fail_connections(true);
        let mut client = client(&manager, Arc::new(DefaultErrorHandler));

        let result = client.start().await;
        assert!(matches!(result, Err(ClientError::Connection(_))));
        assert!(!client.is_alive());
    }

    #[tokio::test]
    async fn test_rejected_initialize_is_reported() {
        let manager = Arc::new(MockServerManager::new(Behavior {
            reject_initialize: true,
            ..Behavior::default()
        }));
        let mut client = client(&manager, Arc::new(DefaultErrorHandler));

        let result = client.start().await;
        assert!(matches!(result, Err(ClientError::Initialize(_))));
        assert!(!client.is_alive());
    }

    #[tokio::test]
    async fn test_malformed_message_keeps_session() -> Result<()> {
        let manager = Arc::new(MockServerManager::new(Behavior {
            garbage_after_initialized: true,
            ..Behavior::default()
        }));
        let handler = Arc::new(Reconnecting::default());
        let mut client = client(&manager, handler.clone());

        client.start().await?;
        wait_until(|| handler.errors.load(Ordering::SeqCst) >= 1).await?;
        assert!(client.is_alive());

        // The session still answers requests after the bad frame.
        client.stop().await?;
        assert!(manager.methods().contains(&"shutdown".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_close_is_not_restarted_by_default() -> Result<()> {
        let manager = Arc::new(MockServerManager::new(Behavior {
            close_after_initialized: true,
            ..Behavior::default()
        }));
        let mut client = client(&manager, Arc::new(DefaultErrorHandler));

        client.start().await?;
        wait_until(|| !client.is_alive()).await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.connections(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_reconnects_stop_at_ceiling() -> Result<()> {
        let manager = Arc::new(MockServerManager::new(Behavior {
            close_after_initialized: true,
            ..Behavior::default()
        }));
        let mut client = client(&manager, Arc::new(Reconnecting::default()));

        client.start().await?;
        let expected = 1 + usize::try_from(crate::lsp::options::MAX_RESTART_COUNT)?;
        wait_until(|| manager.connections() == expected && !client.is_alive()).await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.connections(), expected);
        Ok(())
    }

    #[tokio::test]
    async fn test_server_requests_are_answered() -> Result<()> {
        let manager = Arc::new(MockServerManager::new(Behavior {
            ask_workspace_folders: true,
            ..Behavior::default()
        }));
        let mut client = client(&manager, Arc::new(DefaultErrorHandler));

        client.start().await?;
        wait_until(|| manager.folder_reply().is_some()).await?;
        let reply = manager.folder_reply().context("no reply")?;
        assert_eq!(reply["result"][0]["uri"], json!("file:///proj/src"));

        client.stop().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_did_open_honours_selector() -> Result<()> {
        let manager = Arc::new(MockServerManager::new(Behavior::default()));
        let mut client = client(&manager, Arc::new(DefaultErrorHandler));
        client.start().await?;

        let npl = Url::parse("file:///proj/src/main.npl")?;
        let rust = Url::parse("file:///proj/src/main.rs")?;
        assert!(client.did_open(&npl, "npl", "package demo".into()).await?);
        assert!(!client.did_open(&rust, "rust", String::new()).await?);

        client.stop().await?;
        let methods = manager.methods();
        assert_eq!(
            methods
                .iter()
                .filter(|m| m.as_str() == "textDocument/didOpen")
                .count(),
            1
        );
        Ok(())
    }
}
