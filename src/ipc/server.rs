//! Tool Server - serves the tool registry over a line-oriented transport
//!
//! Provides:
//! - Request routing for `initialize`, `ping`, `tools/list` and `tools/call`
//! - Connection handling over any async byte stream (stdio, sockets, pipes)
//! - A Unix socket listener for multiple clients
//!
//! Each `tools/call` runs on its own task so a slow call never blocks the
//! connection; responses are serialized through one writer task.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::error::{CalbotError, Result};
use crate::ipc::codec::{Frame, NdJsonCodec};
use crate::ipc::messages::{
    CallToolParams, InitializeResult, ListToolsResult, Methods, ProtocolError, ToolRequest, ToolResponse,
};
use crate::tools::{ToolRegistry, dispatch_tool};

/// Name reported by `initialize`
pub const SERVER_NAME: &str = "calbot";

/// Configuration for the tool server
#[derive(Debug, Clone)]
pub struct ToolServerConfig {
    /// Path to the Unix socket
    pub socket_path: PathBuf,
    /// Maximum number of concurrent socket clients
    pub max_clients: usize,
    /// Queue depth of the per-connection response writer
    pub channel_capacity: usize,
}

impl Default for ToolServerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            max_clients: 16,
            channel_capacity: 64,
        }
    }
}

impl ToolServerConfig {
    /// Create config with custom socket path
    pub fn with_socket_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.socket_path = path.as_ref().to_path_buf();
        self
    }
}

/// Default socket location under the user's runtime or temp directory
pub fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("calbot")
        .join("tools.sock")
}

/// Tool server over a registry
pub struct ToolServer {
    registry: Arc<ToolRegistry>,
    config: ToolServerConfig,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: Option<mpsc::Receiver<()>>,
}

impl ToolServer {
    /// Create a server with default config
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self::with_config(registry, ToolServerConfig::default())
    }

    /// Create a server with custom config
    pub fn with_config(registry: Arc<ToolRegistry>, config: ToolServerConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        Self {
            registry,
            config,
            shutdown_tx,
            shutdown_rx: Some(shutdown_rx),
        }
    }

    /// Serve one connection until the peer closes its side
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        serve_connection(Arc::clone(&self.registry), reader, writer, self.config.channel_capacity).await
    }

    /// Serve over this process's stdin/stdout
    pub async fn serve_stdio(&self) -> Result<()> {
        log::info!("Serving {} tools over stdio", self.registry.len());
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Listen on the configured Unix socket until shutdown
    pub async fn run_socket(&mut self) -> Result<()> {
        // Remove existing socket if present
        if self.config.socket_path.exists() {
            std::fs::remove_file(&self.config.socket_path)?;
        }

        if let Some(parent) = self.config.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.config.socket_path)
            .map_err(|e| CalbotError::Transport(format!("Failed to bind socket: {}", e)))?;
        log::info!("Tool server listening on {}", self.config.socket_path.display());

        let mut shutdown_rx = self
            .shutdown_rx
            .take()
            .ok_or_else(|| CalbotError::Transport("Socket listener already ran".into()))?;
        let active = Arc::new(AtomicUsize::new(0));

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => {
                            if active.load(Ordering::SeqCst) >= self.config.max_clients {
                                log::warn!("Rejecting client: {} connections already open", self.config.max_clients);
                                continue;
                            }
                            active.fetch_add(1, Ordering::SeqCst);

                            let registry = Arc::clone(&self.registry);
                            let active = Arc::clone(&active);
                            let capacity = self.config.channel_capacity;
                            tokio::spawn(async move {
                                let (reader, writer) = stream.into_split();
                                if let Err(e) = serve_connection(registry, reader, writer, capacity).await {
                                    log::warn!("Client connection ended with error: {}", e);
                                }
                                active.fetch_sub(1, Ordering::SeqCst);
                            });
                        }
                        Err(e) => {
                            log::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }

        let _ = std::fs::remove_file(&self.config.socket_path);
        log::info!("Tool server stopped");
        Ok(())
    }

    /// Sender that stops the socket listener when signalled
    pub fn shutdown_handle(&self) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }
}

/// Serve one connection: read requests, answer each, write responses in
/// completion order. Returns once the reader hits EOF and every in-flight
/// call has been answered.
pub async fn serve_connection<R, W>(registry: Arc<ToolRegistry>, reader: R, writer: W, capacity: usize) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut frames = FramedRead::new(reader, NdJsonCodec::<Value>::new());
    let (tx, mut rx) = mpsc::channel::<ToolResponse>(capacity.max(1));

    let writer_task = tokio::spawn(async move {
        let mut sink = FramedWrite::new(writer, NdJsonCodec::<ToolResponse>::new());
        while let Some(response) = rx.recv().await {
            if let Err(e) = sink.send(response).await {
                log::warn!("Failed to write response: {}", e);
                break;
            }
        }
    });

    let mut read_error = None;
    while let Some(frame) = frames.next().await {
        let value = match frame {
            Ok(Frame::Message(value)) => value,
            Ok(Frame::Malformed(reason)) => {
                log::warn!("Malformed request line: {}", reason);
                let _ = tx
                    .send(ToolResponse::error(0, ProtocolError::parse_error(format!("Parse error: {}", reason))))
                    .await;
                continue;
            }
            Err(e) => {
                log::warn!("Transport read failed: {}", e);
                read_error = Some(e);
                break;
            }
        };

        let id = value.get("id").and_then(Value::as_u64).unwrap_or(0);
        let request = match serde_json::from_value::<ToolRequest>(value) {
            Ok(request) => request,
            Err(e) => {
                let _ = tx
                    .send(ToolResponse::error(id, ProtocolError::invalid_request(format!("Invalid request: {}", e))))
                    .await;
                continue;
            }
        };

        tracing::debug!(id = request.id, method = %request.method, "Request received");

        if request.method == Methods::TOOLS_CALL {
            let registry = Arc::clone(&registry);
            let tx = tx.clone();
            tokio::spawn(async move {
                let response = handle_request(&registry, request).await;
                let _ = tx.send(response).await;
            });
        } else {
            let response = handle_request(&registry, request).await;
            let _ = tx.send(response).await;
        }
    }

    drop(tx);
    writer_task
        .await
        .map_err(|e| CalbotError::Transport(format!("Writer task failed: {}", e)))?;

    match read_error {
        Some(e) => Err(CalbotError::Transport(e.to_string())),
        None => Ok(()),
    }
}

/// Route a request to its method handler
pub async fn handle_request(registry: &ToolRegistry, request: ToolRequest) -> ToolResponse {
    let id = request.id;
    match request.method.as_str() {
        Methods::INITIALIZE => to_response(
            id,
            &InitializeResult {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                tools: registry.specs(),
            },
        ),
        Methods::PING => ToolResponse::success(id, json!({})),
        Methods::TOOLS_LIST => to_response(id, &ListToolsResult { tools: registry.specs() }),
        Methods::TOOLS_CALL => call_tool(registry, id, request.params).await,
        other => ToolResponse::error(id, ProtocolError::method_not_found(other)),
    }
}

async fn call_tool(registry: &ToolRegistry, id: u64, params: Value) -> ToolResponse {
    let params: CallToolParams = match serde_json::from_value(params) {
        Ok(params) => params,
        Err(e) => return ToolResponse::error(id, ProtocolError::invalid_params(format!("Invalid params: {}", e))),
    };

    tracing::info!(id, tool = %params.name, "Tool called");

    match dispatch_tool(registry, &params.name, &params.arguments).await {
        Ok(output) => to_response(id, &output),
        Err(CalbotError::UnknownTool(name)) => ToolResponse::error(id, ProtocolError::unknown_tool(name)),
        Err(e) => ToolResponse::error(id, ProtocolError::internal_error(e.to_string())),
    }
}

fn to_response<T: serde::Serialize>(id: u64, result: &T) -> ToolResponse {
    match serde_json::to_value(result) {
        Ok(value) => ToolResponse::success(id, value),
        Err(e) => ToolResponse::error(id, ProtocolError::internal_error(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::messages::ErrorCode;
    use crate::tools::{ParamSpec, ParamType, ToolDefinition, ToolHandler, ToolOutput};
    use async_trait::async_trait;
    use serde_json::Map;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    struct EchoHandler;

    #[async_trait]
    impl ToolHandler for EchoHandler {
        async fn call(&self, args: &Map<String, Value>) -> Result<ToolOutput> {
            Ok(ToolOutput::success(args["text"].as_str().unwrap_or_default().to_string()))
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl ToolHandler for SlowHandler {
        async fn call(&self, _args: &Map<String, Value>) -> Result<ToolOutput> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(ToolOutput::success("slow done"))
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry
            .register(
                ToolDefinition::new("echo", "Echo text", Arc::new(EchoHandler))
                    .with_param(ParamSpec::required("text", ParamType::String, "Text")),
            )
            .unwrap();
        registry
            .register(ToolDefinition::new("slow", "Sleeps", Arc::new(SlowHandler)))
            .unwrap();
        Arc::new(registry)
    }

    #[test]
    fn test_config_default() {
        let config = ToolServerConfig::default();
        assert_eq!(config.max_clients, 16);
        assert!(config.socket_path.ends_with("calbot/tools.sock"));
    }

    #[test]
    fn test_config_with_socket_path() {
        let config = ToolServerConfig::default().with_socket_path("/tmp/custom.sock");
        assert_eq!(config.socket_path, PathBuf::from("/tmp/custom.sock"));
        assert_eq!(config.max_clients, 16);
    }

    #[tokio::test]
    async fn test_initialize_lists_tools() {
        let response = handle_request(&registry(), ToolRequest::new(1, Methods::INITIALIZE, json!({}))).await;
        let result = response.result.unwrap();
        assert_eq!(result["name"], SERVER_NAME);
        assert_eq!(result["tools"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_tools_list() {
        let response = handle_request(&registry(), ToolRequest::new(2, Methods::TOOLS_LIST, json!({}))).await;
        let result: ListToolsResult = serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(result.tools[0].name, "echo");
        assert_eq!(result.tools[0].input_schema["required"], json!(["text"]));
    }

    #[tokio::test]
    async fn test_tools_call_dispatches_arguments() {
        let request = ToolRequest::new(3, Methods::TOOLS_CALL, json!({"name": "echo", "arguments": {"text": "hi"}}));
        let response = handle_request(&registry(), request).await;
        let output: ToolOutput = serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(output.text, "hi");
        assert!(!output.is_error);
    }

    #[tokio::test]
    async fn test_tools_call_passes_wrapped_arguments_through() {
        // Unwrapping happens once, before the request is sent.
        let request = ToolRequest::new(
            3,
            Methods::TOOLS_CALL,
            json!({"name": "echo", "arguments": {"kwargs": "{\"text\":\"hi\"}"}}),
        );
        let response = handle_request(&registry(), request).await;
        let output: ToolOutput = serde_json::from_value(response.result.unwrap()).unwrap();
        assert!(output.is_error);
        assert!(output.text.contains("missing required field: text"));
    }

    #[tokio::test]
    async fn test_tools_call_string_arguments_rejected() {
        let request = ToolRequest::new(
            3,
            Methods::TOOLS_CALL,
            json!({"name": "echo", "arguments": "{\"text\":\"hi\"}"}),
        );
        let response = handle_request(&registry(), request).await;
        assert_eq!(response.error.unwrap().code, ErrorCode::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_tools_call_unknown_tool() {
        let request = ToolRequest::new(4, Methods::TOOLS_CALL, json!({"name": "nope", "arguments": {}}));
        let response = handle_request(&registry(), request).await;
        let error = response.error.unwrap();
        assert_eq!(error.code, ErrorCode::UNKNOWN_TOOL);
        assert_eq!(response.id, 4);
    }

    #[tokio::test]
    async fn test_tools_call_missing_argument_is_failed_output() {
        let request = ToolRequest::new(5, Methods::TOOLS_CALL, json!({"name": "echo"}));
        let response = handle_request(&registry(), request).await;
        let output: ToolOutput = serde_json::from_value(response.result.unwrap()).unwrap();
        assert!(output.is_error);
    }

    #[tokio::test]
    async fn test_tools_call_invalid_params() {
        let request = ToolRequest::new(6, Methods::TOOLS_CALL, json!({"arguments": {}}));
        let response = handle_request(&registry(), request).await;
        assert_eq!(response.error.unwrap().code, ErrorCode::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let response = handle_request(&registry(), ToolRequest::new(7, "tools/delete", json!({}))).await;
        assert_eq!(response.error.unwrap().code, ErrorCode::METHOD_NOT_FOUND);
    }

    async fn read_response<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) -> ToolResponse {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn test_serve_connection_round_trip() {
        let (client, server) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let handle = tokio::spawn(serve_connection(registry(), server_read, server_write, 8));

        let (client_read, mut client_write) = tokio::io::split(client);
        let mut client_read = BufReader::new(client_read);

        client_write.write_all(b"this is not json\n").await.unwrap();
        let response = read_response(&mut client_read).await;
        assert_eq!(response.id, 0);
        assert_eq!(response.error.unwrap().code, ErrorCode::PARSE_ERROR);

        client_write.write_all(b"{\"id\":9,\"params\":{}}\n").await.unwrap();
        let response = read_response(&mut client_read).await;
        assert_eq!(response.id, 9);
        assert_eq!(response.error.unwrap().code, ErrorCode::INVALID_REQUEST);

        client_write.write_all(b"{\"id\":10,\"method\":\"ping\"}\n").await.unwrap();
        let response = read_response(&mut client_read).await;
        assert_eq!(response.id, 10);
        assert!(response.error.is_none());

        drop(client_write);
        drop(client_read);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_slow_call_does_not_block_others() {
        let (client, server) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        tokio::spawn(serve_connection(registry(), server_read, server_write, 8));

        let (client_read, mut client_write) = tokio::io::split(client);
        let mut client_read = BufReader::new(client_read);

        let slow = ToolRequest::new(1, Methods::TOOLS_CALL, json!({"name": "slow"}));
        let fast = ToolRequest::new(2, Methods::TOOLS_CALL, json!({"name": "echo", "arguments": {"text": "x"}}));
        for request in [slow, fast] {
            let mut line = serde_json::to_vec(&request).unwrap();
            line.push(b'\n');
            client_write.write_all(&line).await.unwrap();
        }

        let first = read_response(&mut client_read).await;
        let second = read_response(&mut client_read).await;
        assert_eq!(first.id, 2);
        assert_eq!(second.id, 1);
    }

    #[tokio::test]
    async fn test_in_flight_calls_answered_after_eof() {
        let (client, server) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let handle = tokio::spawn(serve_connection(registry(), server_read, server_write, 8));

        let (client_read, mut client_write) = tokio::io::split(client);
        let mut client_read = BufReader::new(client_read);

        let mut line = serde_json::to_vec(&ToolRequest::new(1, Methods::TOOLS_CALL, json!({"name": "slow"}))).unwrap();
        line.push(b'\n');
        client_write.write_all(&line).await.unwrap();
        client_write.shutdown().await.unwrap();

        let response = read_response(&mut client_read).await;
        assert_eq!(response.id, 1);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_socket_server_serves_clients() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("tools.sock");
        let config = ToolServerConfig::default().with_socket_path(&socket);
        let mut server = ToolServer::with_config(registry(), config);
        let shutdown = server.shutdown_handle();
        let handle = tokio::spawn(async move { server.run_socket().await });

        // Wait for the socket to appear.
        for _ in 0..50 {
            if socket.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let stream = tokio::net::UnixStream::connect(&socket).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut read = BufReader::new(read);
        write.write_all(b"{\"id\":1,\"method\":\"tools/list\"}\n").await.unwrap();
        let response = read_response(&mut read).await;
        assert!(response.error.is_none());

        shutdown.send(()).await.unwrap();
        handle.await.unwrap().unwrap();
        assert!(!socket.exists());
    }
}
