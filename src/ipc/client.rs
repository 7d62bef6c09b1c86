//! Tool client for talking to a tool server.
//!
//! Provides async connection to a tool server with:
//! - Request/response correlation by id, many requests in flight at once
//! - Transports: a spawned child process's stdio, a Unix socket, or any
//!   pair of async streams
//! - A `ToolRouter` implementation so the run driver can dispatch remotely
//!
//! When the server goes away every pending request fails with a transport
//! error instead of hanging.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::error::{CalbotError, Result};
use crate::ipc::codec::{Frame, NdJsonCodec};
use crate::ipc::messages::{
    ErrorCode, InitializeResult, ListToolsResult, Methods, ProtocolError, ToolRequest, ToolResponse,
};
use crate::tools::{ToolOutput, ToolRouter, ToolSpec};

type BoxedWriter = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, NdJsonCodec<ToolRequest>>;
type PendingMap = HashMap<u64, oneshot::Sender<ToolResponse>>;

/// Configuration for the tool client.
#[derive(Debug, Clone)]
pub struct ToolClientConfig {
    /// Request timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for ToolClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 120_000,
        }
    }
}

/// Shared state between the client and its reader task.
struct Inflight {
    pending: StdMutex<PendingMap>,
    connected: AtomicBool,
}

impl Inflight {
    /// Never held across an await, so a blocking lock is enough.
    fn pending(&self) -> MutexGuard<'_, PendingMap> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drops a request's pending entry however the request ends, including
/// when the caller abandons the future mid-wait.
struct PendingEntry {
    id: u64,
    inflight: Arc<Inflight>,
}

impl Drop for PendingEntry {
    fn drop(&mut self) {
        self.inflight.pending().remove(&self.id);
    }
}

/// Client for a tool server.
pub struct ToolClient {
    config: ToolClientConfig,
    writer: Mutex<Option<BoxedWriter>>,
    inflight: Arc<Inflight>,
    next_id: AtomicU64,
    child: Mutex<Option<Child>>,
}

impl ToolClient {
    /// Connect over an arbitrary reader/writer pair.
    pub fn from_streams<R, W>(reader: R, writer: W, config: ToolClientConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::build(reader, writer, config, None)
    }

    fn build<R, W>(reader: R, writer: W, config: ToolClientConfig, child: Option<Child>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let inflight = Arc::new(Inflight {
            pending: StdMutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
        });

        tokio::spawn(read_responses(reader, Arc::clone(&inflight)));

        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
        Self {
            config,
            writer: Mutex::new(Some(FramedWrite::new(writer, NdJsonCodec::new()))),
            inflight,
            next_id: AtomicU64::new(1),
            child: Mutex::new(child),
        }
    }

    /// Spawn a tool server process and talk to it over its stdin/stdout.
    pub fn spawn(program: &str, args: &[String], config: ToolClientConfig) -> Result<Self> {
        log::info!("Spawning tool server: {} {}", program, args.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CalbotError::Transport(format!("Failed to spawn tool server '{}': {}", program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CalbotError::Transport("Tool server stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CalbotError::Transport("Tool server stdout unavailable".into()))?;

        Ok(Self::build(stdout, stdin, config, Some(child)))
    }

    /// Connect to a tool server listening on a Unix socket.
    pub async fn connect_socket(path: &Path, config: ToolClientConfig) -> Result<Self> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(|e| CalbotError::Transport(format!("Failed to connect to {}: {}", path.display(), e)))?;
        let (reader, writer) = stream.into_split();
        Ok(Self::from_streams(reader, writer, config))
    }

    /// Check if the server side is still open.
    pub fn is_connected(&self) -> bool {
        self.inflight.connected.load(Ordering::SeqCst)
    }

    /// Send a request and wait for its result.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.inflight.pending();
            if !self.inflight.connected.load(Ordering::SeqCst) {
                return Err(CalbotError::Transport("Tool server disconnected".into()));
            }
            pending.insert(id, tx);
        }
        let _entry = PendingEntry {
            id,
            inflight: Arc::clone(&self.inflight),
        };

        let sent = {
            let mut writer = self.writer.lock().await;
            match writer.as_mut() {
                Some(w) => w
                    .send(ToolRequest::new(id, method, params))
                    .await
                    .map_err(|e| CalbotError::Transport(format!("Failed to write request: {}", e))),
                None => Err(CalbotError::Transport("Tool client is closed".into())),
            }
        };
        sent?;

        let timeout = Duration::from_millis(self.config.request_timeout_ms);
        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(CalbotError::Transport("Tool server disconnected".into())),
            Err(_) => return Err(CalbotError::Transport(format!("Request '{}' timed out", method))),
        };

        response.into_result().map_err(protocol_error)
    }

    async fn request_as<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let value = self.request(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| CalbotError::Transport(format!("Unexpected '{}' result: {}", method, e)))
    }

    /// Handshake; returns the server's name, version and tools.
    pub async fn initialize(&self) -> Result<InitializeResult> {
        self.request_as(Methods::INITIALIZE, json!({})).await
    }

    /// Send ping request.
    pub async fn ping(&self) -> Result<()> {
        self.request(Methods::PING, json!({})).await.map(|_| ())
    }

    /// Close the request stream and reap a spawned server.
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.close().await;
        }

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
                Ok(Ok(status)) => log::info!("Tool server exited: {}", status),
                Ok(Err(e)) => log::warn!("Failed to wait for tool server: {}", e),
                Err(_) => {
                    log::warn!("Tool server did not exit; killing it");
                    child.kill().await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ToolRouter for ToolClient {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>> {
        let result: ListToolsResult = self.request_as(Methods::TOOLS_LIST, json!({})).await?;
        Ok(result.tools)
    }

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<ToolOutput> {
        self.request_as(Methods::TOOLS_CALL, json!({ "name": name, "arguments": arguments }))
            .await
    }
}

impl std::fmt::Debug for ToolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolClient")
            .field("config", &self.config)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

/// Map a server error onto the crate error type.
fn protocol_error(error: ProtocolError) -> CalbotError {
    match error.code {
        ErrorCode::UNKNOWN_TOOL => {
            let name = error
                .data
                .as_ref()
                .and_then(|d| d.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or(error.message);
            CalbotError::UnknownTool(name)
        }
        ErrorCode::INVALID_PARAMS => CalbotError::InvalidArguments(error.message),
        code => CalbotError::Transport(format!("Server error {}: {}", code, error.message)),
    }
}

/// Reader task: route responses to waiting requests until the stream ends.
async fn read_responses<R>(reader: R, inflight: Arc<Inflight>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut frames = FramedRead::new(reader, NdJsonCodec::<ToolResponse>::new());

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Frame::Message(response)) => {
                let sender = inflight.pending().remove(&response.id);
                match sender {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => log::warn!("Dropping response for abandoned or unknown request id {}", response.id),
                }
            }
            Ok(Frame::Malformed(reason)) => log::warn!("Malformed response line: {}", reason),
            Err(e) => {
                log::warn!("Tool transport read failed: {}", e);
                break;
            }
        }
    }

    // Dropping the senders fails every waiting request.
    let mut pending = inflight.pending();
    inflight.connected.store(false, Ordering::SeqCst);
    if !pending.is_empty() {
        log::warn!("Tool server disconnected with {} requests in flight", pending.len());
    }
    pending.clear();
}
