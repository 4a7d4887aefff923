//! One live server process, one bidirectional protocol channel.
//!
//! A `ServerConnection` owns the child process, its stdio handles, and the
//! codec instance bound to them. Multiple requests may be outstanding at
//! once; responses are correlated by id, not by order. When the process
//! exits or the stream breaks, every pending request fails with
//! `ConnectionClosed` and the connection is never reused — a restarted
//! process gets a fresh connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tandem_core::{InitializeResult, McpError, ServerConfig};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{Mutex, RwLock, Semaphore, mpsc, oneshot, watch};

use crate::codec::{self, FrameDecoder, Inbound, Response};
use crate::shutdown::shutdown_child;

/// MCP protocol version this client speaks.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Tunables for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Maximum number of simultaneously outstanding requests. Further
    /// `send` calls block until a slot frees (backpressure).
    pub max_in_flight: usize,
    /// Deadline for the initialize round-trip.
    pub handshake_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            max_in_flight: 32,
            handshake_timeout: Duration::from_secs(30),
        }
    }
}

type PendingSender = oneshot::Sender<Result<Value, McpError>>;

/// State shared between the connection and its reader task.
struct Router {
    server_name: String,
    pending: Mutex<HashMap<u64, PendingSender>>,
    permits: Arc<Semaphore>,
    closed_tx: watch::Sender<bool>,
    handler: Option<mpsc::UnboundedSender<Inbound>>,
}

impl Router {
    async fn dispatch(&self, item: Result<Inbound, McpError>) {
        match item {
            Ok(Inbound::Response(response)) => self.route_response(response).await,
            Ok(inbound @ (Inbound::Notification { .. } | Inbound::Request { .. })) => {
                if let Some(handler) = &self.handler {
                    let _ = handler.send(inbound);
                } else {
                    tracing::debug!(
                        server_name = %self.server_name,
                        "no handler registered, discarding unsolicited message"
                    );
                }
            }
            Err(e) => {
                // Single malformed frame: log and keep the connection alive
                tracing::debug!(
                    server_name = %self.server_name,
                    error = %e,
                    "skipping malformed frame"
                );
            }
        }
    }

    async fn route_response(&self, response: Response) {
        let Some(id) = response.id else {
            tracing::debug!(
                server_name = %self.server_name,
                "discarding response without id"
            );
            return;
        };

        let Some(tx) = self.pending.lock().await.remove(&id) else {
            // Late response after a local timeout, or a server bug
            tracing::debug!(
                server_name = %self.server_name,
                id,
                "discarding response with unknown id"
            );
            return;
        };

        let _ = tx.send(map_response(response));
    }

    /// Reject every pending request and mark the connection closed.
    async fn close(&self) {
        self.permits.close();

        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(McpError::ConnectionClosed));
        }
        drop(pending);

        let _ = self.closed_tx.send(true);
    }
}

fn map_response(response: Response) -> Result<Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ExecutionFailure {
            code: err.code,
            message: err.message,
        });
    }

    response
        .result
        .ok_or_else(|| McpError::Protocol("response missing both result and error".to_string()))
}

/// A live protocol channel to one server process.
pub struct ServerConnection {
    server_name: String,
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    router: Arc<Router>,
    next_id: AtomicU64,
    closed_rx: watch::Receiver<bool>,
    child: Mutex<Option<Child>>,
    pid: Option<u32>,
    handshake: RwLock<Option<InitializeResult>>,
}

impl ServerConnection {
    /// Spawn the configured command and attach a connection to its stdio.
    ///
    /// Standard error is captured and drained to diagnostics only, never
    /// parsed as protocol. The child is killed if the connection is dropped
    /// without an explicit `shutdown` (no leaked processes on any exit path).
    pub async fn spawn(
        config: &ServerConfig,
        options: ConnectionOptions,
        handler: Option<mpsc::UnboundedSender<Inbound>>,
    ) -> Result<Self, McpError> {
        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = config.working_dir {
            command.current_dir(dir);
        }

        for entry in &config.env {
            command.env(&entry.key, &entry.value);
        }

        let mut child = command.spawn().map_err(|e| {
            McpError::Spawn(format!(
                "Failed to spawn '{}': {e}\nArgs: {:?}",
                config.command, config.args
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Spawn("Failed to capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Spawn("Failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpError::Spawn("Failed to capture stderr".to_string()))?;

        spawn_stderr_drain(config.name.clone(), stderr);

        let pid = child.id();
        let mut conn = Self::from_streams(config.name.clone(), stdout, stdin, options, handler);
        conn.pid = pid;
        *conn.child.get_mut() = Some(child);

        Ok(conn)
    }

    /// Build a connection over arbitrary stream halves.
    ///
    /// This is the seam the unit tests use (`tokio::io::duplex`); `spawn`
    /// goes through it with the child's stdio.
    pub fn from_streams<R, W>(
        server_name: impl Into<String>,
        reader: R,
        writer: W,
        options: ConnectionOptions,
        handler: Option<mpsc::UnboundedSender<Inbound>>,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let server_name = server_name.into();
        let (closed_tx, closed_rx) = watch::channel(false);

        let router = Arc::new(Router {
            server_name: server_name.clone(),
            pending: Mutex::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(options.max_in_flight)),
            closed_tx,
            handler,
        });

        tokio::spawn(read_loop(reader, Arc::clone(&router)));

        Self {
            server_name,
            writer: Mutex::new(Box::new(writer)),
            router,
            next_id: AtomicU64::new(1),
            closed_rx,
            child: Mutex::new(None),
            pid: None,
            handshake: RwLock::new(None),
        }
    }

    /// Perform the MCP initialize handshake.
    ///
    /// Sends `initialize`, records the result, and acknowledges with the
    /// `notifications/initialized` notification.
    pub async fn initialize(&self, timeout: Duration) -> Result<InitializeResult, McpError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": {
                "name": "tandem",
                "version": env!("CARGO_PKG_VERSION")
            },
            "capabilities": {}
        });

        let value = self.send("initialize", Some(params), timeout).await?;
        let result: InitializeResult = serde_json::from_value(value)?;

        *self.handshake.write().await = Some(result.clone());

        self.notify("notifications/initialized", None).await?;

        Ok(result)
    }

    /// Send a request and wait for the matching response.
    ///
    /// Allocates a fresh id, registers the pending request, writes the
    /// frame, and resolves when the response with that id arrives, fails
    /// with `Timeout` when the deadline elapses, or fails with
    /// `ConnectionClosed` if the process exits first. Multiple sends may be
    /// outstanding simultaneously.
    pub async fn send(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        if self.is_closed() {
            return Err(McpError::ConnectionClosed);
        }

        // Backpressure: the permit is held until response, timeout, or close
        let _permit = Arc::clone(&self.router.permits)
            .acquire_owned()
            .await
            .map_err(|_| McpError::ConnectionClosed)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.router.pending.lock().await.insert(id, tx);

        let frame = match codec::encode_request(id, method, params) {
            Ok(frame) => frame,
            Err(e) => {
                self.router.pending.lock().await.remove(&id);
                return Err(e);
            }
        };

        if let Err(e) = self.write_frame(&frame).await {
            self.router.pending.lock().await.remove(&id);
            tracing::debug!(
                server_name = %self.server_name,
                error = %e,
                "write failed, treating connection as closed"
            );
            return Err(McpError::ConnectionClosed);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped without resolving: the reader task closed
            Ok(Err(_)) => Err(McpError::ConnectionClosed),
            Err(_) => {
                // Remove the pending entry so a late response is discarded
                // instead of resolving a dead waiter
                self.router.pending.lock().await.remove(&id);
                Err(McpError::Timeout {
                    elapsed_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Send a notification: fire-and-forget, no pending request created.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let frame = codec::encode_notification(method, params)?;
        self.write_frame(&frame)
            .await
            .map_err(|_| McpError::ConnectionClosed)
    }

    async fn write_frame(&self, frame: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(frame).await?;
        writer.flush().await
    }

    /// Process ID of the spawned server, when backed by a process.
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Name of the server this connection belongs to.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Handshake result, available after `initialize`.
    pub async fn initialize_result(&self) -> Option<InitializeResult> {
        self.handshake.read().await.clone()
    }

    /// Whether the connection has been closed (process exit, stream error,
    /// or explicit shutdown). A closed connection is never reused.
    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    /// Wait until the connection closes.
    pub async fn closed(&self) {
        let mut rx = self.closed_rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Close the channel and terminate the child process.
    ///
    /// Rejects all pending requests with `ConnectionClosed`, signals EOF on
    /// the server's stdin, then escalates SIGTERM → SIGKILL bounded by
    /// `grace`, and reaps the child.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), McpError> {
        self.router.close().await;

        // Signal EOF so well-behaved servers exit on their own
        let _ = self.writer.lock().await.shutdown().await;

        let child = self.child.lock().await.take();
        if let Some(child) = child {
            shutdown_child(child, grace).await?;
        }

        Ok(())
    }
}

async fn read_loop<R>(mut reader: R, router: Arc<Router>)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for item in decoder.feed(&buf[..n]) {
                    router.dispatch(item).await;
                }
            }
            Err(e) => {
                tracing::debug!(
                    server_name = %router.server_name,
                    error = %e,
                    "read error on server stdout"
                );
                break;
            }
        }
    }

    router.close().await;
}

fn spawn_stderr_drain(server_name: String, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(server_name = %server_name, line = %line, "server stderr");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
    use tokio::time::Instant;

    fn test_pair(options: ConnectionOptions) -> (ServerConnection, DuplexStream) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(client);
        let conn = ServerConnection::from_streams("test", reader, writer, options, None);
        (conn, server)
    }

    fn split_server(
        server: DuplexStream,
    ) -> (
        tokio::io::Lines<BufReader<ReadHalf<DuplexStream>>>,
        WriteHalf<DuplexStream>,
    ) {
        let (reader, writer) = tokio::io::split(server);
        (BufReader::new(reader).lines(), writer)
    }

    async fn respond(writer: &mut WriteHalf<DuplexStream>, id: u64, result: &str) {
        let line = format!("{{\"jsonrpc\":\"2.0\",\"id\":{id},\"result\":{result}}}\n");
        writer.write_all(line.as_bytes()).await.unwrap();
    }

    #[tokio::test]
    async fn test_out_of_order_responses_correlate_by_id() {
        let (conn, server) = test_pair(ConnectionOptions::default());
        let (mut lines, mut writer) = split_server(server);
        let conn = Arc::new(conn);

        let c1 = Arc::clone(&conn);
        let first = tokio::spawn(async move { c1.send("first", None, Duration::from_secs(5)).await });
        let c2 = Arc::clone(&conn);
        let second =
            tokio::spawn(async move { c2.send("second", None, Duration::from_secs(5)).await });

        // Collect both requests, then answer them in reverse order with
        // their method name as the result
        let mut requests = Vec::new();
        for _ in 0..2 {
            let line = lines.next_line().await.unwrap().unwrap();
            let value: Value = serde_json::from_str(&line).unwrap();
            requests.push((
                value["id"].as_u64().unwrap(),
                value["method"].as_str().unwrap().to_string(),
            ));
        }

        for (id, method) in requests.iter().rev() {
            respond(&mut writer, *id, &format!("\"{method}\"")).await;
        }

        assert_eq!(first.await.unwrap().unwrap(), json!("first"));
        assert_eq!(second.await.unwrap().unwrap(), json!("second"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_at_configured_duration() {
        let (conn, server) = test_pair(ConnectionOptions::default());
        // Keep the server end open but silent
        let (_lines, _writer) = split_server(server);

        let start = Instant::now();
        let err = conn
            .send("never/answered", None, Duration::from_millis(200))
            .await
            .unwrap_err();

        assert!(matches!(err, McpError::Timeout { elapsed_ms: 200 }));
        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_late_response_discarded_and_connection_still_usable() {
        let (conn, server) = test_pair(ConnectionOptions::default());
        let (mut lines, mut writer) = split_server(server);

        let err = conn
            .send("slow/call", None, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Timeout { .. }));

        // Deliver the response after the caller gave up: must be discarded
        let line = lines.next_line().await.unwrap().unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        let stale_id = value["id"].as_u64().unwrap();
        respond(&mut writer, stale_id, "\"too late\"").await;

        // A fresh request on the same connection still works
        let pending = tokio::spawn({
            let conn = Arc::new(conn);
            let conn2 = Arc::clone(&conn);
            async move { conn2.send("fresh/call", None, Duration::from_secs(5)).await }
        });

        let line = lines.next_line().await.unwrap().unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_ne!(value["id"].as_u64().unwrap(), stale_id);
        respond(&mut writer, value["id"].as_u64().unwrap(), "\"ok\"").await;

        assert_eq!(pending.await.unwrap().unwrap(), json!("ok"));
    }

    #[tokio::test]
    async fn test_stream_close_rejects_all_pending() {
        let (conn, server) = test_pair(ConnectionOptions::default());
        let conn = Arc::new(conn);

        let c1 = Arc::clone(&conn);
        let first = tokio::spawn(async move { c1.send("a", None, Duration::from_secs(5)).await });
        let c2 = Arc::clone(&conn);
        let second = tokio::spawn(async move { c2.send("b", None, Duration::from_secs(5)).await });

        // Give both sends time to register before the stream dies
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(server);

        assert!(matches!(
            first.await.unwrap().unwrap_err(),
            McpError::ConnectionClosed
        ));
        assert!(matches!(
            second.await.unwrap().unwrap_err(),
            McpError::ConnectionClosed
        ));

        conn.closed().await;
        assert!(conn.is_closed());

        // A closed connection is never reused
        assert!(matches!(
            conn.send("c", None, Duration::from_secs(1)).await,
            Err(McpError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_max_in_flight_backpressure() {
        let options = ConnectionOptions {
            max_in_flight: 1,
            ..ConnectionOptions::default()
        };
        let (conn, server) = test_pair(options);
        let (mut lines, mut writer) = split_server(server);
        let conn = Arc::new(conn);

        let c1 = Arc::clone(&conn);
        let first = tokio::spawn(async move { c1.send("one", None, Duration::from_secs(5)).await });

        let line = lines.next_line().await.unwrap().unwrap();
        let first_id: u64 = serde_json::from_str::<Value>(&line).unwrap()["id"]
            .as_u64()
            .unwrap();

        let c2 = Arc::clone(&conn);
        let second = tokio::spawn(async move { c2.send("two", None, Duration::from_secs(5)).await });

        // With one slot occupied, the second request must not hit the wire
        let blocked =
            tokio::time::timeout(Duration::from_millis(100), lines.next_line()).await;
        assert!(blocked.is_err(), "second request should be blocked");

        respond(&mut writer, first_id, "1").await;
        assert_eq!(first.await.unwrap().unwrap(), json!(1));

        // Slot freed: the second request goes out and completes
        let line = lines.next_line().await.unwrap().unwrap();
        let second_id: u64 = serde_json::from_str::<Value>(&line).unwrap()["id"]
            .as_u64()
            .unwrap();
        respond(&mut writer, second_id, "2").await;
        assert_eq!(second.await.unwrap().unwrap(), json!(2));
    }

    #[tokio::test]
    async fn test_notifications_routed_to_handler() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(client);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _conn = ServerConnection::from_streams(
            "test",
            reader,
            writer,
            ConnectionOptions::default(),
            Some(tx),
        );

        let (_lines, mut server_writer) = split_server(server);
        server_writer
            .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\",\"params\":{\"done\":1}}\n")
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            Inbound::Notification { method, params } => {
                assert_eq!(method, "notifications/progress");
                assert_eq!(params.unwrap()["done"], 1);
            }
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_abort_connection() {
        let (conn, server) = test_pair(ConnectionOptions::default());
        let (mut lines, mut writer) = split_server(server);

        let pending = tokio::spawn({
            let conn = Arc::new(conn);
            let conn2 = Arc::clone(&conn);
            async move { conn2.send("x", None, Duration::from_secs(5)).await }
        });

        let line = lines.next_line().await.unwrap().unwrap();
        let id: u64 = serde_json::from_str::<Value>(&line).unwrap()["id"]
            .as_u64()
            .unwrap();

        // Garbage first, then the real response
        writer.write_all(b"npm warn EBADENGINE\n").await.unwrap();
        respond(&mut writer, id, "\"survived\"").await;

        assert_eq!(pending.await.unwrap().unwrap(), json!("survived"));
    }

    #[tokio::test]
    async fn test_jsonrpc_error_maps_to_execution_failure() {
        let (conn, server) = test_pair(ConnectionOptions::default());
        let (mut lines, mut writer) = split_server(server);

        let pending = tokio::spawn({
            let conn = Arc::new(conn);
            let conn2 = Arc::clone(&conn);
            async move { conn2.send("bad/method", None, Duration::from_secs(5)).await }
        });

        let line = lines.next_line().await.unwrap().unwrap();
        let id: u64 = serde_json::from_str::<Value>(&line).unwrap()["id"]
            .as_u64()
            .unwrap();
        let error_line = format!(
            "{{\"jsonrpc\":\"2.0\",\"id\":{id},\"error\":{{\"code\":-32601,\"message\":\"Method not found\"}}}}\n"
        );
        writer.write_all(error_line.as_bytes()).await.unwrap();

        match pending.await.unwrap().unwrap_err() {
            McpError::ExecutionFailure { code, message } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            other => panic!("expected execution failure, got {other}"),
        }
    }
}
