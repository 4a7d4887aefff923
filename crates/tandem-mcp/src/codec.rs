//! Protocol codec: framing and parsing of JSON-RPC 2.0 messages.
//!
//! Messages are line-delimited (one JSON object per `\n`-terminated line).
//! The codec has no process or connection awareness; it turns requests and
//! notifications into framed bytes, and arbitrary inbound bytes into decoded
//! messages, tolerating message boundaries that do not align with I/O chunks.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tandem_core::McpError;

/// JSON-RPC protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 request.
#[derive(Debug, Serialize)]
pub struct Request {
    jsonrpc: &'static str,
    /// Request id, unique per connection.
    pub id: u64,
    /// Method name (e.g., `tools/call`).
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Method parameters.
    pub params: Option<Value>,
}

impl Request {
    /// Create a new request.
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Deserialize)]
pub struct Response {
    #[allow(dead_code)] // Field required by serde deserialization
    jsonrpc: String,
    /// Echoed request id. Absent on server-side parse errors.
    #[serde(default)]
    pub id: Option<u64>,
    /// Result payload (mutually exclusive with `error`).
    #[serde(default)]
    pub result: Option<Value>,
    /// Error payload (mutually exclusive with `result`).
    #[serde(default)]
    pub error: Option<ResponseError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(default)]
    pub data: Option<Value>,
}

/// A decoded inbound message.
#[derive(Debug)]
pub enum Inbound {
    /// Response to one of our requests, correlated by id.
    Response(Response),
    /// Server-initiated notification (no id, no response expected).
    Notification {
        /// Notification method name.
        method: String,
        /// Notification parameters.
        params: Option<Value>,
    },
    /// Server-initiated request (carries an id the server expects echoed).
    Request {
        /// The server's request id, passed through untouched.
        id: Value,
        /// Request method name.
        method: String,
        /// Request parameters.
        params: Option<Value>,
    },
}

/// Encode a request as a framed byte sequence.
pub fn encode_request(id: u64, method: &str, params: Option<Value>) -> Result<Vec<u8>, McpError> {
    let mut bytes = serde_json::to_vec(&Request::new(id, method, params))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Encode a notification (no id — no response expected) as a framed byte
/// sequence.
pub fn encode_notification(method: &str, params: Option<Value>) -> Result<Vec<u8>, McpError> {
    let notification = serde_json::json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": method,
        "params": params.unwrap_or_else(|| serde_json::json!({})),
    });
    let mut bytes = serde_json::to_vec(&notification)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Restartable, stateful frame decoder.
///
/// Buffers incomplete input across `feed` calls and produces zero or more
/// complete messages per call. A malformed frame yields a `Protocol` error
/// for that frame only; decoding resumes at the next line boundary. Trailing
/// bytes without a newline are retained, never dropped.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed a chunk of bytes, returning every complete frame it finishes.
    ///
    /// Blank lines are skipped without producing an item.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<Inbound, McpError>> {
        self.buffer.extend_from_slice(chunk);

        let mut items = Vec::new();
        let mut search = 0;

        while let Some(offset) = self.buffer[search..].iter().position(|b| *b == b'\n') {
            let newline = search + offset;
            let mut end = newline;
            if end > search && self.buffer[end - 1] == b'\r' {
                end -= 1;
            }

            let line = &self.buffer[search..end];
            if !line.iter().all(u8::is_ascii_whitespace) {
                items.push(decode_line(line));
            }

            search = newline + 1;
        }

        if search > 0 {
            self.buffer.drain(..search);
        }

        items
    }

    /// Number of buffered bytes awaiting a line terminator.
    pub const fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }
}

fn decode_line(line: &[u8]) -> Result<Inbound, McpError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| McpError::Protocol("frame is not valid UTF-8".to_string()))?;

    let value: Value = serde_json::from_str(text.trim())
        .map_err(|e| McpError::Protocol(format!("frame is not valid JSON: {e}")))?;

    classify(value)
}

fn classify(value: Value) -> Result<Inbound, McpError> {
    let object = value
        .as_object()
        .ok_or_else(|| McpError::Protocol("frame is not a JSON object".to_string()))?;

    if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(McpError::Protocol(
            "missing or unsupported jsonrpc version".to_string(),
        ));
    }

    if let Some(method) = object.get("method").and_then(Value::as_str) {
        let method = method.to_string();
        let params = object.get("params").cloned();
        return Ok(match object.get("id") {
            Some(id) => Inbound::Request {
                id: id.clone(),
                method,
                params,
            },
            None => Inbound::Notification { method, params },
        });
    }

    serde_json::from_value::<Response>(value)
        .map(Inbound::Response)
        .map_err(|e| McpError::Protocol(format!("malformed response frame: {e}")))
}
