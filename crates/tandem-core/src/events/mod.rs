//! Canonical event union for the MCP subsystem.
//!
//! Events are consumed fire-and-forget by the application's event emitter
//! (chat frontend, SSE handlers) for observability. The subsystem emits each
//! event at most once per occurrence and never waits on consumers.
//!
//! # Wire Format
//!
//! Events are serialized with a `type` tag:
//!
//! ```json
//! { "type": "server_started", "serverName": "filesystem", "pid": 4242 }
//! ```

mod mcp;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::ServerCapabilities;
use crate::ports::ErrorInfo;

/// Severity of a server error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    /// Recoverable: the subsystem keeps operating.
    Warning,
    /// The server is unusable until restarted.
    Fatal,
}

/// Why a server was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// An explicit `stop_server` call.
    Requested,
    /// The stop phase of a restart.
    Restart,
    /// Application-wide shutdown.
    Shutdown,
}

/// Lifecycle and execution events emitted by the MCP subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum McpEvent {
    /// A server finished its handshake and is ready.
    ServerStarted {
        /// Name of the server.
        #[serde(rename = "serverName")]
        server_name: String,
        /// Process ID of the spawned server.
        #[serde(skip_serializing_if = "Option::is_none")]
        pid: Option<u32>,
        /// Capabilities the server declared during initialize.
        capabilities: ServerCapabilities,
        /// When the server became ready.
        timestamp: DateTime<Utc>,
    },

    /// A server was stopped.
    ServerStopped {
        /// Name of the server.
        #[serde(rename = "serverName")]
        server_name: String,
        /// Why the server was stopped.
        reason: StopReason,
        /// Measured uptime in milliseconds.
        #[serde(rename = "uptimeMs")]
        uptime_ms: u64,
    },

    /// A server failed to start or died unexpectedly.
    ServerError {
        /// User-safe error information.
        error: ErrorInfo,
        /// How bad it is.
        severity: ErrorSeverity,
    },

    /// A tool call was dispatched to a server.
    ToolInvoked {
        /// Name of the invoked tool.
        #[serde(rename = "toolName")]
        tool_name: String,
        /// Server handling the call.
        #[serde(rename = "serverName")]
        server_name: String,
        /// Invocation id correlating invoked/completed/failed events.
        #[serde(rename = "requestId")]
        request_id: Uuid,
        /// Arguments passed to the tool.
        parameters: serde_json::Value,
    },

    /// A tool call finished successfully.
    ToolCompleted {
        /// Name of the invoked tool.
        #[serde(rename = "toolName")]
        tool_name: String,
        /// Server that handled the call.
        #[serde(rename = "serverName")]
        server_name: String,
        /// Invocation id correlating invoked/completed/failed events.
        #[serde(rename = "requestId")]
        request_id: Uuid,
        /// Tool result payload.
        result: serde_json::Value,
        /// Wall-clock execution time in milliseconds.
        #[serde(rename = "executionTimeMs")]
        execution_time_ms: u64,
    },

    /// A tool call failed terminally (retries exhausted or not applicable).
    ToolFailed {
        /// Name of the invoked tool.
        #[serde(rename = "toolName")]
        tool_name: String,
        /// Server the call was routed to.
        #[serde(rename = "serverName")]
        server_name: String,
        /// Invocation id correlating invoked/completed/failed events.
        #[serde(rename = "requestId")]
        request_id: Uuid,
        /// Terminal error message.
        error: String,
        /// Wall-clock time spent before giving up, in milliseconds.
        #[serde(rename = "executionTimeMs")]
        execution_time_ms: u64,
    },
}

impl McpEvent {
    /// Get the event name for wire protocols.
    ///
    /// This provides consistent event naming across transports.
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::ServerStarted { .. } => "mcp:started",
            Self::ServerStopped { .. } => "mcp:stopped",
            Self::ServerError { .. } => "mcp:error",
            Self::ToolInvoked { .. } => "tool:invoked",
            Self::ToolCompleted { .. } => "tool:completed",
            Self::ToolFailed { .. } => "tool:failed",
        }
    }
}
