//! Constructor helpers for MCP subsystem events.

use chrono::Utc;
use uuid::Uuid;

use super::{ErrorSeverity, McpEvent, StopReason};
use crate::domain::ServerCapabilities;
use crate::ports::ErrorInfo;

impl McpEvent {
    /// Create a server started event stamped with the current time.
    pub fn server_started(
        server_name: impl Into<String>,
        pid: Option<u32>,
        capabilities: ServerCapabilities,
    ) -> Self {
        Self::ServerStarted {
            server_name: server_name.into(),
            pid,
            capabilities,
            timestamp: Utc::now(),
        }
    }

    /// Create a server stopped event.
    pub fn server_stopped(
        server_name: impl Into<String>,
        reason: StopReason,
        uptime_ms: u64,
    ) -> Self {
        Self::ServerStopped {
            server_name: server_name.into(),
            reason,
            uptime_ms,
        }
    }

    /// Create a server error event.
    pub const fn server_error(error: ErrorInfo, severity: ErrorSeverity) -> Self {
        Self::ServerError { error, severity }
    }

    /// Create a tool invoked event.
    pub fn tool_invoked(
        tool_name: impl Into<String>,
        server_name: impl Into<String>,
        request_id: Uuid,
        parameters: serde_json::Value,
    ) -> Self {
        Self::ToolInvoked {
            tool_name: tool_name.into(),
            server_name: server_name.into(),
            request_id,
            parameters,
        }
    }

    /// Create a tool completed event.
    pub fn tool_completed(
        tool_name: impl Into<String>,
        server_name: impl Into<String>,
        request_id: Uuid,
        result: serde_json::Value,
        execution_time_ms: u64,
    ) -> Self {
        Self::ToolCompleted {
            tool_name: tool_name.into(),
            server_name: server_name.into(),
            request_id,
            result,
            execution_time_ms,
        }
    }

    /// Create a tool failed event.
    pub fn tool_failed(
        tool_name: impl Into<String>,
        server_name: impl Into<String>,
        request_id: Uuid,
        error: impl Into<String>,
        execution_time_ms: u64,
    ) -> Self {
        Self::ToolFailed {
            tool_name: tool_name.into(),
            server_name: server_name.into(),
            request_id,
            error: error.into(),
            execution_time_ms,
        }
    }
}
