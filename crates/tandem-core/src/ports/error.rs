//! Error taxonomy for the MCP subsystem.
//!
//! One enum covers the whole subsystem so that callers and the retry policy
//! can classify failures without inspecting message strings.

use thiserror::Error;

/// Errors produced by the MCP subsystem.
#[derive(Debug, Error)]
pub enum McpError {
    /// Process could not start. Fatal for that start attempt.
    #[error("Failed to spawn server process: {0}")]
    Spawn(String),

    /// A single malformed protocol frame. The connection continues.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Process exited or the stream broke. All pending requests on the
    /// connection fail; the connection must be recreated.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No response within the deadline. Request-scoped.
    #[error("Timed out after {elapsed_ms}ms waiting for response")]
    Timeout {
        /// Milliseconds waited before giving up.
        elapsed_ms: u64,
    },

    /// The requested tool is not in the registry.
    #[error("Tool not found: '{tool}' on server '{server}'")]
    ToolNotFound {
        /// Server the tool was looked up on.
        server: String,
        /// Tool name that was requested.
        tool: String,
    },

    /// The server is configured but not in the `Running` state.
    #[error("Server not running: {0}")]
    ServerNotRunning(String),

    /// Arguments failed schema validation. Never forwarded, never retried.
    #[error("Invalid arguments: {}", .0.join("; "))]
    InvalidArguments(Vec<String>),

    /// The tool itself reported failure (protocol-level error object or an
    /// `isError` result envelope).
    #[error("Tool execution failed: [{code}] {message}")]
    ExecutionFailure {
        /// Error code reported by the server (0 when the tool used the
        /// `isError` envelope instead of a protocol error).
        code: i64,
        /// Error message reported by the server.
        message: String,
    },

    /// Configuration rejected before any process work.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Start requested while the server is already starting or running.
    #[error("Server already running: {0}")]
    AlreadyRunning(String),

    /// No configuration exists under that name.
    #[error("Unknown server: {0}")]
    UnknownServer(String),

    /// Stream I/O failure outside of a clean close.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Whether the retry policy may re-dispatch after this failure.
    ///
    /// `Timeout` and `ConnectionClosed` are transient. `ExecutionFailure` is
    /// retried only when the policy opts in. Everything else is a terminal
    /// caller or configuration error.
    pub const fn is_retryable(&self, retry_failed_executions: bool) -> bool {
        match self {
            Self::Timeout { .. } | Self::ConnectionClosed => true,
            Self::ExecutionFailure { .. } => retry_failed_executions,
            _ => false,
        }
    }
}

/// Categories of MCP errors for event consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Server process lifecycle error.
    Process,
    /// Protocol communication error.
    Protocol,
    /// Tool invocation error.
    Tool,
    /// Configuration error.
    Configuration,
    /// Unknown/internal error.
    Unknown,
}

impl From<&McpError> for ErrorCategory {
    fn from(error: &McpError) -> Self {
        match error {
            McpError::Spawn(_)
            | McpError::ConnectionClosed
            | McpError::ServerNotRunning(_)
            | McpError::AlreadyRunning(_) => Self::Process,
            McpError::Protocol(_) | McpError::Timeout { .. } | McpError::Json(_) => Self::Protocol,
            McpError::ToolNotFound { .. }
            | McpError::InvalidArguments(_)
            | McpError::ExecutionFailure { .. } => Self::Tool,
            McpError::InvalidConfig(_) | McpError::UnknownServer(_) => Self::Configuration,
            McpError::Io(_) => Self::Unknown,
        }
    }
}

/// User-safe error information for event payloads.
///
/// Event consumers render this directly, so it carries a category and a
/// message rather than raw OS or serde errors.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    /// Name of the server the error relates to.
    pub server_name: String,
    /// User-friendly error message.
    pub message: String,
    /// Error category for consumer-side handling.
    pub category: ErrorCategory,
}

impl ErrorInfo {
    /// Build error info from a subsystem error.
    pub fn from_error(server_name: impl Into<String>, error: &McpError) -> Self {
        Self {
            server_name: server_name.into(),
            message: error.to_string(),
            category: ErrorCategory::from(error),
        }
    }

    /// Build error info with an explicit category.
    pub fn new(
        server_name: impl Into<String>,
        message: impl Into<String>,
        category: ErrorCategory,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            message: message.into(),
            category,
        }
    }
}
