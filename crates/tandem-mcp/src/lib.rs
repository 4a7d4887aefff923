//! MCP server supervision and tool execution.
//!
//! This crate spawns Model Context Protocol servers as child processes,
//! speaks line-delimited JSON-RPC 2.0 over their stdio, keeps an aggregated
//! tool catalog, and executes tool calls with validation, timeouts, and an
//! injectable retry policy. Lifecycle and execution outcomes surface as
//! events through the [`EventSink`] port.

pub mod codec;
pub mod connection;
pub mod executor;
pub mod manager;
pub mod registry;
pub mod retry;
pub mod schema;
pub(crate) mod shutdown;

// Re-export domain types from core for convenience
pub use tandem_core::{
    EnvEntry, ErrorCategory, ErrorInfo, ErrorSeverity, EventSink, ExecutionResult, ExecutionStats,
    InitializeResult, McpError, McpEvent, NoopSink, ServerCapabilities, ServerConfig, ServerInfo,
    ServerRecord, ServerStatus, ServersFile, StopReason, ToolDefinition, ToolInvocation,
};

// Re-export this crate's main types
pub use connection::{ConnectionOptions, PROTOCOL_VERSION, ServerConnection};
pub use executor::{ExecutorOptions, ToolExecutor};
pub use manager::{ManagerOptions, ServerManager};
pub use registry::ToolRegistry;
pub use retry::{BackoffStrategy, RetryPolicy};
