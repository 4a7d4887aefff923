//! Core domain types, events, and ports for Tandem's MCP subsystem.
//!
//! This crate carries no adapter dependencies: no process spawning, no I/O.
//! The `tandem-mcp` crate implements the runtime behavior against the types
//! and ports defined here.

pub mod domain;
pub mod events;
pub mod ports;

// Re-export commonly used types for convenience
pub use domain::{
    EnvEntry, ExecutionResult, ExecutionStats, InitializeResult, ServerCapabilities, ServerConfig,
    ServerInfo, ServerRecord, ServerStatus, ServersFile, ToolDefinition, ToolInvocation,
    ToolsCapability,
};
pub use events::{ErrorSeverity, McpEvent, StopReason};
pub use ports::{ErrorCategory, ErrorInfo, EventSink, McpError, NoopSink};
