//! Domain types for the MCP subsystem.

pub mod mcp;

pub use mcp::*;
