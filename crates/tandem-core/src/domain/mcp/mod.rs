//! MCP domain types: server configuration, runtime records, tools, results.

mod types;

pub use types::*;
