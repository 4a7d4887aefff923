//! Port definitions: the seams between the MCP subsystem and its adapters.

mod error;
mod event_sink;

pub use error::{ErrorCategory, ErrorInfo, McpError};
pub use event_sink::{EventSink, NoopSink};
