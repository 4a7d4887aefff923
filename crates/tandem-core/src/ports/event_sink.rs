//! Event sink trait for lifecycle and execution events.
//!
//! The subsystem does not depend on the application's event bus internals,
//! only on this fire-and-forget emit contract. The sink is injected into the
//! server manager and tool executor at construction.

use crate::events::McpEvent;

/// Trait for consuming MCP subsystem events.
///
/// # Implementations
///
/// - `NoopSink` - For tests and CLI contexts that don't need events
/// - Adapter-specific implementations (chat frontend bus, SSE, etc.)
pub trait EventSink: Send + Sync {
    /// Emit an event, at most once per occurrence.
    ///
    /// Implementations must not block; buffer or drop instead.
    fn emit(&self, event: McpEvent);

    /// Clone this sink into a boxed trait object.
    ///
    /// This enables cloning of `Arc<dyn EventSink>` without requiring the
    /// underlying type to implement Clone.
    fn clone_box(&self) -> Box<dyn EventSink>;
}

/// A no-op sink for tests and contexts without an event listener.
#[derive(Debug, Clone, Default)]
pub struct NoopSink;

impl NoopSink {
    /// Create a new no-op sink.
    pub const fn new() -> Self {
        Self
    }
}

impl EventSink for NoopSink {
    fn emit(&self, _event: McpEvent) {
        // Intentionally do nothing
    }

    fn clone_box(&self) -> Box<dyn EventSink> {
        Box::new(self.clone())
    }
}
