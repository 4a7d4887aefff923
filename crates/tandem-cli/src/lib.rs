//! CLI library: parser, subcommands, handlers, and event rendering.

pub mod commands;
pub mod handlers;
pub mod parser;

use tandem_core::{EventSink, McpEvent};

pub use commands::Commands;
pub use handlers::dispatch;
pub use parser::Cli;

/// Event sink that forwards subsystem events to the tracing output.
#[derive(Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: McpEvent) {
        let payload = serde_json::to_string(&event).unwrap_or_default();
        tracing::info!(event = event.event_name(), %payload, "mcp event");
    }

    fn clone_box(&self) -> Box<dyn EventSink> {
        Box::new(*self)
    }
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `--verbose` selects debug over info.
pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
