//! Main CLI parser and top-level argument handling.

use clap::Parser;

use crate::commands::Commands;

/// Command-line interface for managing MCP servers and executing tools.
///
/// Global options apply to every subcommand; the servers configuration file
/// is the single source of server definitions.
#[derive(Parser)]
#[command(name = "tandem")]
#[command(about = "Manage MCP servers and execute their tools")]
#[command(version)]
pub struct Cli {
    /// Path to the servers configuration file
    #[arg(long = "config", global = true, default_value = "mcp_servers.json")]
    pub config: String,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}
