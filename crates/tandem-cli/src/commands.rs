//! Subcommand definitions.

use clap::Subcommand;

/// All available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// List configured servers
    List,

    /// List the tools a server provides (starts the server temporarily)
    Tools {
        /// Server name from the configuration file
        server: String,
    },

    /// Execute a tool on a server
    Call {
        /// Server name from the configuration file
        server: String,

        /// Tool name as reported by the server
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,

        /// Request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Probe a server configuration: spawn, handshake, discover, shut down
    Test {
        /// Server name from the configuration file
        server: String,
    },

    /// Start auto-start servers and supervise them until interrupted
    Run,
}
