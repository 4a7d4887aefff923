//! CLI entry point - the composition root.
//!
//! This is the only place where the manager, executor, and event sink are
//! wired together; handlers receive everything through `dispatch`.

use clap::Parser;

use tandem_cli::{Cli, dispatch, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    dispatch(cli).await
}
