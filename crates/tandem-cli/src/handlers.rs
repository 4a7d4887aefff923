//! Command handlers: load configuration, drive the manager and executor,
//! render results.

use std::time::Duration;

use anyhow::Context;
use serde_json::Value;
use tandem_mcp::{ServerConfig, ServerManager, ServersFile, ToolExecutor};

use crate::TracingSink;
use crate::commands::Commands;
use crate::parser::Cli;

/// Route a parsed invocation to its handler.
pub async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::List => handle_list(&cli.config),
        Commands::Tools { server } => handle_tools(&cli.config, &server).await,
        Commands::Call {
            server,
            tool,
            args,
            timeout,
        } => handle_call(&cli.config, &server, &tool, &args, timeout).await,
        Commands::Test { server } => handle_test(&cli.config, &server).await,
        Commands::Run => handle_run(&cli.config).await,
    }
}

fn load_configs(path: &str) -> anyhow::Result<Vec<ServerConfig>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read servers file: {path}"))?;
    let file: ServersFile =
        serde_json::from_str(&text).with_context(|| format!("Invalid servers file: {path}"))?;
    Ok(file.into_configs())
}

async fn build_manager(path: &str) -> anyhow::Result<ServerManager> {
    let manager = ServerManager::new(Box::new(TracingSink));
    manager.load_configs(load_configs(path)?).await?;
    Ok(manager)
}

fn handle_list(config_path: &str) -> anyhow::Result<()> {
    let configs = load_configs(config_path)?;
    if configs.is_empty() {
        println!("No servers configured in {config_path}");
        return Ok(());
    }

    println!("{:<20} {:<30} {:<10}", "NAME", "COMMAND", "AUTO-START");
    for config in configs {
        let command = if config.args.is_empty() {
            config.command
        } else {
            format!("{} {}", config.command, config.args.join(" "))
        };
        println!(
            "{:<20} {:<30} {:<10}",
            config.name,
            command,
            if config.auto_start { "yes" } else { "no" }
        );
    }
    Ok(())
}

async fn handle_tools(config_path: &str, server: &str) -> anyhow::Result<()> {
    let manager = build_manager(config_path).await?;

    manager.start_server(server).await?;
    let tools = manager.registry().server_tools(server).await;
    manager.shutdown_all().await;

    if tools.is_empty() {
        println!("Server '{server}' provides no tools");
        return Ok(());
    }

    println!("Tools on '{server}':");
    for tool in tools {
        match tool.description {
            Some(desc) => println!("  {:<24} {desc}", tool.name),
            None => println!("  {}", tool.name),
        }
    }
    Ok(())
}

async fn handle_call(
    config_path: &str,
    server: &str,
    tool: &str,
    args: &str,
    timeout_secs: Option<u64>,
) -> anyhow::Result<()> {
    let arguments: Value =
        serde_json::from_str(args).context("--args must be a valid JSON value")?;

    let manager = build_manager(config_path).await?;
    manager.start_server(server).await?;

    let executor = ToolExecutor::new(manager.clone(), Box::new(TracingSink));
    let outcome = executor
        .execute_tool(server, tool, arguments, timeout_secs.map(Duration::from_secs))
        .await;

    manager.shutdown_all().await;

    let result = outcome?;
    if let Some(value) = result.result {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    eprintln!("Completed in {}ms", result.duration_ms);
    Ok(())
}

async fn handle_test(config_path: &str, server: &str) -> anyhow::Result<()> {
    let config = load_configs(config_path)?
        .into_iter()
        .find(|c| c.name == server)
        .with_context(|| format!("No server named '{server}' in {config_path}"))?;

    let manager = ServerManager::new(Box::new(TracingSink));
    let (init, tools) = manager.test_connection(&config).await?;

    println!("Server:   {}", init.server_info.name);
    if let Some(version) = init.server_info.version {
        println!("Version:  {version}");
    }
    println!("Protocol: {}", init.protocol_version);
    println!("Tools:    {}", tools.len());
    for tool in tools {
        println!("  - {}", tool.name);
    }
    Ok(())
}

async fn handle_run(config_path: &str) -> anyhow::Result<()> {
    let manager = build_manager(config_path).await?;

    let failures = manager.start_auto().await;
    for (name, error) in &failures {
        eprintln!("Failed to start '{name}': {error}");
    }

    let running: Vec<String> = manager
        .get_servers()
        .await
        .into_iter()
        .filter(|r| r.status == tandem_mcp::ServerStatus::Running)
        .map(|r| r.name)
        .collect();

    if running.is_empty() {
        anyhow::bail!("No servers running (mark servers with \"auto_start\": true)");
    }

    println!("Running: {} (press Ctrl-C to stop)", running.join(", "));
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    println!("Shutting down...");
    manager.shutdown_all().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_configs_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"servers": {{"fs": {{"command": "npx", "args": ["-y", "pkg"], "auto_start": true}}}}}}"#
        )
        .unwrap();

        let configs = load_configs(file.path().to_str().unwrap()).unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].name, "fs");
        assert!(configs[0].auto_start);
    }

    #[test]
    fn test_load_configs_missing_file() {
        let err = load_configs("/nonexistent/servers.json").unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }

    #[test]
    fn test_load_configs_rejects_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(load_configs(file.path().to_str().unwrap()).is_err());
    }
}
