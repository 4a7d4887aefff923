//! Server manager: lifecycle supervision for configured MCP servers.
//!
//! The manager owns the set of server configurations and the runtime record
//! for each one. It enforces the lifecycle state machine (stopped → starting
//! → running → stopping → stopped, with error as a terminal-until-restarted
//! state), keeps the tool registry in sync, and emits lifecycle events.
//! Crashed servers are reported, never silently restarted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tandem_core::{
    ErrorCategory, ErrorInfo, ErrorSeverity, EventSink, InitializeResult, McpError, McpEvent,
    ServerConfig, ServerRecord, ServerStatus, StopReason, ToolDefinition,
};
use tokio::sync::RwLock;

use crate::connection::{ConnectionOptions, ServerConnection};
use crate::registry::{self, ToolRegistry};

/// Tunables for the manager.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Grace period for SIGTERM before escalating to SIGKILL.
    pub shutdown_grace: Duration,
    /// Deadline for handshake and discovery requests.
    pub request_timeout: Duration,
    /// Options applied to every spawned connection.
    pub connection: ConnectionOptions,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            shutdown_grace: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            connection: ConnectionOptions::default(),
        }
    }
}

struct ServerEntry {
    record: ServerRecord,
    connection: Option<Arc<ServerConnection>>,
}

struct ManagerInner {
    configs: RwLock<HashMap<String, ServerConfig>>,
    servers: RwLock<HashMap<String, ServerEntry>>,
    registry: Arc<ToolRegistry>,
    sink: Box<dyn EventSink>,
    options: ManagerOptions,
}

/// Supervises configured servers. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct ServerManager {
    inner: Arc<ManagerInner>,
}

impl ServerManager {
    /// Create a manager with default options.
    pub fn new(sink: Box<dyn EventSink>) -> Self {
        Self::with_options(sink, ManagerOptions::default())
    }

    /// Create a manager with explicit options.
    pub fn with_options(sink: Box<dyn EventSink>, options: ManagerOptions) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                configs: RwLock::new(HashMap::new()),
                servers: RwLock::new(HashMap::new()),
                registry: Arc::new(ToolRegistry::new()),
                sink,
                options,
            }),
        }
    }

    /// The shared tool registry kept in sync by this manager.
    pub fn registry(&self) -> Arc<ToolRegistry> {
        Arc::clone(&self.inner.registry)
    }

    /// Register a server configuration.
    ///
    /// Rejects invalid configurations and names that already exist.
    pub async fn add_server(&self, config: ServerConfig) -> Result<(), McpError> {
        config.validate().map_err(McpError::InvalidConfig)?;

        let mut configs = self.inner.configs.write().await;
        if configs.contains_key(&config.name) {
            return Err(McpError::InvalidConfig(format!(
                "Server '{}' already exists",
                config.name
            )));
        }
        configs.insert(config.name.clone(), config);
        Ok(())
    }

    /// Register a batch of configurations, typically from the servers file.
    pub async fn load_configs(&self, configs: Vec<ServerConfig>) -> Result<(), McpError> {
        for config in configs {
            self.add_server(config).await?;
        }
        Ok(())
    }

    /// Remove a server configuration, stopping the server first if needed.
    pub async fn remove_server(&self, name: &str) -> Result<(), McpError> {
        if !self.inner.configs.read().await.contains_key(name) {
            return Err(McpError::UnknownServer(name.to_string()));
        }

        match self.stop_server_with_reason(name, StopReason::Requested).await {
            Ok(()) | Err(McpError::ServerNotRunning(_)) => {}
            Err(e) => return Err(e),
        }

        self.inner.configs.write().await.remove(name);
        self.inner.servers.write().await.remove(name);
        self.inner.registry.clear_server(name).await;
        Ok(())
    }

    /// Start a configured server: spawn, handshake, discover tools.
    ///
    /// On failure at any stage the record moves to `Error` with the message
    /// preserved; there is no automatic retry.
    pub async fn start_server(&self, name: &str) -> Result<ServerRecord, McpError> {
        let config = self
            .inner
            .configs
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| McpError::UnknownServer(name.to_string()))?;

        {
            let mut servers = self.inner.servers.write().await;
            let entry = servers.entry(name.to_string()).or_insert_with(|| ServerEntry {
                record: ServerRecord::new(name),
                connection: None,
            });
            match entry.record.status {
                ServerStatus::Starting | ServerStatus::Running => {
                    return Err(McpError::AlreadyRunning(name.to_string()));
                }
                _ => entry.record.status = ServerStatus::Starting,
            }
        }

        tracing::info!(server_name = name, command = %config.command, "starting server");

        match self.bring_up(&config).await {
            Ok((connection, init, tools)) => {
                let connection = Arc::new(connection);
                self.inner
                    .registry
                    .replace_server_tools(name, tools)
                    .await;

                let record = {
                    let mut servers = self.inner.servers.write().await;
                    let entry = servers
                        .get_mut(name)
                        .ok_or_else(|| McpError::UnknownServer(name.to_string()))?;
                    entry.record.status = ServerStatus::Running;
                    entry.record.pid = connection.pid();
                    entry.record.started_at = Some(Utc::now());
                    entry.record.last_error = None;
                    entry.connection = Some(Arc::clone(&connection));
                    entry.record.clone()
                };

                spawn_monitor(
                    Arc::clone(&self.inner),
                    name.to_string(),
                    Arc::clone(&connection),
                );

                self.inner.sink.emit(McpEvent::server_started(
                    name,
                    connection.pid(),
                    init.capabilities,
                ));
                tracing::info!(server_name = name, pid = ?connection.pid(), "server running");

                Ok(record)
            }
            Err(e) => {
                let message = e.to_string();
                {
                    let mut servers = self.inner.servers.write().await;
                    if let Some(entry) = servers.get_mut(name) {
                        entry.record.status = ServerStatus::Error;
                        entry.record.last_error = Some(message.clone());
                        entry.record.pid = None;
                        entry.connection = None;
                    }
                }
                self.inner.sink.emit(McpEvent::server_error(
                    ErrorInfo::from_error(name, &e),
                    ErrorSeverity::Fatal,
                ));
                tracing::warn!(server_name = name, error = %message, "server failed to start");
                Err(e)
            }
        }
    }

    async fn bring_up(
        &self,
        config: &ServerConfig,
    ) -> Result<(ServerConnection, InitializeResult, Vec<ToolDefinition>), McpError> {
        let options = &self.inner.options;
        let connection =
            ServerConnection::spawn(config, options.connection.clone(), None).await?;

        let init = match connection
            .initialize(options.connection.handshake_timeout)
            .await
        {
            Ok(init) => init,
            Err(e) => {
                let _ = connection.shutdown(options.shutdown_grace).await;
                return Err(e);
            }
        };

        let tools =
            match registry::discover_tools(&connection, &config.name, options.request_timeout)
                .await
            {
                Ok(tools) => tools,
                Err(e) => {
                    let _ = connection.shutdown(options.shutdown_grace).await;
                    return Err(e);
                }
            };

        Ok((connection, init, tools))
    }

    /// Stop a running server gracefully.
    pub async fn stop_server(&self, name: &str) -> Result<(), McpError> {
        self.stop_server_with_reason(name, StopReason::Requested)
            .await
    }

    async fn stop_server_with_reason(
        &self,
        name: &str,
        reason: StopReason,
    ) -> Result<(), McpError> {
        if !self.inner.configs.read().await.contains_key(name) {
            return Err(McpError::UnknownServer(name.to_string()));
        }

        let (connection, started_at) = {
            let mut servers = self.inner.servers.write().await;
            let entry = servers
                .get_mut(name)
                .filter(|e| {
                    matches!(
                        e.record.status,
                        ServerStatus::Running | ServerStatus::Starting
                    )
                })
                .ok_or_else(|| McpError::ServerNotRunning(name.to_string()))?;

            entry.record.status = ServerStatus::Stopping;
            (entry.connection.take(), entry.record.started_at)
        };

        tracing::info!(server_name = name, ?reason, "stopping server");

        if let Some(connection) = connection {
            if let Err(e) = connection.shutdown(self.inner.options.shutdown_grace).await {
                let message = e.to_string();
                let mut servers = self.inner.servers.write().await;
                if let Some(entry) = servers.get_mut(name) {
                    entry.record.status = ServerStatus::Error;
                    entry.record.last_error = Some(message);
                }
                return Err(e);
            }
        }

        {
            let mut servers = self.inner.servers.write().await;
            if let Some(entry) = servers.get_mut(name) {
                entry.record.status = ServerStatus::Stopped;
                entry.record.pid = None;
                entry.record.started_at = None;
            }
        }

        self.inner.registry.clear_server(name).await;

        let uptime_ms = started_at
            .map(|t| (Utc::now() - t).num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        self.inner
            .sink
            .emit(McpEvent::server_stopped(name, reason, uptime_ms));

        Ok(())
    }

    /// Stop (if running) and start a server, bumping its restart counter.
    pub async fn restart_server(&self, name: &str) -> Result<ServerRecord, McpError> {
        match self.stop_server_with_reason(name, StopReason::Restart).await {
            Ok(()) | Err(McpError::ServerNotRunning(_)) => {}
            Err(e) => return Err(e),
        }

        let record = self.start_server(name).await?;

        let mut servers = self.inner.servers.write().await;
        if let Some(entry) = servers.get_mut(name) {
            entry.record.restart_count += 1;
            return Ok(entry.record.clone());
        }
        Ok(record)
    }

    /// Snapshot of every configured server's runtime record, sorted by name.
    pub async fn get_servers(&self) -> Vec<ServerRecord> {
        let configs = self.inner.configs.read().await;
        let servers = self.inner.servers.read().await;

        let mut records: Vec<ServerRecord> = configs
            .keys()
            .map(|name| {
                servers
                    .get(name)
                    .map_or_else(|| ServerRecord::new(name.clone()), |e| e.record.clone())
            })
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    /// Snapshot of one server's runtime record.
    pub async fn get_server(&self, name: &str) -> Result<ServerRecord, McpError> {
        if !self.inner.configs.read().await.contains_key(name) {
            return Err(McpError::UnknownServer(name.to_string()));
        }
        Ok(self
            .inner
            .servers
            .read()
            .await
            .get(name)
            .map_or_else(|| ServerRecord::new(name), |e| e.record.clone()))
    }

    /// The live connection for a running server.
    pub async fn connection(&self, name: &str) -> Result<Arc<ServerConnection>, McpError> {
        let servers = self.inner.servers.read().await;
        servers
            .get(name)
            .filter(|e| e.record.status == ServerStatus::Running)
            .and_then(|e| e.connection.clone())
            .ok_or_else(|| McpError::ServerNotRunning(name.to_string()))
    }

    /// Re-run tool discovery for a running server, replacing its registry
    /// entries wholesale.
    pub async fn refresh_tools(&self, name: &str) -> Result<Vec<ToolDefinition>, McpError> {
        let connection = self.connection(name).await?;
        let tools = registry::discover_tools(
            &connection,
            name,
            self.inner.options.request_timeout,
        )
        .await?;
        self.inner
            .registry
            .replace_server_tools(name, tools.clone())
            .await;
        Ok(tools)
    }

    /// Probe a configuration without registering it: spawn, handshake,
    /// discover tools, shut down. No records are created and no lifecycle
    /// events are emitted.
    pub async fn test_connection(
        &self,
        config: &ServerConfig,
    ) -> Result<(InitializeResult, Vec<ToolDefinition>), McpError> {
        config.validate().map_err(McpError::InvalidConfig)?;

        let (connection, init, tools) = self.bring_up(config).await?;
        connection
            .shutdown(self.inner.options.shutdown_grace)
            .await?;
        Ok((init, tools))
    }

    /// Start every configuration marked `auto_start`, continuing past
    /// individual failures.
    pub async fn start_auto(&self) -> Vec<(String, McpError)> {
        let names: Vec<String> = {
            let configs = self.inner.configs.read().await;
            let mut names: Vec<String> = configs
                .values()
                .filter(|c| c.auto_start)
                .map(|c| c.name.clone())
                .collect();
            names.sort();
            names
        };

        let mut failures = Vec::new();
        for name in names {
            if let Err(e) = self.start_server(&name).await {
                failures.push((name, e));
            }
        }
        failures
    }

    /// Stop every running server. Used on application shutdown.
    pub async fn shutdown_all(&self) {
        let names: Vec<String> = {
            let servers = self.inner.servers.read().await;
            servers
                .iter()
                .filter(|(_, e)| {
                    matches!(
                        e.record.status,
                        ServerStatus::Running | ServerStatus::Starting
                    )
                })
                .map(|(name, _)| name.clone())
                .collect()
        };

        for name in names {
            if let Err(e) = self
                .stop_server_with_reason(&name, StopReason::Shutdown)
                .await
            {
                tracing::warn!(server_name = %name, error = %e, "failed to stop server during shutdown");
            }
        }
    }
}

/// Watch a connection and flip the record to `Error` if the process dies
/// while the server is supposed to be running.
fn spawn_monitor(inner: Arc<ManagerInner>, name: String, connection: Arc<ServerConnection>) {
    tokio::spawn(async move {
        connection.closed().await;

        let crashed = {
            let mut servers = inner.servers.write().await;
            match servers.get_mut(&name) {
                Some(entry)
                    if entry.record.status == ServerStatus::Running
                        && entry
                            .connection
                            .as_ref()
                            .is_some_and(|c| Arc::ptr_eq(c, &connection)) =>
                {
                    entry.record.status = ServerStatus::Error;
                    entry.record.last_error =
                        Some("Server process exited unexpectedly".to_string());
                    entry.record.pid = None;
                    entry.connection = None;
                    true
                }
                // Deliberate stop or an already-replaced connection
                _ => false,
            }
        };

        if crashed {
            inner.registry.clear_server(&name).await;
            inner.sink.emit(McpEvent::server_error(
                ErrorInfo::new(
                    &name,
                    "Server process exited unexpectedly",
                    ErrorCategory::Process,
                ),
                ErrorSeverity::Fatal,
            ));
            tracing::warn!(server_name = %name, "server process exited unexpectedly");
        }
    });
}
