//! MCP server domain types.
//!
//! These types are shared between the subsystem crates and the chat frontend.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Runtime status of an MCP server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    /// Server is not running
    #[default]
    Stopped,
    /// Server process has been spawned, handshake in progress
    Starting,
    /// Server is running and connected
    Running,
    /// Graceful shutdown in progress
    Stopping,
    /// Server encountered an unrecoverable error (see `ServerRecord::last_error`)
    Error,
}

/// Environment variable entry for MCP server processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvEntry {
    /// Environment variable key
    pub key: String,
    /// Environment variable value
    pub value: String,
}

impl EnvEntry {
    /// Create a new environment variable entry.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Configuration for one MCP server.
///
/// Immutable once the server is running; created from the external servers
/// configuration file or via `add_server`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unique server name (the key everything else uses).
    pub name: String,

    /// Executable to spawn (e.g., "npx" or "/usr/local/bin/my-server").
    /// Must be the executable only; flags and arguments go in `args`.
    pub command: String,

    /// Arguments to pass to the executable.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variable overrides for the server process.
    #[serde(default)]
    pub env: Vec<EnvEntry>,

    /// Working directory for the process (must be absolute if specified).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    /// Whether to start this server when the application launches.
    #[serde(default)]
    pub auto_start: bool,
}

impl ServerConfig {
    /// Create a new server configuration.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: Vec::new(),
            working_dir: None,
            auto_start: false,
        }
    }

    /// Set the arguments.
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Add an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(EnvEntry::new(key, value));
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set auto-start.
    #[must_use]
    pub const fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// Validate the configuration.
    ///
    /// Returns an error describing the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("Server name cannot be empty".to_string());
        }

        if self.command.is_empty() {
            return Err("Server command cannot be empty".to_string());
        }

        // Flags and arguments belong in the args array
        if self.command.contains(char::is_whitespace) {
            return Err(
                "Command must be an executable name/path only (e.g., 'npx'). \
                 Put flags and arguments in the 'args' field."
                    .to_string(),
            );
        }

        if let Some(ref cwd) = self.working_dir {
            if !cwd.is_empty() && !std::path::Path::new(cwd).is_absolute() {
                return Err(format!("Server working_dir must be absolute: {cwd}"));
            }
        }

        Ok(())
    }
}

/// One entry in the servers configuration file.
///
/// The file maps server names to entries, so the name lives in the map key
/// rather than in the entry itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerFileEntry {
    /// Executable to spawn.
    pub command: String,
    /// Arguments to pass to the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variable overrides.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory for the process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Whether to start this server at application launch.
    #[serde(default)]
    pub auto_start: bool,
}

/// External servers configuration file (JSON).
///
/// ```json
/// { "servers": { "filesystem": { "command": "npx", "args": ["-y", "@modelcontextprotocol/server-filesystem"] } } }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServersFile {
    /// Server entries keyed by unique name.
    #[serde(default)]
    pub servers: BTreeMap<String, ServerFileEntry>,
}

impl ServersFile {
    /// Convert the file representation into `ServerConfig` values.
    pub fn into_configs(self) -> Vec<ServerConfig> {
        self.servers
            .into_iter()
            .map(|(name, entry)| ServerConfig {
                name,
                command: entry.command,
                args: entry.args,
                env: entry
                    .env
                    .into_iter()
                    .map(|(k, v)| EnvEntry::new(k, v))
                    .collect(),
                working_dir: entry.working_dir,
                auto_start: entry.auto_start,
            })
            .collect()
    }
}

/// Runtime state of one configured server.
///
/// Owned exclusively by the server manager; everything else sees cloned
/// snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Server name (matches `ServerConfig::name`).
    pub name: String,
    /// Current lifecycle status.
    pub status: ServerStatus,
    /// Process ID while running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// When the current process was started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Last startup or runtime error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Number of restarts since the record was created.
    pub restart_count: u32,
}

impl ServerRecord {
    /// Create a fresh record in the `Stopped` state.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ServerStatus::Stopped,
            pid: None,
            started_at: None,
            last_error: None,
            restart_count: 0,
        }
    }
}

/// Tool definition discovered from an MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (function name).
    pub name: String,

    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Name of the server providing this tool.
    pub server_name: String,

    /// JSON Schema for input parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,

    /// JSON Schema for the result, when the server declares one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
}

impl ToolDefinition {
    /// Create a new tool definition.
    pub fn new(name: impl Into<String>, server_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            server_name: server_name.into(),
            input_schema: None,
            output_schema: None,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Set the input schema.
    #[must_use]
    pub fn with_input_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Set the output schema.
    #[must_use]
    pub fn with_output_schema(mut self, schema: serde_json::Value) -> Self {
        self.output_schema = Some(schema);
        self
    }
}

/// Ephemeral record of one tool invocation, tracked end-to-end.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Unique invocation id (also used as the request id in events).
    pub id: Uuid,
    /// Name of the server the tool belongs to.
    pub server_name: String,
    /// Name of the invoked tool.
    pub tool_name: String,
    /// Arguments passed to the tool.
    pub arguments: serde_json::Value,
    /// Deadline for the protocol request.
    pub timeout: Duration,
    /// Number of retries performed so far.
    pub retry_count: u32,
}

/// Immutable outcome of one tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Invocation id.
    pub id: Uuid,
    /// Name of the invoked tool.
    pub tool_name: String,
    /// Name of the server that handled the call.
    pub server_name: String,
    /// Whether the call succeeded.
    pub success: bool,
    /// Result data (if success).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error message (if failed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the invocation started.
    pub started_at: DateTime<Utc>,
    /// When the invocation finished (success or terminal failure).
    pub finished_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Create a success result.
    #[allow(clippy::too_many_arguments)]
    pub fn success(
        id: Uuid,
        tool_name: impl Into<String>,
        server_name: impl Into<String>,
        result: serde_json::Value,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            id,
            tool_name: tool_name.into(),
            server_name: server_name.into(),
            success: true,
            result: Some(result),
            error: None,
            started_at,
            finished_at,
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Create a failure result.
    #[allow(clippy::too_many_arguments)]
    pub fn failure(
        id: Uuid,
        tool_name: impl Into<String>,
        server_name: impl Into<String>,
        error: impl Into<String>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            id,
            tool_name: tool_name.into(),
            server_name: server_name.into(),
            success: false,
            result: None,
            error: Some(error.into()),
            started_at,
            finished_at,
            duration_ms: duration.as_millis() as u64,
        }
    }
}

/// Aggregate statistics over the append-only execution history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStats {
    /// Total number of invocations recorded.
    pub total_invocations: u64,
    /// Number of successful invocations.
    pub success_count: u64,
    /// Number of failed invocations.
    pub error_count: u64,
    /// Mean duration across all invocations, in milliseconds.
    pub average_duration_ms: f64,
    /// Invocation counts per tool name.
    pub tool_usage: BTreeMap<String, u64>,
}

impl ExecutionStats {
    /// Compute statistics from a history snapshot.
    pub fn from_history(history: &[ExecutionResult]) -> Self {
        let total_invocations = history.len() as u64;
        let success_count = history.iter().filter(|r| r.success).count() as u64;
        let total_ms: u64 = history.iter().map(|r| r.duration_ms).sum();

        let mut tool_usage = BTreeMap::new();
        for result in history {
            *tool_usage.entry(result.tool_name.clone()).or_insert(0) += 1;
        }

        Self {
            total_invocations,
            success_count,
            error_count: total_invocations - success_count,
            average_duration_ms: if total_invocations == 0 {
                0.0
            } else {
                total_ms as f64 / total_invocations as f64
            },
            tool_usage,
        }
    }
}

/// Server information from the initialize handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Name the server reports for itself.
    pub name: String,
    /// Server version, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Server capabilities from the initialize handshake.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Present when the server exposes tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
    /// Resource capability blob, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<serde_json::Value>,
    /// Prompt capability blob, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<serde_json::Value>,
}

/// Tools capability details.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsCapability {
    /// Whether the server notifies on tool-list changes.
    #[serde(default, rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Result of the MCP initialize handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    /// Protocol version the server speaks.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Server identification.
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
    /// Declared capabilities.
    #[serde(default)]
    pub capabilities: ServerCapabilities,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ServerConfig::new("filesystem", "npx")
            .with_args(vec!["-y".to_string(), "@test/mcp-server".to_string()])
            .with_env("API_KEY", "secret123")
            .with_auto_start(true);

        assert_eq!(config.name, "filesystem");
        assert_eq!(config.command, "npx");
        assert_eq!(config.env.len(), 1);
        assert_eq!(config.env[0].key, "API_KEY");
        assert!(config.auto_start);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_whitespace_command() {
        let config = ServerConfig::new("bad", "npx -y something");
        let err = config.validate().unwrap_err();
        assert!(err.contains("args"));
    }

    #[test]
    fn test_config_rejects_relative_working_dir() {
        let config = ServerConfig::new("bad", "npx").with_working_dir("relative/path");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_servers_file_into_configs() {
        let json = r#"{
            "servers": {
                "filesystem": {
                    "command": "npx",
                    "args": ["-y", "@modelcontextprotocol/server-filesystem"],
                    "env": {"DEBUG": "1"},
                    "auto_start": true
                }
            }
        }"#;

        let file: ServersFile = serde_json::from_str(json).unwrap();
        let configs = file.into_configs();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].name, "filesystem");
        assert_eq!(configs[0].args.len(), 2);
        assert_eq!(configs[0].env[0].key, "DEBUG");
        assert!(configs[0].auto_start);
    }

    #[test]
    fn test_record_starts_stopped() {
        let record = ServerRecord::new("filesystem");
        assert_eq!(record.status, ServerStatus::Stopped);
        assert_eq!(record.restart_count, 0);
        assert!(record.pid.is_none());
    }

    #[test]
    fn test_execution_stats() {
        let now = Utc::now();
        let history = vec![
            ExecutionResult::success(
                Uuid::new_v4(),
                "echo",
                "test",
                serde_json::json!({}),
                now,
                now,
                Duration::from_millis(10),
            ),
            ExecutionResult::failure(
                Uuid::new_v4(),
                "echo",
                "test",
                "boom",
                now,
                now,
                Duration::from_millis(30),
            ),
        ];

        let stats = ExecutionStats::from_history(&history);
        assert_eq!(stats.total_invocations, 2);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.error_count, 1);
        assert!((stats.average_duration_ms - 20.0).abs() < f64::EPSILON);
        assert_eq!(stats.tool_usage["echo"], 2);
    }

    #[test]
    fn test_initialize_result_parsing() {
        let json = r#"{
            "protocolVersion": "2024-11-05",
            "serverInfo": {"name": "echo-server", "version": "1.0.0"},
            "capabilities": {"tools": {"listChanged": false}}
        }"#;

        let result: InitializeResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.protocol_version, "2024-11-05");
        assert_eq!(result.server_info.name, "echo-server");
        assert!(result.capabilities.tools.is_some());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ServerStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
    }
}
