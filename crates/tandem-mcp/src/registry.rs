//! Tool registry: the aggregated catalog of tools across running servers.
//!
//! The registry is a passive cache. Discovery (`tools/list`) happens when a
//! server starts or is explicitly refreshed; each refresh replaces that
//! server's tools wholesale, so the registry never accumulates stale entries.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tandem_core::{McpError, ToolDefinition};
use tokio::sync::RwLock;

use crate::connection::ServerConnection;

#[derive(Debug)]
struct ServerTools {
    tools: Vec<ToolDefinition>,
    last_updated: DateTime<Utc>,
}

/// Aggregated tool catalog, keyed by server name.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, ServerTools>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every tool registered for `server_name` with `tools`.
    pub async fn replace_server_tools(&self, server_name: &str, tools: Vec<ToolDefinition>) {
        tracing::debug!(server_name, count = tools.len(), "registering tools");
        self.tools.write().await.insert(
            server_name.to_string(),
            ServerTools {
                tools,
                last_updated: Utc::now(),
            },
        );
    }

    /// Drop every tool registered for `server_name`.
    pub async fn clear_server(&self, server_name: &str) {
        self.tools.write().await.remove(server_name);
    }

    /// Look up one tool by server and tool name.
    pub async fn get_tool(&self, server_name: &str, tool_name: &str) -> Option<ToolDefinition> {
        self.tools
            .read()
            .await
            .get(server_name)?
            .tools
            .iter()
            .find(|t| t.name == tool_name)
            .cloned()
    }

    /// All tools for one server.
    pub async fn server_tools(&self, server_name: &str) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .await
            .get(server_name)
            .map(|s| s.tools.clone())
            .unwrap_or_default()
    }

    /// Every registered tool, ordered by server name then tool name.
    pub async fn all_tools(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read().await;
        let mut servers: Vec<&String> = tools.keys().collect();
        servers.sort();

        let mut all = Vec::new();
        for server in servers {
            let mut entries = tools[server].tools.clone();
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            all.extend(entries);
        }
        all
    }

    /// When a server's catalog was last refreshed.
    pub async fn last_updated(&self, server_name: &str) -> Option<DateTime<Utc>> {
        self.tools
            .read()
            .await
            .get(server_name)
            .map(|s| s.last_updated)
    }

    /// Total number of registered tools.
    pub async fn tool_count(&self) -> usize {
        self.tools.read().await.values().map(|s| s.tools.len()).sum()
    }
}

/// Run `tools/list` discovery against a live connection, following
/// pagination cursors until the catalog is complete.
pub async fn discover_tools(
    connection: &ServerConnection,
    server_name: &str,
    timeout: Duration,
) -> Result<Vec<ToolDefinition>, McpError> {
    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let params = cursor
            .take()
            .map(|c| serde_json::json!({ "cursor": c }));
        let result = connection.send("tools/list", params, timeout).await?;

        let (page, next) = parse_tool_list(server_name, &result)?;
        tools.extend(page);

        match next {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    tracing::debug!(server_name, count = tools.len(), "discovered tools");
    Ok(tools)
}

/// Parse one `tools/list` result page into definitions plus the pagination
/// cursor, if any.
fn parse_tool_list(
    server_name: &str,
    result: &Value,
) -> Result<(Vec<ToolDefinition>, Option<String>), McpError> {
    let entries = result
        .get("tools")
        .and_then(Value::as_array)
        .ok_or_else(|| McpError::Protocol("tools/list result missing 'tools' array".to_string()))?;

    let mut tools = Vec::with_capacity(entries.len());
    for entry in entries {
        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| McpError::Protocol("tool entry missing 'name'".to_string()))?;

        let mut tool = ToolDefinition::new(name, server_name);
        if let Some(desc) = entry.get("description").and_then(Value::as_str) {
            tool = tool.with_description(desc);
        }
        if let Some(schema) = entry.get("inputSchema") {
            tool = tool.with_input_schema(schema.clone());
        }
        if let Some(schema) = entry.get("outputSchema") {
            tool = tool.with_output_schema(schema.clone());
        }
        tools.push(tool);
    }

    let next_cursor = result
        .get("nextCursor")
        .and_then(Value::as_str)
        .map(String::from);

    Ok((tools, next_cursor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str, server: &str) -> ToolDefinition {
        ToolDefinition::new(name, server)
    }

    #[tokio::test]
    async fn test_refresh_replaces_wholesale() {
        let registry = ToolRegistry::new();
        registry
            .replace_server_tools("fs", vec![tool("read", "fs"), tool("write", "fs")])
            .await;
        assert_eq!(registry.tool_count().await, 2);

        // A refresh that dropped "write" must not leave it behind
        registry
            .replace_server_tools("fs", vec![tool("read", "fs")])
            .await;
        assert_eq!(registry.tool_count().await, 1);
        assert!(registry.get_tool("fs", "write").await.is_none());
        assert!(registry.get_tool("fs", "read").await.is_some());
        assert!(registry.last_updated("fs").await.is_some());
        assert!(registry.last_updated("web").await.is_none());
    }

    #[tokio::test]
    async fn test_clear_server_leaves_others_untouched() {
        let registry = ToolRegistry::new();
        registry
            .replace_server_tools("fs", vec![tool("read", "fs")])
            .await;
        registry
            .replace_server_tools("web", vec![tool("fetch", "web")])
            .await;

        registry.clear_server("fs").await;
        assert!(registry.get_tool("fs", "read").await.is_none());
        assert!(registry.get_tool("web", "fetch").await.is_some());
    }

    #[tokio::test]
    async fn test_all_tools_ordered() {
        let registry = ToolRegistry::new();
        registry
            .replace_server_tools("web", vec![tool("fetch", "web")])
            .await;
        registry
            .replace_server_tools("fs", vec![tool("write", "fs"), tool("read", "fs")])
            .await;

        let names: Vec<String> = registry
            .all_tools()
            .await
            .into_iter()
            .map(|t| format!("{}/{}", t.server_name, t.name))
            .collect();
        assert_eq!(names, vec!["fs/read", "fs/write", "web/fetch"]);
    }

    #[test]
    fn test_parse_tool_list_page() {
        let result = json!({
            "tools": [
                {
                    "name": "echo",
                    "description": "Echo the input back",
                    "inputSchema": {
                        "type": "object",
                        "properties": { "text": { "type": "string" } },
                        "required": ["text"]
                    }
                },
                { "name": "bare" }
            ],
            "nextCursor": "page-2"
        });

        let (tools, cursor) = parse_tool_list("test", &result).unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "echo");
        assert_eq!(tools[0].server_name, "test");
        assert!(tools[0].input_schema.is_some());
        assert!(tools[1].description.is_none());
        assert_eq!(cursor.as_deref(), Some("page-2"));
    }

    #[test]
    fn test_parse_tool_list_rejects_missing_array() {
        let err = parse_tool_list("test", &json!({})).unwrap_err();
        assert!(matches!(err, McpError::Protocol(_)));
    }
}
