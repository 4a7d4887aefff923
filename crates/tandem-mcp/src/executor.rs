//! Tool executor: validated, observable, retry-aware tool invocation.
//!
//! Every call runs the same pipeline: resolve the tool, check the server is
//! running, validate arguments against the tool's schema, then dispatch
//! `tools/call` under the retry policy. Every terminal outcome lands in the
//! append-only history and is emitted as an event; no failure path is
//! swallowed silently.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use tandem_core::{
    EventSink, ExecutionResult, ExecutionStats, McpError, McpEvent, ServerStatus, ToolInvocation,
};
use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

use crate::manager::ServerManager;
use crate::registry::ToolRegistry;
use crate::retry::RetryPolicy;
use crate::schema;

/// Tunables for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Per-request deadline when the caller does not supply one.
    pub default_timeout: Duration,
    /// Retry policy applied to transient dispatch failures.
    pub policy: RetryPolicy,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            policy: RetryPolicy::default(),
        }
    }
}

/// Executes tools against running servers.
pub struct ToolExecutor {
    manager: ServerManager,
    registry: Arc<ToolRegistry>,
    sink: Box<dyn EventSink>,
    options: ExecutorOptions,
    history: RwLock<Vec<ExecutionResult>>,
}

impl ToolExecutor {
    /// Create an executor with default options.
    pub fn new(manager: ServerManager, sink: Box<dyn EventSink>) -> Self {
        Self::with_options(manager, sink, ExecutorOptions::default())
    }

    /// Create an executor with explicit options.
    pub fn with_options(
        manager: ServerManager,
        sink: Box<dyn EventSink>,
        options: ExecutorOptions,
    ) -> Self {
        let registry = manager.registry();
        Self {
            manager,
            registry,
            sink,
            options,
            history: RwLock::new(Vec::new()),
        }
    }

    /// Execute a tool end to end.
    ///
    /// The outcome is recorded in the history and emitted as a
    /// `ToolCompleted` or `ToolFailed` event in every case, including
    /// failures before any dispatch (unknown tool, invalid arguments,
    /// server not running).
    pub async fn execute_tool(
        &self,
        server_name: &str,
        tool_name: &str,
        arguments: Value,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult, McpError> {
        let invocation = ToolInvocation {
            id: Uuid::new_v4(),
            server_name: server_name.to_string(),
            tool_name: tool_name.to_string(),
            arguments,
            timeout: timeout.unwrap_or(self.options.default_timeout),
            retry_count: 0,
        };
        let started_at = Utc::now();
        let clock = Instant::now();

        match self.run_pipeline(invocation.clone()).await {
            Ok(value) => {
                let result = ExecutionResult::success(
                    invocation.id,
                    &invocation.tool_name,
                    &invocation.server_name,
                    value.clone(),
                    started_at,
                    Utc::now(),
                    clock.elapsed(),
                );
                self.sink.emit(McpEvent::tool_completed(
                    &invocation.tool_name,
                    &invocation.server_name,
                    invocation.id,
                    value,
                    result.duration_ms,
                ));
                self.history.write().await.push(result.clone());
                tracing::debug!(
                    tool_name = %invocation.tool_name,
                    server_name = %invocation.server_name,
                    duration_ms = result.duration_ms,
                    "tool call completed"
                );
                Ok(result)
            }
            Err(e) => {
                let message = e.to_string();
                let result = ExecutionResult::failure(
                    invocation.id,
                    &invocation.tool_name,
                    &invocation.server_name,
                    &message,
                    started_at,
                    Utc::now(),
                    clock.elapsed(),
                );
                self.sink.emit(McpEvent::tool_failed(
                    &invocation.tool_name,
                    &invocation.server_name,
                    invocation.id,
                    &message,
                    result.duration_ms,
                ));
                self.history.write().await.push(result);
                tracing::debug!(
                    tool_name = %invocation.tool_name,
                    server_name = %invocation.server_name,
                    error = %message,
                    "tool call failed"
                );
                Err(e)
            }
        }
    }

    async fn run_pipeline(&self, mut invocation: ToolInvocation) -> Result<Value, McpError> {
        let tool = self
            .registry
            .get_tool(&invocation.server_name, &invocation.tool_name)
            .await
            .ok_or_else(|| McpError::ToolNotFound {
                server: invocation.server_name.clone(),
                tool: invocation.tool_name.clone(),
            })?;

        let record = self.manager.get_server(&invocation.server_name).await?;
        if record.status != ServerStatus::Running {
            return Err(McpError::ServerNotRunning(invocation.server_name.clone()));
        }

        // Caller errors stop here: invalid arguments are never dispatched
        // and never retried
        schema::validate_arguments(tool.input_schema.as_ref(), &invocation.arguments)
            .map_err(McpError::InvalidArguments)?;

        self.sink.emit(McpEvent::tool_invoked(
            &invocation.tool_name,
            &invocation.server_name,
            invocation.id,
            invocation.arguments.clone(),
        ));

        let policy = &self.options.policy;
        let max_attempts = policy.max_attempts.max(1);

        loop {
            match self.dispatch(&invocation).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let attempt = invocation.retry_count;
                    if attempt + 1 >= max_attempts
                        || !e.is_retryable(policy.retry_failed_executions)
                    {
                        return Err(e);
                    }

                    let delay = policy.backoff.delay_for(attempt);
                    tracing::debug!(
                        tool_name = %invocation.tool_name,
                        server_name = %invocation.server_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying tool call"
                    );
                    tokio::time::sleep(delay).await;
                    invocation.retry_count += 1;
                }
            }
        }
    }

    async fn dispatch(&self, invocation: &ToolInvocation) -> Result<Value, McpError> {
        // Resolved per attempt: a server restarted between attempts gets a
        // fresh connection instead of the dead one
        let connection = self.manager.connection(&invocation.server_name).await?;

        let params = json!({
            "name": invocation.tool_name,
            "arguments": invocation.arguments,
        });
        let value = connection
            .send("tools/call", Some(params), invocation.timeout)
            .await?;

        parse_call_result(value)
    }

    /// Validate arguments without executing anything.
    pub async fn validate_tool_arguments(
        &self,
        server_name: &str,
        tool_name: &str,
        arguments: &Value,
    ) -> Result<(), McpError> {
        let tool = self
            .registry
            .get_tool(server_name, tool_name)
            .await
            .ok_or_else(|| McpError::ToolNotFound {
                server: server_name.to_string(),
                tool: tool_name.to_string(),
            })?;

        schema::validate_arguments(tool.input_schema.as_ref(), arguments)
            .map_err(McpError::InvalidArguments)
    }

    /// Snapshot of the append-only execution history.
    pub async fn history(&self) -> Vec<ExecutionResult> {
        self.history.read().await.clone()
    }

    /// Aggregate statistics over the execution history.
    pub async fn stats(&self) -> ExecutionStats {
        ExecutionStats::from_history(&self.history.read().await)
    }
}

/// Unwrap the MCP `tools/call` result envelope.
///
/// A result carrying a `content` array is the standard envelope: `isError`
/// turns it into an execution failure with the first text item as the
/// message, otherwise the content is returned. Results without the envelope
/// are passed through untouched.
fn parse_call_result(value: Value) -> Result<Value, McpError> {
    let Some(object) = value.as_object() else {
        return Ok(value);
    };

    let Some(content) = object.get("content") else {
        return Ok(value);
    };

    let is_error = object
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if is_error {
        let message = first_text(content)
            .unwrap_or_else(|| "Tool reported an error without a message".to_string());
        return Err(McpError::ExecutionFailure { code: 0, message });
    }

    Ok(content.clone())
}

fn first_text(content: &Value) -> Option<String> {
    content
        .as_array()?
        .iter()
        .find(|item| item.get("type").and_then(Value::as_str) == Some("text"))
        .and_then(|item| item.get("text"))
        .and_then(Value::as_str)
        .map(String::from)
}
