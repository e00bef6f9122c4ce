//! Thin MCP client over one configured server.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::{RelayConfig, ServerConfig};
use crate::error::{RelayError, Result};
use crate::jsonrpc::JsonObject;
use crate::transport::{ServerTransport, Transport};

/// Prefix of qualified tool names.
pub const TOOL_NAME_PREFIX: &str = "relay";
const TOOL_NAME_SEPARATOR: &str = "__";

/// A tool advertised by an MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema", default = "empty_schema")]
    pub input_schema: Value,
}

fn empty_schema() -> Value {
    Value::Object(JsonObject::new())
}

/// Client for the tools of one named MCP server.
#[derive(Debug)]
pub struct Relay {
    server_name: String,
    transport: ServerTransport,
}

impl Relay {
    /// Resolve `server_name` in `config` and build its transport.
    pub fn new(server_name: impl Into<String>, config: &RelayConfig) -> Result<Self> {
        let server_name = server_name.into();
        let server = config.server(&server_name)?.clone();
        Self::with_server_config(server_name, server)
    }

    /// Build a relay from an explicit server configuration.
    pub fn with_server_config(server_name: impl Into<String>, config: ServerConfig) -> Result<Self> {
        Ok(Self {
            server_name: server_name.into(),
            transport: ServerTransport::from_config(config)?,
        })
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn transport(&self) -> &ServerTransport {
        &self.transport
    }

    /// Key under which tool definitions for this server are cached.
    pub fn cache_key(&self) -> String {
        format!("relay-tools-definitions-{}", self.server_name)
    }

    /// The `relay__<server>__<tool>` name for a tool on this server.
    pub fn qualified_tool_name(&self, tool: &str) -> String {
        qualified_tool_name(&self.server_name, tool)
    }

    /// Fetch the server's tool definitions.
    pub async fn list_tools(&mut self) -> Result<Vec<ToolDefinition>> {
        self.fetch_tools()
            .await
            .map_err(|source| RelayError::ToolDefinition {
                server: self.server_name.clone(),
                source: Box::new(source),
            })
    }

    async fn fetch_tools(&mut self) -> Result<Vec<ToolDefinition>> {
        self.transport.start().await?;
        let result = self
            .transport
            .send_request("tools/list", Value::Object(JsonObject::new()))
            .await?;

        let tools = parse_tool_definitions(result);
        debug!(server = %self.server_name, count = tools.len(), "fetched MCP tool definitions");
        Ok(tools)
    }

    /// Call a tool by bare or qualified name and return the raw `result`.
    ///
    /// `arguments` may be `null`, an object, or a JSON string holding an object.
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<Value> {
        let tool = base_tool_name(name).to_string();
        self.execute_tool(&tool, arguments)
            .await
            .map_err(|source| RelayError::ToolCall {
                tool,
                source: Box::new(source),
            })
    }

    async fn execute_tool(&mut self, tool: &str, arguments: Value) -> Result<Value> {
        let arguments = coerce_tool_arguments(arguments)?;
        debug!(server = %self.server_name, tool, "calling MCP tool");
        self.transport
            .send_request("tools/call", json!({ "name": tool, "arguments": arguments }))
            .await
    }

    pub async fn close(&mut self) -> Result<()> {
        self.transport.close().await
    }
}

/// `relay__<server>__<tool>`.
pub fn qualified_tool_name(server: &str, tool: &str) -> String {
    format!("{TOOL_NAME_PREFIX}{TOOL_NAME_SEPARATOR}{server}{TOOL_NAME_SEPARATOR}{tool}")
}

/// Strip the `relay__<server>__` qualifier, if present.
///
/// Names without the prefix, or with fewer than three segments, are returned
/// unchanged.
pub fn base_tool_name(name: &str) -> &str {
    let qualified = name
        .strip_prefix(TOOL_NAME_PREFIX)
        .and_then(|rest| rest.strip_prefix(TOOL_NAME_SEPARATOR));

    match qualified.and_then(|rest| rest.rsplit_once(TOOL_NAME_SEPARATOR)) {
        Some((_, tool)) => tool,
        None => name,
    }
}

/// Pull tool definitions out of a `tools/list` result.
///
/// The `tools` array is used when present; otherwise the values of the result
/// object are taken as definitions. Entries without a string `name` and
/// `description` are skipped.
pub fn parse_tool_definitions(result: Value) -> Vec<ToolDefinition> {
    let entries = match result {
        Value::Object(mut map) => match map.remove("tools") {
            Some(Value::Array(tools)) => tools,
            Some(_) => Vec::new(),
            None => map.into_iter().map(|(_, value)| value).collect(),
        },
        Value::Array(tools) => tools,
        _ => Vec::new(),
    };

    entries
        .into_iter()
        .filter_map(|entry| {
            let name = entry.get("name")?.as_str()?.to_string();
            let description = entry.get("description")?.as_str()?.to_string();
            let input_schema = entry
                .get("inputSchema")
                .filter(|schema| schema.is_object())
                .cloned()
                .unwrap_or_else(empty_schema);
            Some(ToolDefinition {
                name,
                description,
                input_schema,
            })
        })
        .collect()
}

fn coerce_tool_arguments(value: Value) -> Result<JsonObject> {
    match value {
        Value::Null => Ok(JsonObject::new()),
        Value::Object(map) => Ok(map),
        Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(JsonObject::new());
            }
            let parsed: Value = serde_json::from_str(trimmed).map_err(|e| {
                RelayError::InvalidParams(format!("tool arguments must be valid JSON: {e}"))
            })?;
            coerce_tool_arguments(parsed)
        }
        other => Err(RelayError::InvalidParams(format!(
            "tool arguments must be a JSON object; got {other}"
        ))),
    }
}
