//! Error types for mcp-relay.

pub mod kind;

pub use kind::ErrorKind;

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Primary error type for all relay operations.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("{0}")]
    ServerConfiguration(String),

    #[error("{message}")]
    Transport {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("HTTP request failed with status code: {0}")]
    HttpStatus(u16),

    #[error("Invalid JSON-RPC 2.0 response received")]
    InvalidProtocolResponse,

    #[error("No JSON-RPC message found in response")]
    NoMessageFound,

    #[error("Invalid request params: {0}")]
    InvalidParams(String),

    #[error("JSON-RPC error: {message} (code: {code}){}", details_suffix(.data.as_deref()))]
    Remote {
        code: i64,
        message: String,
        data: Option<String>,
    },

    #[error("Timeout waiting for MCP response after {seconds} seconds. Last received data: {preview}")]
    Timeout { seconds: u64, preview: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to fetch tools from MCP server '{server}': {source}")]
    ToolDefinition {
        server: String,
        #[source]
        source: Box<RelayError>,
    },

    #[error("{source}")]
    ToolCall {
        tool: String,
        #[source]
        source: Box<RelayError>,
    },
}

impl RelayError {
    /// Create a transport error without an underlying cause.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport error that keeps the originating error as its source.
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Classify this error into its family.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ServerConfiguration(_) => ErrorKind::ServerConfiguration,
            Self::ToolDefinition { .. } => ErrorKind::ToolDefinition,
            Self::ToolCall { .. } => ErrorKind::ToolCall,
            _ => ErrorKind::Transport,
        }
    }

    /// The JSON-RPC error code, if the server answered with an error object.
    ///
    /// Looks through the client-layer wrappers.
    pub fn remote_code(&self) -> Option<i64> {
        match self {
            Self::Remote { code, .. } => Some(*code),
            Self::ToolDefinition { source, .. } | Self::ToolCall { source, .. } => {
                source.remote_code()
            }
            _ => None,
        }
    }

    /// Whether the exchange was abandoned because the response deadline passed.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::ToolDefinition { source, .. } | Self::ToolCall { source, .. } => {
                source.is_timeout()
            }
            _ => false,
        }
    }
}

/// Render the optional ` Details: ...` tail of a remote error message.
///
/// Serialized data that is empty, `0` or `false` carries no information and is
/// left out.
fn details_suffix(data: Option<&str>) -> String {
    match data {
        Some(data) if !matches!(data, "" | "0" | "false") => format!(" Details: {data}"),
        _ => String::new(),
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, RelayError>;
