//! MCP transport layer.

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{ServerConfig, TransportKind};
use crate::error::Result;

pub mod http;
pub mod stdio;

pub use http::{HttpState, HttpTransport};
pub use stdio::StdioTransport;

/// Operations every MCP transport offers.
///
/// A transport owns its request-id counter and response buffer, so one
/// instance must not be driven by concurrent callers; every method takes
/// `&mut self`.
#[async_trait]
pub trait Transport: Send {
    /// Establish the session or process. Idempotent.
    async fn start(&mut self) -> Result<()>;

    /// Send one request and return its decoded `result`.
    ///
    /// `params` may be `null`, `[]` or an object; the first two are sent as `{}`.
    async fn send_request(&mut self, method: &str, params: Value) -> Result<Value>;

    /// Release the session or process.
    async fn close(&mut self) -> Result<()>;
}

/// One of the two concrete transports, chosen from configuration.
pub enum ServerTransport {
    Http(HttpTransport),
    Stdio(StdioTransport),
}

impl std::fmt::Debug for ServerTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ServerTransport").field(&self.kind()).finish()
    }
}

impl ServerTransport {
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Http(_) => TransportKind::Http,
            Self::Stdio(_) => TransportKind::Stdio,
        }
    }

    /// Build the transport named by `config.transport`.
    pub fn from_config(config: ServerConfig) -> Result<Self> {
        create(config.transport, config)
    }
}

#[async_trait]
impl Transport for ServerTransport {
    async fn start(&mut self) -> Result<()> {
        match self {
            Self::Http(transport) => transport.start().await,
            Self::Stdio(transport) => transport.start().await,
        }
    }

    async fn send_request(&mut self, method: &str, params: Value) -> Result<Value> {
        match self {
            Self::Http(transport) => transport.send_request(method, params).await,
            Self::Stdio(transport) => transport.send_request(method, params).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            Self::Http(transport) => transport.close().await,
            Self::Stdio(transport) => transport.close().await,
        }
    }
}

/// Construct the transport for `kind`.
///
/// Construction-time validation errors propagate unchanged.
pub fn create(kind: TransportKind, config: ServerConfig) -> Result<ServerTransport> {
    match kind {
        TransportKind::Http => HttpTransport::new(config).map(ServerTransport::Http),
        TransportKind::Stdio => StdioTransport::new(config).map(ServerTransport::Stdio),
    }
}
