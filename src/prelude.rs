//! Convenience re-exports for common use.

pub use crate::config::{RelayConfig, ServerConfig, TransportKind};
pub use crate::error::{ErrorKind, RelayError, Result};
pub use crate::relay::{Relay, ToolDefinition};
pub use crate::transport::{HttpTransport, ServerTransport, StdioTransport, Transport};
