//! Coarse error classification.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The family a [`RelayError`](super::RelayError) belongs to.
///
/// Callers that only care whether a failure came from bad configuration or
/// from a broken exchange can branch on this instead of on every variant.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or malformed server configuration. Raised at construction.
    ServerConfiguration,
    /// Any failure to complete one exchange with a server.
    Transport,
    /// Fetching tool definitions through a [`Relay`](crate::relay::Relay) failed.
    ToolDefinition,
    /// Calling a tool through a [`Relay`](crate::relay::Relay) failed.
    ToolCall,
}

impl ErrorKind {
    /// Configuration failures are fatal; everything else may succeed on a later attempt.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::ServerConfiguration)
    }
}
