//! mcp-relay: client-side Model Context Protocol transports.
//!
//! Talks JSON-RPC 2.0 to MCP servers over two channels: Streamable HTTP
//! (plain JSON or Server-Sent Events bodies) and a child process's stdio.
//! Both sit behind the [`transport::Transport`] trait; [`relay::Relay`] adds
//! `tools/list` and `tools/call` on top.
//!
//! # Quick Start
//!
//! ```no_run
//! use mcp_relay::prelude::*;
//!
//! # async fn example() -> mcp_relay::error::Result<()> {
//! let config = RelayConfig::load(None)?;
//! let mut relay = Relay::new("puppeteer", &config)?;
//! for tool in relay.list_tools().await? {
//!     println!("{}: {}", relay.qualified_tool_name(&tool.name), tool.description);
//! }
//! relay.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod jsonrpc;
pub mod prelude;
pub mod reassembly;
pub mod relay;
pub mod transport;

#[cfg(feature = "cli")]
pub mod cli;
