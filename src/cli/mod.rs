//! Command-line arguments for the `mcp-relay` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// MCP relay CLI
#[derive(Parser, Debug)]
#[command(name = "mcp-relay", version, about = "Talk to MCP servers over HTTP or stdio")]
pub struct Cli {
    /// Relay configuration file (defaults to ~/.mcp-relay/relay.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the tools a server exposes
    Tools(ToolsArgs),
    /// Call one tool on a server
    Call(CallArgs),
}

/// Arguments for `mcp-relay tools`.
#[derive(Parser, Debug)]
pub struct ToolsArgs {
    /// Configured server name
    pub server: String,
}

/// Arguments for `mcp-relay call`.
#[derive(Parser, Debug)]
pub struct CallArgs {
    /// Configured server name
    pub server: String,

    /// Tool name, bare or `relay__<server>__<tool>`
    pub tool: String,

    /// Tool arguments as a JSON object
    #[arg(short, long)]
    pub args: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_call_with_global_config() {
        let cli = Cli::parse_from([
            "mcp-relay",
            "call",
            "puppeteer",
            "navigate",
            "--args",
            r#"{"url":"https://example.com"}"#,
            "--config",
            "relay.toml",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("relay.toml")));
        let Commands::Call(args) = cli.command else {
            panic!("expected call command");
        };
        assert_eq!(args.server, "puppeteer");
        assert_eq!(args.tool, "navigate");
        assert!(args.args.is_some());
    }

    #[test]
    fn parses_tools() {
        let cli = Cli::parse_from(["mcp-relay", "tools", "fs"]);
        assert!(cli.config.is_none());
        assert!(matches!(cli.command, Commands::Tools(ToolsArgs { ref server }) if server == "fs"));
    }
}
