//! mcp-relay CLI binary entry point.

use clap::Parser;
use mcp_relay::cli::{CallArgs, Cli, Commands, ToolsArgs};
use mcp_relay::config::RelayConfig;
use mcp_relay::relay::Relay;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mcp_relay=info,warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match RelayConfig::load(cli.config.as_deref()) {
        Ok(config) => match cli.command {
            Commands::Tools(args) => handle_tools(&config, args).await,
            Commands::Call(args) => handle_call(&config, args).await,
        },
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn handle_tools(config: &RelayConfig, args: ToolsArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut relay = Relay::new(args.server, config)?;
    let tools = relay.list_tools().await;
    relay.close().await?;

    println!("{}", serde_json::to_string_pretty(&tools?)?);
    Ok(())
}

async fn handle_call(config: &RelayConfig, args: CallArgs) -> Result<(), Box<dyn std::error::Error>> {
    let arguments = match args.args {
        Some(raw) => Value::String(raw),
        None => Value::Null,
    };

    let mut relay = Relay::new(args.server, config)?;
    let result = relay.call_tool(&args.tool, arguments).await;
    relay.close().await?;

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}
