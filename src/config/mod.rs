//! Configuration system (file > env overrides > explicit values).
//!
//! This is the only layer that reads ambient state. Transports are always
//! handed an explicit [`ServerConfig`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{RelayError, Result};

/// Default per-exchange timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default tool-definition cache duration in minutes.
pub const DEFAULT_CACHE_DURATION_MINUTES: u64 = 60;

const CACHE_DURATION_ENV: &str = "RELAY_TOOLS_CACHE_DURATION";

/// How a server is reached.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TransportKind {
    /// Streamable HTTP (plain JSON or SSE responses).
    #[default]
    Http,
    /// Child process speaking newline-delimited JSON over stdio.
    Stdio,
}

impl TransportKind {
    /// Parse a transport name, rejecting unknown kinds as a configuration error.
    pub fn from_name(name: &str) -> Result<Self> {
        name.trim().parse().map_err(|_| {
            RelayError::ServerConfiguration(format!("Unknown transport type: '{name}'"))
        })
    }
}

/// How to reach one MCP server.
///
/// Kind-specific fields are optional here and validated by the transport that
/// consumes them, so one record type covers both kinds.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    #[builder(default)]
    pub transport: TransportKind,

    /// Endpoint for the HTTP transport.
    #[builder(into)]
    pub url: Option<String>,

    /// Bearer token for the HTTP transport. Ignored when empty.
    #[builder(into)]
    pub api_key: Option<String>,

    /// Static headers sent with every HTTP request.
    #[serde(default)]
    #[builder(default)]
    pub headers: BTreeMap<String, String>,

    /// Argument vector for the stdio transport. Elements may be nested JSON
    /// values; those are JSON-encoded into the command line.
    pub command: Option<Vec<serde_json::Value>>,

    /// Extra environment for the stdio child process.
    pub env: Option<BTreeMap<String, String>>,

    /// Bound on each exchange, in seconds.
    #[serde(default = "default_timeout_secs", rename = "timeout")]
    #[builder(default = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,
}

impl ServerConfig {
    /// An HTTP server config with defaults for everything but the URL.
    pub fn http(url: impl Into<String>) -> Self {
        Self::builder()
            .transport(TransportKind::Http)
            .url(url)
            .build()
    }

    /// A stdio server config from an argument vector and environment.
    pub fn stdio<I, S>(command: I, env: BTreeMap<String, String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<serde_json::Value>,
    {
        Self::builder()
            .transport(TransportKind::Stdio)
            .command(command.into_iter().map(Into::into).collect())
            .env(env)
            .build()
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_cache_duration() -> u64 {
    DEFAULT_CACHE_DURATION_MINUTES
}

/// All configured servers plus settings owned by the caching layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,

    /// Tool-definition cache duration in minutes. `0` disables caching.
    #[serde(default = "default_cache_duration")]
    pub cache_duration: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            servers: BTreeMap::new(),
            cache_duration: DEFAULT_CACHE_DURATION_MINUTES,
        }
    }
}

impl RelayConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| {
            RelayError::ServerConfiguration(format!("Invalid relay configuration: {e}"))
        })
    }

    /// Read and parse a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RelayError::ServerConfiguration(format!(
                "Failed to read relay configuration {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Load configuration the way the binary does.
    ///
    /// Resolution order:
    /// 1. `.env` in the working directory (if present) is loaded into the env
    /// 2. The explicit `path`, or `~/.mcp-relay/relay.toml` when none is given
    /// 3. `RELAY_*` environment overrides
    ///
    /// A missing default file is an empty configuration; a missing explicit
    /// file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error

        let mut config = match path {
            Some(path) => Self::from_path(path)?,
            None => {
                let default = default_config_path();
                if default.exists() {
                    Self::from_path(&default)?
                } else {
                    tracing::debug!(path = %default.display(), "no relay configuration file");
                    Self::default()
                }
            }
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply `RELAY_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_env_overrides_from(std::env::vars())
    }

    /// Apply `RELAY_*` overrides from an explicit set of variables.
    ///
    /// - `RELAY_TOOLS_CACHE_DURATION` sets `cache_duration`
    /// - `RELAY_<SERVER>_SERVER_TIMEOUT` sets that server's timeout
    pub fn apply_env_overrides_from<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let vars: BTreeMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
            .collect();

        if let Some(raw) = vars.get(CACHE_DURATION_ENV) {
            self.cache_duration = parse_env_number(CACHE_DURATION_ENV, raw)?;
        }

        for (name, server) in self.servers.iter_mut() {
            let key = server_timeout_env_key(name);
            if let Some(raw) = vars.get(&key) {
                server.timeout_secs = parse_env_number(&key, raw)?;
            }
        }

        Ok(())
    }

    /// Look up one server by name.
    pub fn server(&self, name: &str) -> Result<&ServerConfig> {
        self.servers.get(name).ok_or_else(|| {
            RelayError::ServerConfiguration(format!("MCP server '{name}' is not configured."))
        })
    }
}

/// `RELAY_<SERVER>_SERVER_TIMEOUT`, with the name upper-cased and separators
/// replaced by `_`.
pub fn server_timeout_env_key(server_name: &str) -> String {
    let normalized: String = server_name
        .trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' | '.' => '_',
            other => other.to_ascii_uppercase(),
        })
        .collect();
    format!("RELAY_{normalized}_SERVER_TIMEOUT")
}

fn parse_env_number(key: &str, raw: &str) -> Result<u64> {
    raw.trim().parse().map_err(|_| {
        RelayError::ServerConfiguration(format!(
            "Environment variable {key} must be a non-negative integer, got '{raw}'"
        ))
    })
}

fn default_config_path() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".mcp-relay"))
        .unwrap_or_else(|| PathBuf::from(".mcp-relay"))
        .join("relay.toml")
}
