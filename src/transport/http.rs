//! Streamable HTTP transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};
use tracing::debug;

use super::Transport;
use crate::config::ServerConfig;
use crate::error::{RelayError, Result};
use crate::jsonrpc::{self, RequestEnvelope, RequestIdSequence};
use crate::reassembly::{self, Framing};

/// MCP protocol revision announced during `initialize`.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Header carrying the server-issued session token.
pub const SESSION_HEADER: &str = "mcp-session-id";

const ACCEPT_VALUE: &str = "application/json, text/event-stream";
const CLIENT_NAME: &str = "mcp-relay";

/// Handshake progress of an [`HttpTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpState {
    Unstarted,
    Initializing,
    Ready,
}

/// MCP over Streamable HTTP.
///
/// Each exchange is one POST; the response body is either a single JSON
/// document or an SSE stream, picked by `Content-Type`.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    static_headers: HeaderMap,
    timeout: Duration,
    state: HttpState,
    session_id: Option<String>,
    ids: RequestIdSequence,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("url", &self.url)
            .field("state", &self.state)
            .field("session_id", &self.session_id)
            .field("last_request_id", &self.ids.current())
            .finish()
    }
}

impl HttpTransport {
    /// Validate `config` and build the transport. No network activity happens here.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                RelayError::ServerConfiguration(
                    "The \"url\" configuration is required for http transport".into(),
                )
            })?
            .to_string();

        let static_headers = build_static_headers(&config)?;
        let timeout = config.timeout();

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                RelayError::ServerConfiguration(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            url,
            static_headers,
            timeout,
            state: HttpState::Unstarted,
            session_id: None,
            ids: RequestIdSequence::new(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> HttpState {
        self.state
    }

    /// Session token captured from the `initialize` response, if the server sent one.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// The id used by the most recent request, `0` before the first one.
    pub fn last_request_id(&self) -> u64 {
        self.ids.current()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn initialize(&mut self) -> Result<()> {
        let id = self.ids.next();
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": CLIENT_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        let envelope =
            RequestEnvelope::request(id.clone(), "initialize", jsonrpc::normalize_params(params)?);

        let response = self.post(&envelope).await?;

        // Absence is tolerated: the server may simply not use sessions.
        self.session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let result = self.read_response(response, &id).await?;
        debug!(
            url = %self.url,
            session_id = ?self.session_id,
            server_info = ?result.get("serverInfo"),
            "MCP initialize completed"
        );

        let notification = RequestEnvelope::notification("notifications/initialized");
        let response = self.post(&notification).await?;
        check_status(&response)?;
        Ok(())
    }

    async fn post(&self, envelope: &RequestEnvelope) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .post(&self.url)
            .header(ACCEPT, ACCEPT_VALUE)
            .header(CONTENT_TYPE, "application/json")
            .headers(self.static_headers.clone());

        if let Some(session_id) = &self.session_id {
            request = request.header(SESSION_HEADER, session_id);
        }

        debug!(
            url = %self.url,
            method = %envelope.method,
            id = ?envelope.id,
            "sending MCP request"
        );

        request
            .body(envelope.encode()?)
            .send()
            .await
            .map_err(|e| self.request_error("Failed to send request to MCP server", e))
    }

    async fn read_response(&self, response: reqwest::Response, id: &str) -> Result<Value> {
        check_status(&response)?;

        let framing = Framing::from_content_type(
            response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok()),
        );

        let body = response
            .text()
            .await
            .map_err(|e| self.request_error("Failed to read response from MCP server", e))?;

        reassembly::decode_http_body(framing, &body, id)
    }

    /// Deadline overruns become [`RelayError::Timeout`]; anything else is a
    /// transport failure prefixed with `context`.
    fn request_error(&self, context: &str, e: reqwest::Error) -> RelayError {
        if e.is_timeout() {
            RelayError::Timeout {
                seconds: self.timeout.as_secs(),
                preview: String::new(),
            }
        } else {
            RelayError::transport_with_source(format!("{context}: {e}"), e)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    /// Run the `initialize` handshake once.
    ///
    /// On failure the transport returns to [`HttpState::Unstarted`] so `start`
    /// can be retried. Transport errors and timeouts are returned unwrapped.
    async fn start(&mut self) -> Result<()> {
        if self.state == HttpState::Ready {
            return Ok(());
        }

        self.state = HttpState::Initializing;
        match self.initialize().await {
            Ok(()) => {
                self.state = HttpState::Ready;
                Ok(())
            }
            Err(e) => {
                self.state = HttpState::Unstarted;
                self.session_id = None;
                Err(match e {
                    e @ (RelayError::Transport { .. } | RelayError::Timeout { .. }) => e,
                    e => RelayError::transport_with_source(
                        format!("Failed to initialize MCP session: {e}"),
                        e,
                    ),
                })
            }
        }
    }

    async fn send_request(&mut self, method: &str, params: Value) -> Result<Value> {
        self.start().await?;

        let params = jsonrpc::normalize_params(params)?;
        let id = self.ids.next();
        let envelope = RequestEnvelope::request(id.clone(), method, params);

        let response = self.post(&envelope).await?;
        self.read_response(response, &id).await
    }

    /// Nothing to release: every exchange is a standalone POST.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

fn check_status(response: &reqwest::Response) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(RelayError::HttpStatus(status.as_u16()))
    }
}

/// Authorization plus the configured static headers.
fn build_static_headers(config: &ServerConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();

    if let Some(api_key) = config.api_key.as_deref().filter(|key| !key.is_empty()) {
        let value = HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|_| {
            RelayError::ServerConfiguration("The \"api_key\" is not a valid header value".into())
        })?;
        headers.insert(AUTHORIZATION, value);
    }

    for (name, value) in &config.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
            RelayError::ServerConfiguration(format!("Invalid header name: '{name}'"))
        })?;
        let header_value = HeaderValue::from_str(value).map_err(|_| {
            RelayError::ServerConfiguration(format!("Invalid value for header '{name}'"))
        })?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}
