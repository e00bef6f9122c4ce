//! Streamable HTTP transport against wiremock servers.

use std::time::Duration;

use mcp_relay::config::ServerConfig;
use mcp_relay::error::RelayError;
use mcp_relay::transport::{HttpState, HttpTransport, Transport};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const SESSION_ID: &str = "session-abc-123";

fn initialize_result(id: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "protocolVersion": "2025-03-26",
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": { "name": "mock", "version": "0.1.0" }
        }
    })
}

/// A well-behaved MCP server: handshake, then echo `params` back as `result`.
fn mock_mcp_handler(
    session_id: Option<&'static str>,
) -> impl Fn(&Request) -> ResponseTemplate + Send + Sync {
    move |request: &Request| {
        let body: Value = request.body_json().unwrap_or_else(|_| json!({}));
        let method = body["method"].as_str().unwrap_or_default();

        let Some(id) = body.get("id").cloned() else {
            return ResponseTemplate::new(202);
        };

        match method {
            "initialize" => {
                let template = ResponseTemplate::new(200).set_body_json(initialize_result(id));
                match session_id {
                    Some(session_id) => template.insert_header("mcp-session-id", session_id),
                    None => template,
                }
            }
            _ => ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "method": method, "params": body["params"] }
            })),
        }
    }
}

/// Handshake normally, answer everything else with `respond`.
fn handshake_then(
    respond: impl Fn(Value) -> ResponseTemplate + Send + Sync,
) -> impl Fn(&Request) -> ResponseTemplate + Send + Sync {
    move |request: &Request| {
        let body: Value = request.body_json().unwrap_or_else(|_| json!({}));
        match (body["method"].as_str(), body.get("id").cloned()) {
            (Some("initialize"), Some(id)) => {
                ResponseTemplate::new(200).set_body_json(initialize_result(id))
            }
            (_, None) => ResponseTemplate::new(202),
            (_, Some(id)) => respond(id),
        }
    }
}

async fn mount(server: &MockServer, handler: impl Fn(&Request) -> ResponseTemplate + Send + Sync + 'static) {
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(handler)
        .mount(server)
        .await;
}

fn transport_for(server: &MockServer) -> HttpTransport {
    HttpTransport::new(ServerConfig::http(format!("{}/mcp", server.uri())))
        .expect("valid http config")
}

async fn received_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|request| request.body_json().unwrap_or(Value::Null))
        .collect()
}

fn methods(bodies: &[Value]) -> Vec<String> {
    bodies
        .iter()
        .map(|body| body["method"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn start_performs_handshake_exactly_once() {
    let server = MockServer::start().await;
    mount(&server, mock_mcp_handler(Some(SESSION_ID))).await;

    let mut transport = transport_for(&server);
    transport.start().await.unwrap();
    transport.start().await.unwrap();

    assert_eq!(transport.state(), HttpState::Ready);
    assert_eq!(transport.session_id(), Some(SESSION_ID));

    let bodies = received_bodies(&server).await;
    assert_eq!(methods(&bodies), vec!["initialize", "notifications/initialized"]);
    assert_eq!(bodies[0]["id"], json!("1"));
    assert_eq!(bodies[0]["params"]["protocolVersion"], json!("2025-03-26"));
    assert_eq!(bodies[0]["params"]["clientInfo"]["name"], json!("mcp-relay"));
    assert!(bodies[1].get("id").is_none());
}

#[tokio::test]
async fn session_header_is_sent_after_initialize() {
    let server = MockServer::start().await;
    mount(&server, mock_mcp_handler(Some(SESSION_ID))).await;

    let mut transport = transport_for(&server);
    transport.send_request("tools/list", Value::Null).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let sessions: Vec<Option<String>> = requests
        .iter()
        .map(|request| {
            request
                .headers
                .get("mcp-session-id")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        })
        .collect();
    assert_eq!(
        sessions,
        vec![None, Some(SESSION_ID.to_string()), Some(SESSION_ID.to_string())]
    );

    for request in &requests {
        let accept = request.headers.get("accept").and_then(|v| v.to_str().ok());
        assert_eq!(accept, Some("application/json, text/event-stream"));
    }
}

#[tokio::test]
async fn first_request_initializes_without_session_header() {
    let server = MockServer::start().await;
    mount(&server, mock_mcp_handler(None)).await;

    let mut transport = transport_for(&server);
    let result = transport
        .send_request("tools/call", json!({"name": "navigate", "arguments": {"url": "https://example.com"}}))
        .await
        .unwrap();

    assert_eq!(
        result,
        json!({
            "method": "tools/call",
            "params": {"name": "navigate", "arguments": {"url": "https://example.com"}}
        })
    );
    assert_eq!(transport.session_id(), None);
    assert_eq!(
        methods(&received_bodies(&server).await),
        vec!["initialize", "notifications/initialized", "tools/call"]
    );
}

#[tokio::test]
async fn request_ids_increase_by_one() {
    let server = MockServer::start().await;
    mount(&server, mock_mcp_handler(Some(SESSION_ID))).await;

    let mut transport = transport_for(&server);
    transport.send_request("tools/list", json!([])).await.unwrap();
    transport.send_request("tools/list", json!({})).await.unwrap();

    assert_eq!(transport.last_request_id(), 3);
    let ids: Vec<Value> = received_bodies(&server)
        .await
        .into_iter()
        .filter(|body| body.get("id").is_some())
        .map(|body| body["id"].clone())
        .collect();
    assert_eq!(ids, vec![json!("1"), json!("2"), json!("3")]);
}

#[tokio::test]
async fn empty_params_are_sent_as_object() {
    let server = MockServer::start().await;
    mount(&server, mock_mcp_handler(None)).await;

    let mut transport = transport_for(&server);
    let result = transport.send_request("tools/list", json!([])).await.unwrap();
    assert_eq!(result["params"], json!({}));

    let err = transport.send_request("tools/list", json!([1])).await.unwrap_err();
    assert!(matches!(err, RelayError::InvalidParams(_)));
}

#[tokio::test]
async fn event_stream_body_picks_matching_frame() {
    let server = MockServer::start().await;
    mount(
        &server,
        handshake_then(|id| {
            let body = format!(
                "event: message\ndata: {}\n\nevent: message\ndata: {}\n\n",
                json!({"jsonrpc": "2.0", "method": "notifications/progress", "params": {"progress": 1}}),
                json!({"jsonrpc": "2.0", "id": id, "result": {"tools": [{"name": "navigate"}]}}),
            );
            ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
        }),
    )
    .await;

    let mut transport = transport_for(&server);
    let result = transport.send_request("tools/list", Value::Null).await.unwrap();
    assert_eq!(result, json!({"tools": [{"name": "navigate"}]}));
}

#[tokio::test]
async fn event_stream_frame_split_across_data_lines() {
    let server = MockServer::start().await;
    mount(
        &server,
        handshake_then(|id| {
            let body = format!(
                "event: message\ndata: {{\"jsonrpc\":\"2.0\",\"id\":{id},\"result\":{{\"text\":\"hel\ndata: lo\"}}}}\n\n"
            );
            ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
        }),
    )
    .await;

    let mut transport = transport_for(&server);
    let result = transport.send_request("tools/call", Value::Null).await.unwrap();
    assert_eq!(result, json!({"text": "hello"}));
}

#[tokio::test]
async fn event_stream_without_json_is_no_message_found() {
    let server = MockServer::start().await;
    mount(
        &server,
        handshake_then(|_| {
            ResponseTemplate::new(200).set_body_raw("data: {not json\n\n", "text/event-stream")
        }),
    )
    .await;

    let mut transport = transport_for(&server);
    let err = transport.send_request("tools/list", Value::Null).await.unwrap_err();
    assert!(matches!(err, RelayError::NoMessageFound));
}

#[tokio::test]
async fn uncorrelated_or_malformed_responses_are_rejected() {
    let cases = [
        json!({"jsonrpc": "2.0", "id": "999", "result": {}}),
        json!({"id": "2", "result": {}}),
        json!({"jsonrpc": "1.0", "id": "2", "result": {}}),
    ];

    for case in cases {
        let server = MockServer::start().await;
        let response = case.clone();
        mount(
            &server,
            handshake_then(move |_| ResponseTemplate::new(200).set_body_json(response.clone())),
        )
        .await;

        let mut transport = transport_for(&server);
        let err = transport.send_request("tools/list", Value::Null).await.unwrap_err();
        assert!(
            matches!(err, RelayError::InvalidProtocolResponse),
            "expected invalid protocol response for {case}, got {err:?}"
        );
    }
}

#[tokio::test]
async fn numeric_id_is_accepted() {
    let server = MockServer::start().await;
    mount(
        &server,
        handshake_then(|id| {
            let numeric: u64 = id.as_str().and_then(|id| id.parse().ok()).unwrap_or_default();
            ResponseTemplate::new(200)
                .set_body_json(json!({"jsonrpc": "2.0", "id": numeric, "result": {"ok": true}}))
        }),
    )
    .await;

    let mut transport = transport_for(&server);
    let result = transport.send_request("ping", Value::Null).await.unwrap();
    assert_eq!(result, json!({"ok": true}));
}

#[tokio::test]
async fn remote_error_is_raised_with_details() {
    let server = MockServer::start().await;
    mount(
        &server,
        handshake_then(|id| {
            ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32602, "message": "Invalid params", "data": {"field": "url"}}
            }))
        }),
    )
    .await;

    let mut transport = transport_for(&server);
    let err = transport.send_request("tools/call", Value::Null).await.unwrap_err();
    assert_eq!(err.remote_code(), Some(-32602));
    assert_eq!(
        err.to_string(),
        r#"JSON-RPC error: Invalid params (code: -32602) Details: {"field":"url"}"#
    );
}

#[tokio::test]
async fn non_success_status_is_http_status_error() {
    let server = MockServer::start().await;
    mount(&server, handshake_then(|_| ResponseTemplate::new(500))).await;

    let mut transport = transport_for(&server);
    let err = transport.send_request("tools/list", Value::Null).await.unwrap_err();
    assert!(matches!(err, RelayError::HttpStatus(500)));
    assert_eq!(err.to_string(), "HTTP request failed with status code: 500");
}

#[tokio::test]
async fn failed_initialize_can_be_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_string_contains("\"method\":\"initialize\""))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount(&server, mock_mcp_handler(Some(SESSION_ID))).await;

    let mut transport = transport_for(&server);
    let err = transport.start().await.unwrap_err();
    assert!(matches!(err, RelayError::Transport { .. }));
    assert_eq!(
        err.to_string(),
        "Failed to initialize MCP session: HTTP request failed with status code: 503"
    );
    assert_eq!(transport.state(), HttpState::Unstarted);
    assert_eq!(transport.session_id(), None);

    transport.start().await.unwrap();
    assert_eq!(transport.state(), HttpState::Ready);
    assert_eq!(transport.session_id(), Some(SESSION_ID));
}

#[tokio::test]
async fn auth_and_static_headers_are_sent() {
    let server = MockServer::start().await;
    mount(&server, mock_mcp_handler(None)).await;

    let config = ServerConfig::builder()
        .url(format!("{}/mcp", server.uri()))
        .api_key("sk-test")
        .headers([("X-Client".to_string(), "relay-tests".to_string())].into())
        .build();
    let mut transport = HttpTransport::new(config).unwrap();
    transport.send_request("tools/list", Value::Null).await.unwrap();

    for request in server.received_requests().await.unwrap() {
        let header = |name: &str| {
            request
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        assert_eq!(header("authorization").as_deref(), Some("Bearer sk-test"));
        assert_eq!(header("x-client").as_deref(), Some("relay-tests"));
        assert_eq!(header("content-type").as_deref(), Some("application/json"));
    }
}

#[tokio::test]
async fn slow_server_times_out() {
    let server = MockServer::start().await;
    mount(
        &server,
        handshake_then(|id| {
            ResponseTemplate::new(200)
                .set_body_json(json!({"jsonrpc": "2.0", "id": id, "result": {}}))
                .set_delay(Duration::from_secs(3))
        }),
    )
    .await;

    let config = ServerConfig::builder()
        .url(format!("{}/mcp", server.uri()))
        .timeout_secs(1)
        .build();
    let mut transport = HttpTransport::new(config).unwrap();
    let err = transport.send_request("tools/list", Value::Null).await.unwrap_err();
    assert!(err.is_timeout(), "{err:?}");
    assert!(matches!(err, RelayError::Timeout { seconds: 1, .. }));
    assert!(
        err.to_string().starts_with("Timeout waiting for MCP response after 1 seconds."),
        "{err}"
    );
}

#[tokio::test]
async fn slow_initialize_times_out_and_can_be_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(|request: &Request| {
            let body: Value = request.body_json().unwrap_or_else(|_| json!({}));
            ResponseTemplate::new(200)
                .set_body_json(initialize_result(body["id"].clone()))
                .set_delay(Duration::from_secs(3))
        })
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount(&server, mock_mcp_handler(None)).await;

    let config = ServerConfig::builder()
        .url(format!("{}/mcp", server.uri()))
        .timeout_secs(1)
        .build();
    let mut transport = HttpTransport::new(config).unwrap();

    let err = transport.start().await.unwrap_err();
    assert!(err.is_timeout(), "{err:?}");
    assert_eq!(transport.state(), HttpState::Unstarted);

    transport.start().await.unwrap();
    assert_eq!(transport.state(), HttpState::Ready);
}

#[tokio::test]
async fn close_is_a_no_op() {
    let server = MockServer::start().await;
    mount(&server, mock_mcp_handler(None)).await;

    let mut transport = transport_for(&server);
    transport.close().await.unwrap();
    assert!(received_bodies(&server).await.is_empty());
}
