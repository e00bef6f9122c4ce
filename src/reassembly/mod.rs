//! Message reassembly: turn raw channel output into correlated JSON-RPC results.
//!
//! Two framings are supported:
//! - line mode ([`ResponseBuffer`]) for stdio and plain JSON HTTP bodies
//! - event-stream mode ([`sse`]) for `text/event-stream` HTTP bodies

pub mod lines;
pub mod sse;

pub use lines::ResponseBuffer;

use serde_json::Value;

use crate::error::{RelayError, Result};
use crate::jsonrpc;

const EVENT_STREAM: &str = "text/event-stream";

/// Framing of one response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Lines,
    EventStream,
}

impl Framing {
    /// Pick the framing from a `Content-Type` header value.
    ///
    /// Anything other than `text/event-stream` (parameters ignored) is line mode.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let is_event_stream = content_type
            .and_then(|value| value.split(';').next())
            .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(EVENT_STREAM));

        if is_event_stream {
            Self::EventStream
        } else {
            Self::Lines
        }
    }
}

/// Decode a complete HTTP response body into the result for `expected_id`.
pub fn decode_http_body(framing: Framing, body: &str, expected_id: &str) -> Result<Value> {
    match framing {
        Framing::EventStream => sse::decode_event_stream(body, expected_id),
        Framing::Lines => decode_json_body(body, expected_id),
    }
}

/// A plain JSON body is normally one document, possibly pretty-printed, so it
/// is decoded whole first. Only when that fails is it scanned line by line.
fn decode_json_body(body: &str, expected_id: &str) -> Result<Value> {
    if let Ok(message) = serde_json::from_str::<Value>(body) {
        return jsonrpc::validate_response(message, expected_id)?.into_result();
    }

    let mut buffer = ResponseBuffer::new();
    buffer.push(body.as_bytes());
    buffer.push(b"\n");

    if let Some(result) = buffer.take_tools_list(expected_id)? {
        return Ok(result);
    }
    buffer
        .take_response(expected_id)?
        .ok_or(RelayError::InvalidProtocolResponse)
}
