//! Server-Sent Events framing for Streamable HTTP responses.

use serde_json::Value;

use crate::error::{RelayError, Result};
use crate::jsonrpc;

/// Collect the `data:` payload of every event in `body`.
///
/// Events are separated by a blank line. Multiple `data:` lines in one event
/// are concatenated as-is, so a JSON document may be split anywhere across
/// them. `event:`, `id:`, `retry:` and comment lines are ignored.
pub fn event_payloads(body: &str) -> Vec<String> {
    let mut payloads = Vec::new();
    let mut data: Vec<&str> = Vec::new();

    for line in body.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            if !data.is_empty() {
                payloads.push(data.concat());
                data.clear();
            }
            continue;
        }

        if let Some(value) = line.strip_prefix("data:") {
            data.push(value.strip_prefix(' ').unwrap_or(value));
        }
    }

    if !data.is_empty() {
        payloads.push(data.concat());
    }

    payloads
}

/// Decode an event-stream body into the result for `expected_id`.
///
/// Every event is decoded and the one whose `id` matches is returned; an
/// `error` object becomes [`RelayError::Remote`]. With no correlated event the
/// last JSON event is still validated against `expected_id`, which reports
/// [`RelayError::InvalidProtocolResponse`] rather than
/// [`RelayError::NoMessageFound`]. The latter means no event parsed at all.
pub fn decode_event_stream(body: &str, expected_id: &str) -> Result<Value> {
    let messages: Vec<Value> = event_payloads(body)
        .iter()
        .filter_map(|payload| match serde_json::from_str::<Value>(payload) {
            Ok(message) if message.is_object() => Some(message),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(error = %e, payload = %payload, "SSE event is not JSON");
                None
            }
        })
        .collect();

    let correlated = messages.iter().position(|message| {
        message
            .get("id")
            .is_some_and(|id| jsonrpc::id_matches(id, expected_id))
    });

    let chosen = match correlated {
        Some(index) => messages.into_iter().nth(index),
        None => messages.into_iter().last(),
    }
    .ok_or(RelayError::NoMessageFound)?;

    jsonrpc::validate_response(chosen, expected_id)?.into_result()
}
