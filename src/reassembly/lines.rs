//! Line-delimited framing.

use std::borrow::Cow;
use std::ops::Range;

use serde_json::Value;

use crate::error::Result;
use crate::jsonrpc;

/// Marker that identifies a single-line `tools/list` payload.
const TOOLS_ARRAY_MARKER: &str = "\"tools\":[";

/// Number of characters shown by [`ResponseBuffer::preview`].
pub const PREVIEW_CHARS: usize = 100;

/// Accumulates raw output until a correlated JSON-RPC message is complete.
///
/// Only the line that carries the matched response is ever removed. Lines that
/// fail to parse or belong to another exchange stay in the buffer so they can
/// be reported if the exchange times out.
///
/// Complete lines already rejected for an id are not decoded again, and bytes
/// already searched for a line break are not searched again, so feeding a
/// large message chunk by chunk stays linear in its size.
#[derive(Debug, Clone, Default)]
pub struct ResponseBuffer {
    bytes: Vec<u8>,
    /// Everything before this offset is complete lines rejected for `checked_id`.
    checked: usize,
    checked_id: Option<String>,
    /// `bytes[checked..searched]` holds no line terminator.
    searched: usize,
    has_line_break: bool,
}

/// One complete line: `content` excludes the terminator, `span` includes it.
struct Line {
    content: Range<usize>,
    span: Range<usize>,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.has_line_break |= chunk.contains(&b'\n');
        self.bytes.extend_from_slice(chunk);
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
        self.has_line_break = false;
        self.reset_scan();
    }

    /// Shortcut for large single-line `tools/list` results.
    ///
    /// Once the buffer holds at least one line break, every line, including
    /// the trailing unterminated one, whose raw text contains `"tools":[` and
    /// which parses as a valid response to `expected_id` is taken as the
    /// answer. This runs before [`take_response`](Self::take_response) so a
    /// huge payload is not treated as an incomplete fragment. The tail is only
    /// decoded once it ends in `}`.
    pub fn take_tools_list(&mut self, expected_id: &str) -> Result<Option<Value>> {
        if !self.has_line_break {
            return Ok(None);
        }
        self.track_id(expected_id);

        let (mut lines, tail) = self.pending_lines();
        if ends_with_object(&self.bytes[tail..]) {
            lines.push(Line {
                content: tail..self.bytes.len(),
                span: tail..self.bytes.len(),
            });
        }

        for line in lines {
            let text = self.text(&line.content);
            if !text.contains(TOOLS_ARRAY_MARKER) {
                continue;
            }

            let Ok(message) = serde_json::from_str::<Value>(&text) else {
                continue;
            };
            let Ok(envelope) = jsonrpc::validate_response(message, expected_id) else {
                continue;
            };

            drop(text);
            self.remove(line.span);
            return envelope.into_result().map(Some);
        }

        Ok(None)
    }

    /// Scan complete lines for the response to `expected_id`.
    ///
    /// Blank lines and the literal `0` are filler. Lines that are not JSON, or
    /// are JSON-RPC for another id, are skipped and kept. The trailing
    /// unterminated fragment is never decoded here. A matched response that
    /// carries an `error` object is returned as [`RelayError::Remote`].
    ///
    /// [`RelayError::Remote`]: crate::error::RelayError::Remote
    pub fn take_response(&mut self, expected_id: &str) -> Result<Option<Value>> {
        self.track_id(expected_id);
        let (lines, tail) = self.pending_lines();

        for line in lines {
            let text = self.text(&line.content);
            if is_filler(&text) {
                continue;
            }

            let message = match serde_json::from_str::<Value>(&text) {
                Ok(message) => message,
                Err(e) => {
                    tracing::trace!(error = %e, line = %text, "skipping non-JSON output line");
                    continue;
                }
            };

            let envelope = match jsonrpc::validate_response(message, expected_id) {
                Ok(envelope) => envelope,
                Err(_) => {
                    tracing::trace!(expected_id, line = %text, "skipping uncorrelated message");
                    continue;
                }
            };

            drop(text);
            self.remove(line.span);
            return envelope.into_result().map(Some);
        }

        self.checked = tail;
        self.searched = self.bytes.len();
        Ok(None)
    }

    /// The first [`PREVIEW_CHARS`] characters of unconsumed output, with `...`
    /// appended when truncated.
    pub fn preview(&self) -> String {
        // 4 bytes per char at most.
        let end = self.bytes.len().min(PREVIEW_CHARS * 4);
        let text = String::from_utf8_lossy(&self.bytes[..end]);
        let mut chars = text.chars();
        let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
        if chars.next().is_some() || end < self.bytes.len() {
            format!("{head}...")
        } else {
            head
        }
    }

    fn track_id(&mut self, expected_id: &str) {
        if self.checked_id.as_deref() != Some(expected_id) {
            self.checked_id = Some(expected_id.to_string());
            self.reset_scan();
        }
    }

    fn reset_scan(&mut self) {
        self.checked = 0;
        self.searched = 0;
    }

    fn remove(&mut self, span: Range<usize>) {
        self.bytes.drain(span);
        self.has_line_break = self.bytes.contains(&b'\n');
        self.reset_scan();
    }

    /// Trimmed text of `range`, borrowed unless it holds invalid UTF-8.
    fn text(&self, range: &Range<usize>) -> Cow<'_, str> {
        match String::from_utf8_lossy(&self.bytes[range.clone()]) {
            Cow::Borrowed(text) => Cow::Borrowed(text.trim()),
            Cow::Owned(text) => Cow::Owned(text.trim().to_string()),
        }
    }

    /// Complete lines from the checked offset on, split on `\n`, `\r\n` and
    /// lone `\r`, plus the start of the unterminated tail.
    fn pending_lines(&self) -> (Vec<Line>, usize) {
        let mut lines = Vec::new();
        let mut start = self.checked;
        let mut from = self.searched.max(self.checked);

        while let Some(offset) = self.bytes[from..]
            .iter()
            .position(|byte| matches!(byte, b'\n' | b'\r'))
        {
            let at = from + offset;
            let end = if self.bytes[at] == b'\r' && self.bytes.get(at + 1) == Some(&b'\n') {
                at + 2
            } else {
                at + 1
            };
            lines.push(Line {
                content: start..at,
                span: start..end,
            });
            start = end;
            from = end;
        }

        (lines, start)
    }
}

/// Whether `bytes`, ignoring trailing whitespace, could close a JSON object.
fn ends_with_object(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .rev()
        .find(|byte| !byte.is_ascii_whitespace())
        .is_some_and(|byte| *byte == b'}')
}

/// Blank lines and the stray `0` some writers emit between messages.
fn is_filler(line: &str) -> bool {
    line.is_empty() || line == "0"
}
