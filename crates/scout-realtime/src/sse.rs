//! # SSE Parser
//!
//! Turns the chunked body of a `text/event-stream` response into [`Frame`]s.
//!
//! Handles:
//! - Line buffering across chunk boundaries (`\n` and `\r\n` endings)
//! - `event:` labels (default [`DEFAULT_EVENT_TYPE`])
//! - Multi-line `data:` fields, joined with `\n`
//! - `id:` (kept for diagnostics), `retry:` (ignored) and `:` comments
//! - A trailing frame with no terminating blank line (configurable)

use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures::Stream;
use scout_core::errors::TransportError;
use tokio_stream::StreamExt;
use tracing::trace;

/// Event type assigned to frames that carry no `event:` label.
pub const DEFAULT_EVENT_TYPE: &str = "message";

/// Default cap on a single unterminated line (1 MiB).
pub const DEFAULT_MAX_LINE_BYTES: usize = 1 << 20;

/// One dispatched server-sent event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Event-type label used to route the frame to subscribers.
    pub event_type: String,
    /// Raw payload; JSON text or empty.
    pub data: String,
    /// Last `id:` seen in the frame, if any.
    pub id: Option<String>,
}

impl Frame {
    /// Frame with an explicit label and payload.
    pub fn new(event_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            data: data.into(),
            id: None,
        }
    }

    /// Unlabeled frame (routed to [`DEFAULT_EVENT_TYPE`]).
    pub fn message(data: impl Into<String>) -> Self {
        Self::new(DEFAULT_EVENT_TYPE, data)
    }
}

/// Options for the SSE parser.
#[derive(Clone, Debug)]
pub struct SseParserOptions {
    /// Whether a frame still pending when the body ends is emitted.
    /// Default: `true`.
    pub flush_trailing_frame: bool,
    /// Longest line accepted before the stream is failed with
    /// [`TransportError::Read`]. Default: [`DEFAULT_MAX_LINE_BYTES`].
    pub max_line_bytes: usize,
}

impl Default for SseParserOptions {
    fn default() -> Self {
        Self {
            flush_trailing_frame: true,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

/// Fields accumulated between blank lines.
#[derive(Debug, Default)]
struct PendingFrame {
    event_type: Option<String>,
    data: Option<String>,
    id: Option<String>,
}

impl PendingFrame {
    /// Apply one non-empty line. Unknown fields are ignored.
    fn apply_line(&mut self, line: &str) {
        let Some((field, value)) = split_field(line) else {
            return;
        };
        match field {
            "event" => self.event_type = Some(value.to_owned()),
            "data" => match self.data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => self.data = Some(value.to_owned()),
            },
            "id" => self.id = Some(value.to_owned()),
            _ => trace!(field, "ignoring SSE field"),
        }
    }

    /// Finish the frame at a blank line. Frames without any `data:` line
    /// are discarded, matching the EventSource dispatch rules.
    fn take(&mut self) -> Option<Frame> {
        let pending = std::mem::take(self);
        let data = pending.data?;
        let event_type = pending
            .event_type
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_owned());
        Some(Frame {
            event_type,
            data,
            id: pending.id,
        })
    }
}

/// Split `field: value` into its parts.
///
/// Returns `None` for comments. A line without a colon is a field with an
/// empty value. One leading space of the value is stripped.
fn split_field(line: &str) -> Option<(&str, &str)> {
    if line.starts_with(':') {
        return None;
    }
    match line.split_once(':') {
        Some((field, value)) => Some((field, value.strip_prefix(' ').unwrap_or(value))),
        None => Some((line, "")),
    }
}

/// Parser state threaded through [`futures::stream::unfold`].
struct ParserState<S> {
    stream: Pin<Box<S>>,
    buffer: BytesMut,
    pending: PendingFrame,
    done: bool,
}

/// Parse SSE frames from a byte stream.
///
/// A read error is yielded once as `Err` and ends the stream. A clean end of
/// the body simply ends the stream; the caller decides what a closed stream
/// means.
pub fn parse_sse_frames<S, E>(
    byte_stream: S,
    options: &SseParserOptions,
) -> impl Stream<Item = Result<Frame, TransportError>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<TransportError> + Send + 'static,
{
    let flush_trailing = options.flush_trailing_frame;
    let max_line_bytes = options.max_line_bytes;
    let initial = ParserState {
        stream: Box::pin(byte_stream),
        buffer: BytesMut::with_capacity(8192),
        pending: PendingFrame::default(),
        done: false,
    };

    futures::stream::unfold(initial, move |mut state| async move {
        if state.done {
            return None;
        }

        loop {
            if let Some(newline_pos) = state.buffer.iter().position(|&b| b == b'\n') {
                let mut line_bytes = state.buffer.split_to(newline_pos + 1);
                line_bytes.truncate(line_bytes.len() - 1);
                if line_bytes.last() == Some(&b'\r') {
                    line_bytes.truncate(line_bytes.len() - 1);
                }

                let Ok(line) = std::str::from_utf8(&line_bytes) else {
                    trace!("skipping SSE line with invalid UTF-8");
                    continue;
                };

                if line.is_empty() {
                    if let Some(frame) = state.pending.take() {
                        return Some((Ok(frame), state));
                    }
                } else {
                    state.pending.apply_line(line);
                }
                continue;
            }

            if state.buffer.len() > max_line_bytes {
                state.done = true;
                state.buffer.clear();
                return Some((
                    Err(TransportError::Read(format!(
                        "SSE line exceeds {max_line_bytes} bytes"
                    ))),
                    state,
                ));
            }

            match state.stream.next().await {
                Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(e.into()), state));
                }
                None => {
                    state.done = true;
                    if !flush_trailing {
                        return None;
                    }
                    if !state.buffer.is_empty() {
                        let rest = state.buffer.split();
                        if let Ok(line) = std::str::from_utf8(&rest) {
                            let line = line.trim_end_matches('\r');
                            if !line.is_empty() {
                                state.pending.apply_line(line);
                            }
                        }
                    }
                    return state.pending.take().map(|frame| (Ok(frame), state));
                }
            }
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
