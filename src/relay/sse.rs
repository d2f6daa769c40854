//! Streaming response decoder
//!
//! The gateway answers with an SSE-style body: line-delimited `data:` frames
//! carrying JSON, terminated by `data: [DONE]`. The decoder reassembles
//! lines across chunk boundaries and yields structured events. Frames it
//! does not understand are dropped, never fatal, so newer gateways can add
//! frame types without breaking older clients.

use crate::{PrattleError, Result};
use futures::{Stream, StreamExt};
use tracing::trace;

/// One decoded event from the response stream
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// Incremental response text
    Delta(String),
    /// The gateway finished this turn
    Done,
    /// The gateway reported an error mid-stream
    Error(String),
}

impl StreamEvent {
    /// Whether no further events can follow this one
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error(_))
    }
}

/// How the body ended when no terminal frame was decoded
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEnd {
    /// Graceful close; treat as an implicit Done
    Done,
    /// The body carried data but not a single recognizable frame
    NoFrames,
}

/// Incremental decoder over one response body
///
/// One decode pass per body: once a terminal event is produced the decoder
/// ignores any remaining bytes.
pub struct SseDecoder {
    buffer: Vec<u8>,
    finished: bool,
    bytes_seen: usize,
    frames_seen: usize,
}

impl SseDecoder {
    /// Create a decoder for a fresh response body
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            finished: false,
            bytes_seen: 0,
            frames_seen: 0,
        }
    }

    /// Feed one chunk of body bytes, returning any completed events
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.bytes_seen += chunk.len();
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes[..pos]);
            let line = line.trim_end_matches('\r');

            if let Some(event) = self.decode_line(line) {
                let terminal = event.is_terminal();
                events.push(event);
                if terminal {
                    self.finished = true;
                    break;
                }
            }
        }
        events
    }

    fn decode_line(&mut self, line: &str) -> Option<StreamEvent> {
        let data = line.strip_prefix("data: ")?;

        if data == "[DONE]" {
            self.frames_seen += 1;
            return Some(StreamEvent::Done);
        }

        let value: serde_json::Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(_) => {
                trace!("Dropping malformed frame: {}", data);
                return None;
            }
        };
        self.frames_seen += 1;

        if let Some(error) = value.get("error") {
            let message = error
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Some(StreamEvent::Error(message));
        }
        if let Some(delta) = value.get("delta").and_then(|v| v.as_str()) {
            return Some(StreamEvent::Delta(delta.to_string()));
        }
        // Gateway-flavored chunk: {choices:[{delta:{content}}]}
        if let Some(content) = value
            .pointer("/choices/0/delta/content")
            .and_then(|v| v.as_str())
        {
            return Some(StreamEvent::Delta(content.to_string()));
        }

        // Recognized frame shape, payload we do not understand
        None
    }

    /// Classify how the body ended
    ///
    /// Returns `None` when a terminal event was already produced.
    pub fn close(&self) -> Option<StreamEnd> {
        if self.finished {
            return None;
        }
        if self.bytes_seen > 0 && self.frames_seen == 0 {
            return Some(StreamEnd::NoFrames);
        }
        Some(StreamEnd::Done)
    }
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a streaming response into events
///
/// Ends after exactly one terminal item: `Ok(Done)`, `Ok(Error)`, or an
/// `Err` for stream-level failures (read error, unrecognizable body).
pub fn event_stream(response: reqwest::Response) -> impl Stream<Item = Result<StreamEvent>> {
    async_stream::stream! {
        let mut decoder = SseDecoder::new();
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(PrattleError::ConnectError(format!(
                        "stream interrupted: {}",
                        e
                    )));
                    return;
                }
            };
            for event in decoder.feed(&chunk) {
                let terminal = event.is_terminal();
                yield Ok(event);
                if terminal {
                    return;
                }
            }
        }

        match decoder.close() {
            Some(StreamEnd::Done) | None => yield Ok(StreamEvent::Done),
            Some(StreamEnd::NoFrames) => {
                yield Err(PrattleError::ProtocolError(
                    "response carried no recognizable frames".to_string(),
                ));
            }
        }
    }
}
