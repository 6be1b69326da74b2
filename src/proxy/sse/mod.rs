// SSE (Server-Sent Events) framing
//
// OpenAI-compatible backends stream completions as SSE. Each event is a block
// of `field: value` lines terminated by a blank line:
// ```
// data: {"id":"...","choices":[{"index":0,"delta":{"content":"Hel"}}]}
//
// data: [DONE]
//
// ```
//
// Transport chunks do not line up with events: one chunk can carry several
// events, or a fraction of one. `FrameDecoder` reassembles complete frames and
// keeps the incomplete tail for the next chunk. Frames keep their raw bytes so
// anything the proxy does not rewrite goes out exactly as it came in.
//
// The content rewriting on top of the framing lives in `rewriter`.

mod rewriter;

pub use rewriter::EventStreamRewriter;

use bytes::{Bytes, BytesMut};

/// Stream terminator sent by OpenAI-compatible backends
pub const DONE_SENTINEL: &str = "[DONE]";

// ============================================================================
// SSE Detection
// ============================================================================

/// Check if a response is SSE based on content-type header
pub fn is_sse_response(headers: &reqwest::header::HeaderMap) -> bool {
    headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("text/event-stream"))
        .unwrap_or(false)
}

// ============================================================================
// Event Frames
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Carries a `data:` payload
    Data,
    /// The `data: [DONE]` terminator
    Done,
    /// Comments, keep-alives, frames with only `event:`/`id:` fields
    Other,
    /// Piece of a frame longer than the decoder limit, relayed as is
    Oversized,
}

/// One complete SSE event, blank-line terminator included
#[derive(Debug, Clone)]
pub struct EventFrame {
    pub kind: FrameKind,
    /// Exact bytes as received (or as synthesized)
    pub raw: Bytes,
    /// `data:` lines joined with `\n`, leading space stripped
    pub data: Option<String>,
}

impl EventFrame {
    /// Parse a complete frame
    ///
    /// Frames that are not valid UTF-8 are kept as `Other` so they pass
    /// through untouched.
    pub fn parse(raw: Bytes) -> Self {
        let data = std::str::from_utf8(&raw).ok().and_then(|text| {
            let values: Vec<&str> = split_lines(text)
                .into_iter()
                .filter_map(|(line, _)| data_value(line))
                .collect();
            (!values.is_empty()).then(|| values.join("\n"))
        });

        let kind = match data.as_deref() {
            Some(d) if d.trim() == DONE_SENTINEL => FrameKind::Done,
            Some(_) => FrameKind::Data,
            None => FrameKind::Other,
        };

        Self { kind, raw, data }
    }

    fn oversized(raw: Bytes) -> Self {
        Self {
            kind: FrameKind::Oversized,
            raw,
            data: None,
        }
    }

    /// Synthesize a data frame with `\n` line endings
    pub fn data(payload: &str) -> Self {
        let mut raw = String::with_capacity(payload.len() + 8);
        for line in payload.split('\n') {
            raw.push_str("data: ");
            raw.push_str(line);
            raw.push('\n');
        }
        raw.push('\n');

        Self {
            kind: FrameKind::Data,
            raw: Bytes::from(raw),
            data: Some(payload.to_string()),
        }
    }

    /// Same frame with a new `data:` payload
    ///
    /// Every other line (`event:`, `id:`, comments) and the original line
    /// endings are kept in place. The new payload takes the position of the
    /// first `data:` line; the remaining `data:` lines are dropped.
    pub fn with_data(&self, payload: &str) -> Self {
        let Ok(text) = std::str::from_utf8(&self.raw) else {
            return Self::data(payload);
        };

        let mut out = String::with_capacity(text.len() + payload.len());
        let mut written = false;

        for (line, ending) in split_lines(text) {
            if data_value(line).is_none() {
                out.push_str(line);
                out.push_str(ending);
                continue;
            }
            if written {
                continue;
            }
            // Keep the original "data:" / "data: " spelling
            let prefix = if line.starts_with("data: ") { "data: " } else { "data:" };
            let ending = if ending.is_empty() { "\n" } else { ending };
            for value in payload.split('\n') {
                out.push_str(prefix);
                out.push_str(value);
                out.push_str(ending);
            }
            written = true;
        }

        Self {
            kind: FrameKind::Data,
            raw: Bytes::from(out),
            data: Some(payload.to_string()),
        }
    }
}

/// Serialize a frame for the client
pub fn encode(frame: &EventFrame) -> Bytes {
    frame.raw.clone()
}

/// Value of a `data:` line, or None for any other field
fn data_value(line: &str) -> Option<&str> {
    let value = line.strip_prefix("data:")?;
    Some(value.strip_prefix(' ').unwrap_or(value))
}

/// Split text into (line, line ending) pairs; the last line may have no ending
fn split_lines(text: &str) -> Vec<(&str, &str)> {
    let bytes = text.as_bytes();
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                lines.push((&text[start..i], &text[i..i + 1]));
                i += 1;
                start = i;
            }
            b'\r' => {
                let end = if bytes.get(i + 1) == Some(&b'\n') { i + 2 } else { i + 1 };
                lines.push((&text[start..i], &text[i..end]));
                i = end;
                start = i;
            }
            _ => i += 1,
        }
    }
    if start < bytes.len() {
        lines.push((&text[start..], ""));
    }

    lines
}

// ============================================================================
// Frame Decoder
// ============================================================================

/// Reassembles SSE frames from arbitrarily split transport chunks
///
/// Scanning resumes where the previous chunk left off. A frame that grows past
/// `max_frame_bytes` without terminating is given up on: its bytes are emitted
/// as [`FrameKind::Oversized`] pieces as they arrive, up to and including its
/// blank line, so memory stays bounded by the limit plus one chunk.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    /// Bytes of `buf` already scanned for a frame end
    scanned: usize,
    /// Start of the current line in `buf`; `None` when it began in bytes
    /// already emitted
    line_start: Option<usize>,
    max_frame_bytes: usize,
    /// Inside a frame that exceeded the limit
    oversized: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}

impl FrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            scanned: 0,
            line_start: Some(0),
            max_frame_bytes,
            oversized: false,
        }
    }

    /// Append a chunk and return every frame it completed
    pub fn decode(&mut self, raw: &[u8]) -> Vec<EventFrame> {
        self.buf.extend_from_slice(raw);

        let mut frames = Vec::new();
        while let Some(end) = self.scan() {
            let frame = self.buf.split_to(end).freeze();
            frames.push(self.complete(frame));
        }

        if self.oversized || self.buf.len() > self.max_frame_bytes {
            if !self.oversized {
                tracing::warn!(
                    limit = self.max_frame_bytes,
                    "SSE frame exceeds limit, relaying it unmodified"
                );
                self.oversized = true;
            }
            if self.scanned > 0 {
                let piece = self.buf.split_to(self.scanned).freeze();
                self.line_start = match self.line_start {
                    Some(start) if start == self.scanned => Some(0),
                    _ => None,
                };
                self.scanned = 0;
                frames.push(EventFrame::oversized(piece));
            }
        }
        frames
    }

    /// Bytes of an incomplete trailing frame, if the stream ended mid-frame
    pub fn finish(&mut self) -> Option<EventFrame> {
        if self.buf.is_empty() {
            self.reset();
            return None;
        }
        let rest = self.buf.split().freeze();
        Some(self.complete(rest))
    }

    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    fn complete(&mut self, raw: Bytes) -> EventFrame {
        let frame = if self.oversized {
            EventFrame::oversized(raw)
        } else {
            EventFrame::parse(raw)
        };
        self.reset();
        frame
    }

    fn reset(&mut self) {
        self.scanned = 0;
        self.line_start = Some(0);
        self.oversized = false;
    }

    /// Length of the first complete frame in the buffer
    ///
    /// A frame ends at the first empty line. A trailing `\r` is not treated as
    /// a line ending yet: it may be the first half of `\r\n`.
    fn scan(&mut self) -> Option<usize> {
        let buf = &self.buf[..];
        let mut i = self.scanned;

        while i < buf.len() {
            let next = match buf[i] {
                b'\n' => i + 1,
                b'\r' => match buf.get(i + 1) {
                    Some(b'\n') => i + 2,
                    Some(_) => i + 1,
                    None => break,
                },
                _ => {
                    i += 1;
                    continue;
                }
            };

            if self.line_start == Some(i) {
                return Some(next);
            }
            self.line_start = Some(next);
            i = next;
        }

        self.scanned = i;
        None
    }
}

// ============================================================================
// Tests
// ============================================================================
