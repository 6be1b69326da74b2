//! Tag rewriting for streamed completions
//!
//! Sits between the backend byte stream and the client. Frames are decoded,
//! the content of each choice runs through that choice's own [`TagScanner`],
//! and the rewritten content strings are spliced back into the payload. Frames
//! whose content did not change are forwarded as their original bytes.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use serde_json::{Map, Value};

use super::{encode, EventFrame, FrameDecoder, FrameKind};
use crate::proxy::rewrite::payload;
use crate::proxy::rewrite::{ContentField, TagRule, TagScanner};

/// Fields checked, in order, for the text of a streamed choice
const STREAM_FIELDS: &[ContentField] = &[ContentField::Delta, ContentField::Text];

/// Matcher state of one `choices[i]` stream
struct ChoiceStream {
    scanner: TagScanner,
    field: ContentField,
}

/// Per-response rewriter for an SSE completion stream
pub struct EventStreamRewriter {
    rules: Arc<[TagRule]>,
    decoder: FrameDecoder,
    choices: BTreeMap<u64, ChoiceStream>,
    /// Top-level fields of the first chunk (id, model, ...) for synthesized frames
    template: Option<Map<String, Value>>,
    done: bool,
}

impl EventStreamRewriter {
    pub fn new(rules: Arc<[TagRule]>, max_frame_bytes: usize) -> Self {
        Self {
            rules,
            decoder: FrameDecoder::new(max_frame_bytes),
            choices: BTreeMap::new(),
            template: None,
            done: false,
        }
    }

    /// Whether the `[DONE]` sentinel has been relayed
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Process one transport chunk, returning the bytes to relay
    pub fn feed(&mut self, chunk: &[u8]) -> Bytes {
        if self.rules.is_empty() {
            return Bytes::copy_from_slice(chunk);
        }

        let mut out = BytesMut::new();
        for frame in self.decoder.decode(chunk) {
            self.process(frame, &mut out);
        }
        out.freeze()
    }

    /// The backend closed the stream: flush whatever is still owed
    ///
    /// Covers streams that end without `[DONE]`, and trailing bytes that never
    /// formed a complete frame.
    pub fn finish(&mut self) -> Bytes {
        if self.rules.is_empty() {
            return Bytes::new();
        }

        let mut out = BytesMut::new();
        if let Some(frame) = self.decoder.finish() {
            self.process(frame, &mut out);
        }
        if !self.done {
            self.flush_choices(&mut out);
        }
        out.freeze()
    }

    fn process(&mut self, frame: EventFrame, out: &mut BytesMut) {
        if self.done {
            out.extend_from_slice(&encode(&frame));
            return;
        }

        match frame.kind {
            FrameKind::Data => {
                let rewritten = self.rewrite_frame(&frame);
                out.extend_from_slice(&encode(rewritten.as_ref().unwrap_or(&frame)));
            }
            FrameKind::Done => {
                self.flush_choices(out);
                out.extend_from_slice(&encode(&frame));
                self.done = true;
            }
            FrameKind::Other | FrameKind::Oversized => out.extend_from_slice(&encode(&frame)),
        }
    }

    /// Run the content of every choice through its scanner
    ///
    /// Returns `None` when the frame should go out unchanged.
    fn rewrite_frame(&mut self, frame: &EventFrame) -> Option<EventFrame> {
        let data = frame.data.as_deref()?;

        let choices = match payload::choices(data) {
            Ok(Some(choices)) => choices,
            Ok(None) => {
                tracing::debug!("Upstream frame without choices, passing through");
                return None;
            }
            Err(e) => {
                tracing::debug!(error = %e, "Malformed upstream frame, passing through");
                return None;
            }
        };

        if self.template.is_none() {
            if let Ok(mut template) = serde_json::from_str::<Map<String, Value>>(data) {
                template.remove("choices");
                template.remove("usage");
                self.template = Some(template);
            }
        }

        let mut edits = Vec::new();
        for choice in &choices {
            let index = choice.index();

            let field = match self.choices.get(&index) {
                Some(stream) => stream.field,
                None => match choice.locate(STREAM_FIELDS) {
                    Some(field) => {
                        self.choices.insert(
                            index,
                            ChoiceStream {
                                scanner: TagScanner::new(Arc::clone(&self.rules)),
                                field,
                            },
                        );
                        field
                    }
                    None => continue,
                },
            };

            let Some(slot) = choice.content(field) else {
                continue;
            };
            let Some(stream) = self.choices.get_mut(&index) else {
                continue;
            };

            let output = stream.scanner.feed(&slot.text);
            if output.state_changed {
                tracing::trace!(choice = index, mode = ?stream.scanner.mode(), "Tag region boundary");
            }
            if output.emit != slot.text {
                edits.push((slot.span, output.emit));
            }
        }

        if edits.is_empty() {
            return None;
        }

        match payload::splice(data, edits) {
            Some(payload) => Some(frame.with_data(&payload)),
            None => {
                tracing::warn!("Failed to splice rewritten frame");
                None
            }
        }
    }

    /// Flush every scanner; residual text goes out in one synthesized frame
    fn flush_choices(&mut self, out: &mut BytesMut) {
        let mut residual = Vec::new();

        for (index, stream) in self.choices.iter_mut() {
            let text = stream.scanner.flush();
            if text.is_empty() {
                continue;
            }
            let choice = match stream.field {
                ContentField::Text => serde_json::json!({
                    "index": index,
                    "text": text,
                    "finish_reason": null,
                }),
                ContentField::Delta | ContentField::Message => serde_json::json!({
                    "index": index,
                    "delta": { "content": text },
                    "finish_reason": null,
                }),
            };
            residual.push(choice);
        }

        if residual.is_empty() {
            return;
        }

        let mut payload = self.template.clone().unwrap_or_default();
        payload.insert("choices".to_string(), Value::Array(residual));

        match serde_json::to_string(&Value::Object(payload)) {
            Ok(payload) => out.extend_from_slice(&encode(&EventFrame::data(&payload))),
            Err(e) => tracing::warn!(error = %e, "Failed to encode residual frame"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
