//! Tag rewriting - delimiter rules and the content rewrite policy
//!
//! A route carries an ordered list of [`TagRule`]s. Each rule pairs a begin and
//! end delimiter (e.g. `<think>` / `</think>`) with an action that decides what
//! the client sees for a tagged region.
//!
//! # Policy
//!
//! | Action      | Complete region          | Truncated region (no end) |
//! |-------------|--------------------------|---------------------------|
//! | Strip       | nothing                  | nothing                   |
//! | Replace     | the literal, once        | nothing                   |
//! | Rename      | new_begin + text + new_end | new_begin + text        |
//! | Passthrough | begin + text + end       | begin + text              |
//!
//! The streaming matcher (see [`matcher`]) never buffers a whole region. It
//! emits the policy in three pieces: [`TagRule::open_text`] when the begin
//! delimiter is seen, [`TagRule::inner_text`] for every piece of region text,
//! and [`TagRule::close_text`] when the end delimiter arrives (or the stream
//! ends). Concatenated, the pieces equal [`apply`].

pub mod matcher;
pub mod payload;

pub use matcher::{ScanOutput, TagScanner};

use std::sync::Arc;

// ============================================================================
// Rule Types
// ============================================================================

/// What to do with a tagged region
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagAction {
    /// Drop the region and both delimiters
    Strip,
    /// Replace the whole region (delimiters included) with a literal
    Replace(String),
    /// Keep the region text, swap the delimiters for new markers
    Rename { begin: String, end: String },
    /// Leave the region untouched
    Passthrough,
}

impl TagAction {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            TagAction::Strip => "strip",
            TagAction::Replace(_) => "replace",
            TagAction::Rename { .. } => "rename",
            TagAction::Passthrough => "passthrough",
        }
    }
}

/// A begin/end delimiter pair and the action applied to the region between them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRule {
    pub begin: String,
    pub end: String,
    pub action: TagAction,
}

impl TagRule {
    pub fn new(begin: impl Into<String>, end: impl Into<String>, action: TagAction) -> Self {
        Self {
            begin: begin.into(),
            end: end.into(),
            action,
        }
    }

    /// Text emitted when the begin delimiter is matched
    pub fn open_text(&self) -> &str {
        match &self.action {
            TagAction::Strip | TagAction::Replace(_) => "",
            TagAction::Rename { begin, .. } => begin,
            TagAction::Passthrough => &self.begin,
        }
    }

    /// Text emitted for a piece of region content
    pub fn inner_text<'a>(&self, text: &'a str) -> &'a str {
        match &self.action {
            TagAction::Strip | TagAction::Replace(_) => "",
            TagAction::Rename { .. } | TagAction::Passthrough => text,
        }
    }

    /// Text emitted when the region closes
    ///
    /// A truncated region never gets a close marker: the end delimiter was not
    /// seen, so Strip/Replace stay silent and Rename/Passthrough leave it open.
    pub fn close_text(&self, truncated: bool) -> &str {
        if truncated {
            return "";
        }
        match &self.action {
            TagAction::Strip => "",
            TagAction::Replace(literal) => literal,
            TagAction::Rename { end, .. } => end,
            TagAction::Passthrough => &self.end,
        }
    }

    /// Longest delimiter of this rule, in bytes
    pub fn max_delimiter_len(&self) -> usize {
        self.begin.len().max(self.end.len())
    }
}

/// Rewrite a whole tagged region at once
pub fn apply(rule: &TagRule, text: &str, truncated: bool) -> String {
    let mut out = String::with_capacity(text.len());
    out.push_str(rule.open_text());
    out.push_str(rule.inner_text(text));
    out.push_str(rule.close_text(truncated));
    out
}

/// Run a complete piece of text through a fresh scanner (feed + flush)
pub fn rewrite_text(rules: &Arc<[TagRule]>, text: &str) -> String {
    let mut scanner = TagScanner::new(Arc::clone(rules));
    let mut out = scanner.feed(text).emit;
    out.push_str(&scanner.flush());
    out
}

// ============================================================================
// Content Fields
// ============================================================================

/// Where the completion text lives inside one element of `choices`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentField {
    /// `choices[i].delta.content` (chat completion chunk)
    Delta,
    /// `choices[i].message.content` (chat completion)
    Message,
    /// `choices[i].text` (legacy completion, streamed or not)
    Text,
}

/// Content fields for a buffered (non-streaming) completion body
const BUFFERED_FIELDS: &[ContentField] = &[ContentField::Message, ContentField::Text];

// ============================================================================
// Buffered Bodies
// ============================================================================

/// Rewrite a complete (non-streaming) response body
///
/// JSON bodies have the content of every choice rewritten independently; only
/// the content strings change, every other byte is kept. Bodies that are not
/// JSON but are valid UTF-8 are rewritten as plain text.
///
/// Returns `None` when nothing changed, so the caller can forward the original
/// bytes untouched.
pub fn rewrite_buffered_body(body: &[u8], rules: &Arc<[TagRule]>) -> Option<Vec<u8>> {
    if rules.is_empty() || body.is_empty() {
        return None;
    }
    let text = std::str::from_utf8(body).ok()?;

    let choices = match payload::choices(text) {
        Ok(choices) => choices?,
        Err(e) if e.is_data() => return None,
        Err(_) => {
            let rewritten = rewrite_text(rules, text);
            return (rewritten != text).then(|| rewritten.into_bytes());
        }
    };

    let edits: Vec<_> = choices
        .iter()
        .filter_map(|choice| {
            let slot = choice.content(choice.locate(BUFFERED_FIELDS)?)?;
            let rewritten = rewrite_text(rules, &slot.text);
            (rewritten != slot.text).then_some((slot.span, rewritten))
        })
        .collect();

    if edits.is_empty() {
        return None;
    }

    match payload::splice(text, edits) {
        Some(out) => Some(out.into_bytes()),
        None => {
            tracing::warn!("Failed to splice rewritten body, forwarding original");
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn think(action: TagAction) -> TagRule {
        TagRule::new("<think>", "</think>", action)
    }

    fn rules(action: TagAction) -> Arc<[TagRule]> {
        Arc::from(vec![think(action)])
    }

    #[test]
    fn test_apply_complete_regions() {
        assert_eq!(apply(&think(TagAction::Strip), "secret", false), "");
        assert_eq!(
            apply(&think(TagAction::Replace("[hidden]".into())), "secret", false),
            "[hidden]"
        );
        assert_eq!(
            apply(
                &think(TagAction::Rename {
                    begin: "<reasoning>".into(),
                    end: "</reasoning>".into()
                }),
                "secret",
                false
            ),
            "<reasoning>secret</reasoning>"
        );
        assert_eq!(
            apply(&think(TagAction::Passthrough), "secret", false),
            "<think>secret</think>"
        );
    }

    #[test]
    fn test_apply_truncated_regions() {
        assert_eq!(apply(&think(TagAction::Strip), "partial", true), "");
        assert_eq!(
            apply(&think(TagAction::Replace("[hidden]".into())), "partial", true),
            ""
        );
        assert_eq!(
            apply(
                &think(TagAction::Rename {
                    begin: "<r>".into(),
                    end: "</r>".into()
                }),
                "partial",
                true
            ),
            "<r>partial"
        );
        assert_eq!(
            apply(&think(TagAction::Passthrough), "partial", true),
            "<think>partial"
        );
    }

    #[test]
    fn test_buffered_chat_completion_rewritten() {
        let body = br#"{"id":"cmpl-1","object":"chat.completion","choices":[{"index":0,"message":{"role":"assistant","content":"<think>plan</think>Answer"},"finish_reason":"stop"}],"usage":{"total_tokens":7}}"#;

        let out = rewrite_buffered_body(body, &rules(TagAction::Strip)).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(
            text,
            r#"{"id":"cmpl-1","object":"chat.completion","choices":[{"index":0,"message":{"role":"assistant","content":"Answer"},"finish_reason":"stop"}],"usage":{"total_tokens":7}}"#
        );
    }

    #[test]
    fn test_buffered_choices_rewritten_independently() {
        let body = br#"{"choices":[{"index":0,"message":{"content":"<think>a"}},{"index":1,"message":{"content":"</think>b"}}]}"#;

        let out = rewrite_buffered_body(body, &rules(TagAction::Strip)).unwrap();
        let json: Value = serde_json::from_slice(&out).unwrap();

        // Choice 0 is truncated inside the tag; choice 1 never opened one
        assert_eq!(json["choices"][0]["message"]["content"], "");
        assert_eq!(json["choices"][1]["message"]["content"], "</think>b");
    }

    #[test]
    fn test_buffered_legacy_text_field() {
        let body = br#"{"choices":[{"index":0,"text":"x<think>y</think>z"}]}"#;
        let out = rewrite_buffered_body(body, &rules(TagAction::Strip)).unwrap();
        let json: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(json["choices"][0]["text"], "xz");
    }

    #[test]
    fn test_buffered_plain_text_body() {
        let out = rewrite_buffered_body(
            b"Visible <think>secret thoughts</think> content.",
            &rules(TagAction::Strip),
        )
        .unwrap();
        assert_eq!(out, b"Visible  content.");
    }

    #[test]
    fn test_buffered_body_keeps_other_bytes() {
        let body = br#"{ "id": "cmpl-1",
  "choices": [ { "index": 0, "message": { "content": "<think>x</think>Hi", "logprob": 1e-05 } } ],
  "usage": { "cost": 1.50 } }"#;

        let out = rewrite_buffered_body(body, &rules(TagAction::Strip)).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"{ "id": "cmpl-1",
  "choices": [ { "index": 0, "message": { "content": "Hi", "logprob": 1e-05 } } ],
  "usage": { "cost": 1.50 } }"#
        );
    }

    #[test]
    fn test_buffered_unchanged_returns_none() {
        let body = br#"{"choices":[{"message":{"content":"no tags here"}}]}"#;
        assert!(rewrite_buffered_body(body, &rules(TagAction::Strip)).is_none());
        assert!(rewrite_buffered_body(br#"{"error":"nope"}"#, &rules(TagAction::Strip)).is_none());
        assert!(rewrite_buffered_body(b"<think>x</think>", &Arc::from(Vec::new())).is_none());
        // JSON, but not a completion
        assert!(rewrite_buffered_body(br#""<think>x</think>""#, &rules(TagAction::Strip)).is_none());
    }
}
