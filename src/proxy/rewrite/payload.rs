//! In-place content edits of completion payloads
//!
//! Only the content string of a choice is ever rewritten. The payload is
//! parsed into borrowed [`RawValue`] views so every content string is known by
//! its byte span, and a rewrite splices a new JSON string into that span. All
//! other bytes (spacing, number spelling, key order, unknown fields) go out as
//! they came in.

use std::ops::Range;

use serde::Deserialize;
use serde_json::value::RawValue;

use super::ContentField;

#[derive(Deserialize)]
struct PayloadView<'a> {
    #[serde(borrow)]
    choices: Option<Vec<&'a RawValue>>,
}

#[derive(Debug, Deserialize)]
struct ChoiceView<'a> {
    #[serde(borrow)]
    index: Option<&'a RawValue>,
    #[serde(borrow)]
    delta: Option<&'a RawValue>,
    #[serde(borrow)]
    message: Option<&'a RawValue>,
    #[serde(borrow)]
    text: Option<&'a RawValue>,
}

#[derive(Debug, Deserialize)]
struct MessageView<'a> {
    #[serde(borrow)]
    content: Option<&'a RawValue>,
}

/// A content string found in a payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentSlot {
    /// Byte range of the JSON string literal, quotes included
    pub span: Range<usize>,
    /// Decoded string value
    pub text: String,
}

/// One element of `choices`, borrowed from the payload
#[derive(Debug)]
pub struct ChoiceRef<'a> {
    base: &'a str,
    position: usize,
    view: ChoiceView<'a>,
}

impl ChoiceRef<'_> {
    /// `index` of the choice, falling back to its position in the array
    pub fn index(&self) -> u64 {
        self.view
            .index
            .and_then(|raw| serde_json::from_str::<u64>(raw.get()).ok())
            .unwrap_or(self.position as u64)
    }

    /// Content string held in `field`, if it is a string
    pub fn content(&self, field: ContentField) -> Option<ContentSlot> {
        let raw = match field {
            ContentField::Delta => nested_content(self.view.delta?)?,
            ContentField::Message => nested_content(self.view.message?)?,
            ContentField::Text => self.view.text?,
        };
        let text = serde_json::from_str::<String>(raw.get()).ok()?;
        Some(ContentSlot {
            span: span_of(self.base, raw.get()),
            text,
        })
    }

    /// First of `candidates` that holds a content string
    pub fn locate(&self, candidates: &[ContentField]) -> Option<ContentField> {
        candidates
            .iter()
            .copied()
            .find(|field| self.content(*field).is_some())
    }
}

fn nested_content(raw: &RawValue) -> Option<&RawValue> {
    serde_json::from_str::<MessageView>(raw.get()).ok()?.content
}

/// Byte range of `part` inside `base`
///
/// Borrowed raw values are slices of the text they were parsed from, so the
/// offset falls out of the pointers.
fn span_of(base: &str, part: &str) -> Range<usize> {
    let start = part.as_ptr() as usize - base.as_ptr() as usize;
    start..start + part.len()
}

/// Borrowed views of every object in the payload's `choices` array
///
/// `Ok(None)` when the payload is a JSON object without `choices`. Errors are
/// either syntax errors (not JSON) or data errors (JSON of another shape);
/// callers tell them apart with [`serde_json::Error::is_data`].
pub fn choices(payload: &str) -> Result<Option<Vec<ChoiceRef<'_>>>, serde_json::Error> {
    let view: PayloadView = serde_json::from_str(payload)?;
    let Some(raw_choices) = view.choices else {
        return Ok(None);
    };

    let choices = raw_choices
        .into_iter()
        .enumerate()
        .filter_map(|(position, raw)| {
            let view = serde_json::from_str::<ChoiceView>(raw.get()).ok()?;
            Some(ChoiceRef {
                base: payload,
                position,
                view,
            })
        })
        .collect();
    Ok(Some(choices))
}

/// Replace the given spans of `payload` with JSON string literals of the new text
pub fn splice(payload: &str, mut edits: Vec<(Range<usize>, String)>) -> Option<String> {
    edits.sort_by_key(|(span, _)| span.start);

    let mut out = String::with_capacity(payload.len());
    let mut cursor = 0;
    for (span, text) in edits {
        if span.start < cursor || span.end > payload.len() {
            return None;
        }
        out.push_str(payload.get(cursor..span.start)?);
        out.push_str(&serde_json::to_string(&text).ok()?);
        cursor = span.end;
    }
    out.push_str(payload.get(cursor..)?);
    Some(out)
}
