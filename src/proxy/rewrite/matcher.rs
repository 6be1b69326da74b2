//! Incremental delimiter matcher
//!
//! [`TagScanner`] is fed successive pieces of content text and emits the
//! rewritten text as early as it safely can. The only thing it ever holds back
//! is a short tail that might turn out to be the start of a delimiter, so a
//! delimiter split across any number of chunks is still detected while memory
//! stays bounded by the longest delimiter of the route.
//!
//! One scanner belongs to exactly one content stream of one response. It is
//! never shared between sessions.

use std::sync::Arc;

use super::TagRule;

/// Where the scanner currently is relative to tagged regions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Looking for any begin delimiter
    Outside,
    /// Inside the region opened by `rules[idx]`, looking for its end delimiter
    Inside(usize),
}

/// Result of one `feed` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutput {
    /// Rewritten text that is safe to send now
    pub emit: String,
    /// Whether at least one region opened or closed during this call
    pub state_changed: bool,
}

/// Streaming tag matcher for a single content stream
#[derive(Debug, Clone)]
pub struct TagScanner {
    rules: Arc<[TagRule]>,
    mode: ScanMode,
    pending: String,
    max_delimiter: usize,
}

impl TagScanner {
    pub fn new(rules: Arc<[TagRule]>) -> Self {
        let max_delimiter = rules
            .iter()
            .map(TagRule::max_delimiter_len)
            .max()
            .unwrap_or(0);

        Self {
            rules,
            mode: ScanMode::Outside,
            pending: String::new(),
            max_delimiter,
        }
    }

    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    /// Bytes currently held back as a possible delimiter prefix
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Feed the next piece of content
    pub fn feed(&mut self, chunk: &str) -> ScanOutput {
        let mut buf = std::mem::take(&mut self.pending);
        buf.push_str(chunk);
        let out = self.scan(&buf, false);

        debug_assert!(
            self.pending.is_empty() || self.pending.len() < self.max_delimiter,
            "pending tail must stay shorter than the longest delimiter"
        );
        out
    }

    /// Finish the stream and return whatever is still owed to the client
    ///
    /// A region that never closed is ended as truncated (see
    /// [`TagRule::close_text`]). The scanner is back to `Outside` afterwards.
    pub fn flush(&mut self) -> String {
        let buf = std::mem::take(&mut self.pending);
        let mut out = self.scan(&buf, true).emit;

        if let ScanMode::Inside(idx) = self.mode {
            let rule = &self.rules[idx];
            tracing::debug!(
                begin = %rule.begin,
                action = rule.action.name(),
                "Stream ended inside tagged region"
            );
            out.push_str(rule.close_text(true));
            self.mode = ScanMode::Outside;
        }

        out
    }

    /// Scan `buf` from the current mode until it is exhausted
    ///
    /// With `at_end` set nothing is held back: no more input can complete a
    /// partial delimiter.
    fn scan(&mut self, buf: &str, at_end: bool) -> ScanOutput {
        let rules = Arc::clone(&self.rules);
        let mut out = ScanOutput::default();
        let mut rest = buf;

        loop {
            match self.mode {
                ScanMode::Outside => {
                    let hit = find_begin(&rules, rest);
                    let hold = if at_end {
                        None
                    } else {
                        partial_start(rest, rules.iter().map(|r| r.begin.as_str()))
                    };

                    match hit {
                        Some((pos, idx)) if hold.map_or(true, |h| pos < h) => {
                            let rule = &rules[idx];
                            out.emit.push_str(&rest[..pos]);
                            out.emit.push_str(rule.open_text());
                            rest = &rest[pos + rule.begin.len()..];
                            self.mode = ScanMode::Inside(idx);
                            out.state_changed = true;
                        }
                        _ => {
                            let cut = hold.unwrap_or(rest.len());
                            out.emit.push_str(&rest[..cut]);
                            self.pending = rest[cut..].to_string();
                            return out;
                        }
                    }
                }
                ScanMode::Inside(idx) => {
                    let rule = &rules[idx];
                    let hit = rest.find(rule.end.as_str());
                    let hold = if at_end {
                        None
                    } else {
                        partial_start(rest, std::iter::once(rule.end.as_str()))
                    };

                    match hit {
                        Some(pos) if hold.map_or(true, |h| pos < h) => {
                            out.emit.push_str(rule.inner_text(&rest[..pos]));
                            out.emit.push_str(rule.close_text(false));
                            rest = &rest[pos + rule.end.len()..];
                            self.mode = ScanMode::Outside;
                            out.state_changed = true;
                        }
                        _ => {
                            let cut = hold.unwrap_or(rest.len());
                            out.emit.push_str(rule.inner_text(&rest[..cut]));
                            self.pending = rest[cut..].to_string();
                            return out;
                        }
                    }
                }
            }
        }
    }
}

/// Earliest begin delimiter in `text`; at equal positions the longest wins
fn find_begin(rules: &[TagRule], text: &str) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize)> = None;

    for (idx, rule) in rules.iter().enumerate() {
        let Some(pos) = text.find(rule.begin.as_str()) else {
            continue;
        };
        best = match best {
            Some((best_pos, best_idx))
                if best_pos < pos
                    || (best_pos == pos && rules[best_idx].begin.len() >= rule.begin.len()) =>
            {
                Some((best_pos, best_idx))
            }
            _ => Some((pos, idx)),
        };
    }

    best
}

/// Start of the longest suffix of `text` that is a proper prefix of a delimiter
///
/// Everything before the returned offset can be emitted; the suffix must wait
/// for more input.
fn partial_start<'a>(text: &str, delimiters: impl Iterator<Item = &'a str> + Clone) -> Option<usize> {
    let longest = delimiters.clone().map(str::len).max()?;
    let lowest = text.len().saturating_sub(longest.saturating_sub(1));

    (lowest..text.len())
        .filter(|&start| text.is_char_boundary(start))
        .find(|&start| {
            let tail = &text[start..];
            delimiters
                .clone()
                .any(|d| d.len() > tail.len() && d.starts_with(tail))
        })
}

// ============================================================================
// Tests
// ============================================================================
