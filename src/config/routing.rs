//! Route configuration
//!
//! Each `[[routes]]` table selects requests by path prefix, model pattern and
//! model label, and says where they go and how they are rewritten on the way.
//!
//! ```toml
//! [[routes]]
//! name = "qwq-thinking"
//! model = "^qwq"
//! label = "think"
//! target = "http://127.0.0.1:8000"
//! upstream_model = "Qwen/QwQ-32B"
//!
//! logit_bias = { "151649" = -100 }
//!
//! [[routes.overrides]]
//! key = "temperature"
//! value = 0.6
//!
//! [[routes.tags]]
//! begin = "<think>"
//! end = "</think>"
//! action = "rename"
//! rename_begin = "<reasoning>"
//! rename_end = "</reasoning>"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;

use crate::proxy::rewrite::{TagAction, TagRule};
use crate::proxy::transformation::ParamOverride;

/// Backend used when nothing else is configured
pub const FALLBACK_TARGET: &str = "http://127.0.0.1:8000";

// ─────────────────────────────────────────────────────────────────────────────
// Tag Rules
// ─────────────────────────────────────────────────────────────────────────────

/// `action` values of a `[[routes.tags]]` table
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagActionKind {
    #[default]
    Strip,
    Replace,
    Rename,
    Passthrough,
}

/// Tag rule as loaded from file
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileTagRule {
    pub begin: String,
    pub end: String,
    #[serde(default)]
    pub action: TagActionKind,
    pub replacement: Option<String>,
    pub rename_begin: Option<String>,
    pub rename_end: Option<String>,
}

impl FileTagRule {
    fn into_rule(self) -> Result<TagRule> {
        if self.begin.is_empty() || self.end.is_empty() {
            bail!("tag delimiters must not be empty");
        }
        if self.begin == self.end {
            bail!("tag begin and end are both {:?}", self.begin);
        }

        let action = match self.action {
            TagActionKind::Strip => TagAction::Strip,
            TagActionKind::Passthrough => TagAction::Passthrough,
            TagActionKind::Replace => TagAction::Replace(
                self.replacement
                    .with_context(|| format!("tag {:?}: action \"replace\" needs `replacement`", self.begin))?,
            ),
            TagActionKind::Rename => match (self.rename_begin, self.rename_end) {
                (Some(begin), Some(end)) => TagAction::Rename { begin, end },
                _ => bail!(
                    "tag {:?}: action \"rename\" needs `rename_begin` and `rename_end`",
                    self.begin
                ),
            },
        };

        Ok(TagRule::new(self.begin, self.end, action))
    }
}

/// `<think>` … `</think>` stripped: what reasoning models emit by default
pub fn default_tag_rules() -> Vec<TagRule> {
    vec![TagRule::new("<think>", "</think>", TagAction::Strip)]
}

/// Reject rule sets the matcher could not resolve deterministically
pub fn validate_tag_rules(rules: &[TagRule]) -> Result<()> {
    for (i, a) in rules.iter().enumerate() {
        for b in &rules[i + 1..] {
            if a.begin == b.begin {
                bail!("begin delimiter {:?} is declared twice", a.begin);
            }
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Routes
// ─────────────────────────────────────────────────────────────────────────────

/// Route as loaded from file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileRoute {
    pub name: Option<String>,
    pub path_prefix: Option<String>,
    pub model: Option<String>,
    pub label: Option<String>,
    pub target: Option<String>,
    pub upstream_model: Option<String>,
    pub system_prompt: Option<String>,
    pub system_prompt_file: Option<String>,
    pub append_to_last_user: Option<String>,
    #[serde(default)]
    pub overrides: Vec<ParamOverride>,
    /// Token id -> bias, merged under the client's own `logit_bias`
    #[serde(default)]
    pub logit_bias: Map<String, Value>,
    /// Absent means the default rule set; `tags = []` means no rewriting
    pub tags: Option<Vec<FileTagRule>>,
}

/// A validated route
#[derive(Debug, Clone, Default)]
pub struct RouteConfig {
    pub name: String,
    pub path_prefix: Option<String>,
    /// Regex matched against the model name (label removed)
    pub model: Option<String>,
    pub label: Option<String>,
    pub target: String,
    pub upstream_model: Option<String>,
    /// Inline prompt, or the contents of `system_prompt_file`
    pub system_prompt: Option<String>,
    pub append_to_last_user: Option<String>,
    pub overrides: Vec<ParamOverride>,
    pub logit_bias: Map<String, Value>,
    pub tags: Vec<TagRule>,
}

impl RouteConfig {
    /// Catch-all route to `target` with the default tag rules
    pub fn catch_all(target: impl Into<String>) -> Self {
        Self {
            name: "default".to_string(),
            target: target.into(),
            tags: default_tag_rules(),
            ..Self::default()
        }
    }

    /// Validate a file route
    ///
    /// `base_dir` resolves a relative `system_prompt_file` (the directory of
    /// the config file).
    pub fn from_file(
        file: FileRoute,
        index: usize,
        default_target: Option<&str>,
        base_dir: Option<&Path>,
    ) -> Result<Self> {
        let name = file.name.unwrap_or_else(|| format!("route-{}", index + 1));
        let ctx = || format!("route {:?}", name);

        let target = file
            .target
            .or_else(|| default_target.map(String::from))
            .with_context(|| format!("{}: no `target` and no `default_target`", ctx()))?;
        validate_target(&target).with_context(ctx)?;

        if let Some(pattern) = &file.model {
            regex::Regex::new(pattern)
                .with_context(|| format!("{}: invalid model pattern {:?}", ctx(), pattern))?;
        }

        let system_prompt = match (file.system_prompt, file.system_prompt_file) {
            (Some(_), Some(_)) => {
                bail!("{}: set either `system_prompt` or `system_prompt_file`, not both", ctx())
            }
            (Some(prompt), None) => Some(prompt),
            (None, Some(path)) => Some(read_prompt_file(&path, base_dir).with_context(ctx)?),
            (None, None) => None,
        };

        if let Some((token, _)) = file.logit_bias.iter().find(|(_, bias)| !bias.is_number()) {
            bail!("{}: logit_bias for token {:?} must be a number", ctx(), token);
        }

        let tags = match file.tags {
            None => default_tag_rules(),
            Some(tags) => tags
                .into_iter()
                .map(FileTagRule::into_rule)
                .collect::<Result<Vec<_>>>()
                .with_context(ctx)?,
        };
        validate_tag_rules(&tags).with_context(ctx)?;

        Ok(Self {
            name,
            path_prefix: file.path_prefix,
            model: file.model,
            label: file.label,
            target: target.trim_end_matches('/').to_string(),
            upstream_model: file.upstream_model,
            system_prompt,
            append_to_last_user: file.append_to_last_user,
            overrides: file.overrides,
            logit_bias: file.logit_bias,
            tags,
        })
    }
}

/// Targets must be absolute http(s) base URLs
pub fn validate_target(target: &str) -> Result<()> {
    let rest = target
        .strip_prefix("http://")
        .or_else(|| target.strip_prefix("https://"))
        .with_context(|| format!("target {:?} must start with http:// or https://", target))?;
    if rest.is_empty() || rest.starts_with('/') {
        bail!("target {:?} has no host", target);
    }
    Ok(())
}

fn read_prompt_file(path: &str, base_dir: Option<&Path>) -> Result<String> {
    let path = Path::new(path);
    let path = match base_dir {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    };
    let prompt = std::fs::read_to_string(&path)
        .with_context(|| format!("cannot read system prompt file {}", path.display()))?;
    Ok(prompt.trim_end().to_string())
}
