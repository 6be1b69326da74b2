//! Generation parameter overrides
//!
//! A route can pin sampling parameters regardless of what the client asked
//! for (`set_always`), or fill in defaults the client did not send
//! (`set_if_absent`).
//!
//! # Example Config
//!
//! ```toml
//! [[routes.overrides]]
//! key = "temperature"
//! value = 0.6
//!
//! [[routes.overrides]]
//! key = "top_k"
//! value = 20
//! mode = "set_if_absent"
//! ```

use super::{RequestTransformer, TransformContext, TransformResult};
use serde::Deserialize;
use serde_json::Value;

/// When an override is written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideMode {
    /// Overwrite whatever the client sent
    #[default]
    SetAlways,
    /// Write only when the client request does not carry the key
    SetIfAbsent,
}

impl OverrideMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SetAlways => "set_always",
            Self::SetIfAbsent => "set_if_absent",
        }
    }
}

/// A single top-level request field override
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ParamOverride {
    pub key: String,
    pub value: Value,
    #[serde(default)]
    pub mode: OverrideMode,
}

/// Applies a route's overrides in declaration order
pub struct ParamOverrides {
    overrides: Vec<ParamOverride>,
}

impl ParamOverrides {
    pub fn new(overrides: Vec<ParamOverride>) -> Self {
        Self { overrides }
    }
}

impl RequestTransformer for ParamOverrides {
    fn name(&self) -> &'static str {
        "param-overrides"
    }

    fn should_apply(&self, _ctx: &TransformContext) -> bool {
        !self.overrides.is_empty()
    }

    fn transform(&self, body: &Value, _ctx: &TransformContext) -> TransformResult {
        let Some(original) = body.as_object() else {
            return TransformResult::Unchanged;
        };

        let mut out = original.clone();
        let mut changed = false;

        for o in &self.overrides {
            // Presence is judged on the incoming request; an explicit null counts
            if o.mode == OverrideMode::SetIfAbsent && original.contains_key(&o.key) {
                continue;
            }
            if out.get(&o.key) != Some(&o.value) {
                changed = true;
            }
            out.insert(o.key.clone(), o.value.clone());
        }

        if changed {
            TransformResult::Modified(Value::Object(out))
        } else {
            TransformResult::Unchanged
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ov(key: &str, value: Value, mode: OverrideMode) -> ParamOverride {
        ParamOverride {
            key: key.to_string(),
            value,
            mode,
        }
    }

    fn apply(overrides: Vec<ParamOverride>, body: Value) -> Value {
        let ctx = TransformContext::new("/v1/chat/completions", None, None);
        match ParamOverrides::new(overrides).transform(&body, &ctx) {
            TransformResult::Modified(body) => body,
            TransformResult::Unchanged => body,
            TransformResult::Error(e) => panic!("unexpected error: {}", e),
        }
    }

    #[test]
    fn test_set_always_overwrites() {
        let out = apply(
            vec![ov("temperature", json!(0.6), OverrideMode::SetAlways)],
            json!({"model": "m", "temperature": 1.0}),
        );
        assert_eq!(out, json!({"model": "m", "temperature": 0.6}));
    }

    #[test]
    fn test_set_if_absent_respects_client() {
        let overrides = vec![
            ov("temperature", json!(0.6), OverrideMode::SetIfAbsent),
            ov("top_k", json!(20), OverrideMode::SetIfAbsent),
        ];
        let out = apply(overrides, json!({"temperature": 1.0, "custom": {"x": 1}}));
        assert_eq!(out, json!({"temperature": 1.0, "custom": {"x": 1}, "top_k": 20}));
    }

    #[test]
    fn test_explicit_null_counts_as_present() {
        let out = apply(
            vec![ov("top_p", json!(0.9), OverrideMode::SetIfAbsent)],
            json!({"top_p": null}),
        );
        assert_eq!(out, json!({"top_p": null}));
    }

    #[test]
    fn test_declaration_order_last_write_wins() {
        let overrides = vec![
            ov("max_tokens", json!(100), OverrideMode::SetAlways),
            ov("max_tokens", json!(200), OverrideMode::SetAlways),
        ];
        assert_eq!(apply(overrides, json!({}))["max_tokens"], json!(200));
    }

    #[test]
    fn test_if_absent_checks_original_not_earlier_override() {
        // The first override adds the key; the second still sees it as absent
        let overrides = vec![
            ov("seed", json!(1), OverrideMode::SetAlways),
            ov("seed", json!(2), OverrideMode::SetIfAbsent),
        ];
        assert_eq!(apply(overrides, json!({}))["seed"], json!(2));
    }

    #[test]
    fn test_non_object_body_unchanged() {
        let ctx = TransformContext::new("/", None, None);
        let overrides = ParamOverrides::new(vec![ov("a", json!(1), OverrideMode::SetAlways)]);
        assert!(matches!(
            overrides.transform(&json!([1, 2]), &ctx),
            TransformResult::Unchanged
        ));
    }

    #[test]
    fn test_mode_parses_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            overrides: Vec<ParamOverride>,
        }
        let parsed: Wrapper = toml::from_str(
            r#"
            [[overrides]]
            key = "temperature"
            value = 0.6

            [[overrides]]
            key = "stop"
            value = ["</answer>"]
            mode = "set_if_absent"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.overrides[0].mode, OverrideMode::SetAlways);
        assert_eq!(parsed.overrides[1].mode, OverrideMode::SetIfAbsent);
        assert_eq!(parsed.overrides[1].value, json!(["</answer>"]));
    }
}
