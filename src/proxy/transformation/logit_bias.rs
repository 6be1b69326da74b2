//! Weak logit bias
//!
//! A route can carry default token biases (e.g. to push a model away from
//! emitting a stray `</think>`). They are merged into the request's
//! `logit_bias` entry by entry: a token the client already biased keeps the
//! client's value.
//!
//! ```toml
//! [[routes]]
//! logit_bias = { "151649" = -100 }
//! ```

use super::{RequestTransformer, TransformContext, TransformResult};
use serde_json::{Map, Value};

pub struct WeakLogitBias {
    biases: Map<String, Value>,
}

impl WeakLogitBias {
    pub fn new(biases: Map<String, Value>) -> Self {
        Self { biases }
    }
}

impl RequestTransformer for WeakLogitBias {
    fn name(&self) -> &'static str {
        "weak-logit-bias"
    }

    fn should_apply(&self, _ctx: &TransformContext) -> bool {
        !self.biases.is_empty()
    }

    fn transform(&self, body: &Value, _ctx: &TransformContext) -> TransformResult {
        let mut body = body.clone();
        let Some(obj) = body.as_object_mut() else {
            return TransformResult::Unchanged;
        };

        let slot = obj
            .entry("logit_bias")
            .or_insert_with(|| Value::Object(Map::new()));
        if slot.is_null() {
            *slot = Value::Object(Map::new());
        }
        let Some(client) = slot.as_object_mut() else {
            return TransformResult::Error(anyhow::anyhow!("`logit_bias` is not an object"));
        };

        let mut added = 0;
        for (token, bias) in &self.biases {
            if !client.contains_key(token) {
                client.insert(token.clone(), bias.clone());
                added += 1;
            }
        }

        if added == 0 {
            return TransformResult::Unchanged;
        }
        tracing::debug!(added, "Merged route logit bias");
        TransformResult::Modified(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bias(entries: Value) -> WeakLogitBias {
        match entries {
            Value::Object(map) => WeakLogitBias::new(map),
            _ => unreachable!(),
        }
    }

    fn ctx() -> TransformContext<'static> {
        TransformContext::new("/v1/chat/completions", Some("m"), None)
    }

    #[test]
    fn test_bias_added_when_client_sent_none() {
        let t = bias(json!({"151649": -100, "42": 5}));
        for body in [json!({"model": "m"}), json!({"model": "m", "logit_bias": null})] {
            let TransformResult::Modified(out) = t.transform(&body, &ctx()) else {
                panic!("expected Modified");
            };
            assert_eq!(out["logit_bias"], json!({"151649": -100, "42": 5}));
        }
    }

    #[test]
    fn test_client_entries_win() {
        let t = bias(json!({"151649": -100, "42": 5}));
        let body = json!({"logit_bias": {"42": 0, "7": 1}});

        let TransformResult::Modified(out) = t.transform(&body, &ctx()) else {
            panic!("expected Modified");
        };
        assert_eq!(out["logit_bias"], json!({"42": 0, "7": 1, "151649": -100}));
    }

    #[test]
    fn test_fully_covered_request_unchanged() {
        let t = bias(json!({"42": 5}));
        let body = json!({"logit_bias": {"42": -1}});
        assert!(matches!(t.transform(&body, &ctx()), TransformResult::Unchanged));
    }

    #[test]
    fn test_non_object_logit_bias_is_an_error() {
        let t = bias(json!({"42": 5}));
        assert!(matches!(
            t.transform(&json!({"logit_bias": [1, 2]}), &ctx()),
            TransformResult::Error(_)
        ));
    }
}
