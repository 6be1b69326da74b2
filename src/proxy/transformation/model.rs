//! Model name rewriting
//!
//! Clients select routes with pseudo-model names like `qwq@think`. The backend
//! only knows the base name, so the label is removed before forwarding, or
//! the whole name is swapped for the route's `upstream_model`.

use super::{RequestTransformer, TransformContext, TransformResult};
use serde_json::Value;

pub struct ModelRewrite {
    upstream_model: Option<String>,
}

impl ModelRewrite {
    pub fn new(upstream_model: Option<String>) -> Self {
        Self { upstream_model }
    }
}

impl RequestTransformer for ModelRewrite {
    fn name(&self) -> &'static str {
        "model-rewrite"
    }

    fn should_apply(&self, ctx: &TransformContext) -> bool {
        ctx.model.is_some()
    }

    fn transform(&self, body: &Value, ctx: &TransformContext) -> TransformResult {
        let Some(target) = self.upstream_model.as_deref().or(ctx.model) else {
            return TransformResult::Unchanged;
        };
        if body.get("model").and_then(Value::as_str) == Some(target) {
            return TransformResult::Unchanged;
        }

        let mut body = body.clone();
        let Some(obj) = body.as_object_mut() else {
            return TransformResult::Unchanged;
        };
        obj.insert("model".to_string(), Value::String(target.to_string()));

        tracing::debug!(model = %target, label = ?ctx.label, "Rewrote model name");
        TransformResult::Modified(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_label_is_stripped() {
        let rewrite = ModelRewrite::new(None);
        let ctx = TransformContext::new("/v1/chat/completions", Some("qwq"), Some("think"));

        match rewrite.transform(&json!({"model": "qwq@think", "stream": true}), &ctx) {
            TransformResult::Modified(body) => {
                assert_eq!(body, json!({"model": "qwq", "stream": true}));
            }
            other => panic!("Expected Modified, got {:?}", other),
        }
    }

    #[test]
    fn test_upstream_model_replaces_name() {
        let rewrite = ModelRewrite::new(Some("Qwen/QwQ-32B".to_string()));
        let ctx = TransformContext::new("/v1/chat/completions", Some("qwq"), None);

        match rewrite.transform(&json!({"model": "qwq"}), &ctx) {
            TransformResult::Modified(body) => assert_eq!(body["model"], "Qwen/QwQ-32B"),
            other => panic!("Expected Modified, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_model_unchanged() {
        let rewrite = ModelRewrite::new(None);
        let ctx = TransformContext::new("/v1/chat/completions", Some("qwq"), None);

        assert!(matches!(
            rewrite.transform(&json!({"model": "qwq"}), &ctx),
            TransformResult::Unchanged
        ));
        assert!(!rewrite.should_apply(&TransformContext::new("/v1/models", None, None)));
    }
}
