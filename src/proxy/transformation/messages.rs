//! Message edits for chat completion requests
//!
//! - **SystemPromptInjector**: put a route's system prompt in front of the
//!   conversation
//! - **AppendToLastUser**: append fixed text (e.g. `/no_think`) to the final
//!   user message

use super::{RequestTransformer, TransformContext, TransformResult};
use serde_json::{json, Value};

// ============================================================================
// SystemPromptInjector
// ============================================================================

/// Prepends the route's system prompt
///
/// An existing leading system message keeps its content after the prompt,
/// separated by a blank line. Otherwise a new system message is inserted at
/// the front. A conversation left without any user message gets an empty one
/// appended, since chat templates expect a user turn after the system prompt.
pub struct SystemPromptInjector {
    prompt: String,
}

impl SystemPromptInjector {
    pub fn new(prompt: String) -> Self {
        Self { prompt }
    }
}

impl RequestTransformer for SystemPromptInjector {
    fn name(&self) -> &'static str {
        "system-prompt"
    }

    fn should_apply(&self, _ctx: &TransformContext) -> bool {
        !self.prompt.is_empty()
    }

    fn transform(&self, body: &Value, _ctx: &TransformContext) -> TransformResult {
        let mut body = body.clone();
        let Some(obj) = body.as_object_mut() else {
            return TransformResult::Unchanged;
        };

        let messages = obj
            .entry("messages")
            .or_insert_with(|| Value::Array(Vec::new()));
        let Some(messages) = messages.as_array_mut() else {
            return TransformResult::Error(anyhow::anyhow!("`messages` is not an array"));
        };

        let first_is_system = messages
            .first()
            .and_then(|m| m.get("role"))
            .and_then(Value::as_str)
            == Some("system");

        if first_is_system {
            let first = &mut messages[0];
            let content = match first.get("content") {
                Some(Value::String(existing)) => {
                    Value::String(format!("{}\n\n{}", self.prompt, existing))
                }
                Some(Value::Array(parts)) => {
                    let mut parts = parts.clone();
                    parts.insert(0, json!({"type": "text", "text": format!("{}\n\n", self.prompt)}));
                    Value::Array(parts)
                }
                _ => Value::String(self.prompt.clone()),
            };
            first["content"] = content;
            tracing::debug!("Prepended system prompt to existing system message");
        } else {
            messages.insert(0, json!({"role": "system", "content": self.prompt}));
            tracing::debug!("Prepended system prompt to messages");
        }

        let has_user = messages
            .iter()
            .any(|m| m.get("role").and_then(Value::as_str) == Some("user"));
        if !has_user {
            messages.push(json!({"role": "user", "content": ""}));
        }

        TransformResult::Modified(body)
    }
}

// ============================================================================
// AppendToLastUser
// ============================================================================

/// Appends text to the last user message
pub struct AppendToLastUser {
    text: String,
}

impl AppendToLastUser {
    pub fn new(text: String) -> Self {
        Self { text }
    }
}

impl RequestTransformer for AppendToLastUser {
    fn name(&self) -> &'static str {
        "append-to-last-user"
    }

    fn should_apply(&self, _ctx: &TransformContext) -> bool {
        !self.text.is_empty()
    }

    fn transform(&self, body: &Value, _ctx: &TransformContext) -> TransformResult {
        let mut body = body.clone();
        let Some(messages) = body.get_mut("messages").and_then(Value::as_array_mut) else {
            return TransformResult::Unchanged;
        };

        let Some(last_user) = messages
            .iter_mut()
            .rev()
            .find(|m| m.get("role").and_then(Value::as_str) == Some("user"))
        else {
            return TransformResult::Unchanged;
        };

        match last_user.get_mut("content") {
            Some(Value::String(content)) => content.push_str(&self.text),
            Some(Value::Array(parts)) => parts.push(json!({"type": "text", "text": self.text})),
            _ => return TransformResult::Unchanged,
        }

        TransformResult::Modified(body)
    }
}

// ============================================================================
// Tests
// ============================================================================
