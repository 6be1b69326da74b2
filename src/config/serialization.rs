//! Config serialization to TOML
//!
//! Single source of truth for the config file format: the first-run template
//! and `config --show` are both rendered here.

use serde_json::Value;

use super::{Config, RouteConfig};
use crate::proxy::rewrite::TagAction;

impl Config {
    /// Render the configuration as a commented TOML file
    pub fn to_toml(&self) -> String {
        let mut out = String::new();

        out.push_str("# reasoning-relay configuration\n");
        out.push_str("# Precedence: command-line flags > environment variables > this file > defaults\n\n");

        out.push_str("# Address to listen on (env: RELAY_BIND)\n");
        out.push_str(&format!("bind_addr = {}\n", quote(&self.bind_addr.to_string())));
        out.push_str("# Connect + send + response headers, in seconds\n");
        out.push_str(&format!("upstream_timeout_secs = {}\n", self.upstream_timeout.as_secs()));
        out.push_str("# Longest silence between two response chunks, in seconds\n");
        out.push_str(&format!("read_timeout_secs = {}\n", self.read_timeout.as_secs()));
        out.push_str("# Largest request or buffered response body, in bytes\n");
        out.push_str(&format!("max_body_bytes = {}\n", self.max_body_bytes));
        out.push_str("# Longer SSE frames are relayed without tag rewriting\n");
        out.push_str(&format!("max_frame_bytes = {}\n", self.max_frame_bytes));
        out.push_str(&format!("relay_buffer = {}\n", self.relay_buffer));
        out.push_str("# Catch-all backend appended after [[routes]] (env: RELAY_TARGET_URL)\n");
        match &self.default_target {
            Some(target) => out.push_str(&format!("default_target = {}\n", quote(target))),
            None => out.push_str("# default_target = \"http://127.0.0.1:8000\"\n"),
        }

        out.push_str("\n[logging]\n");
        out.push_str(&format!("level = {}\n", quote(&self.logging.level)));
        out.push_str(&format!("file_enabled = {}\n", self.logging.file_enabled));
        out.push_str(&format!(
            "file_dir = {}\n",
            quote(&self.logging.file_dir.display().to_string())
        ));
        out.push_str(&format!(
            "file_rotation = {}  # hourly, daily, never\n",
            quote(self.logging.file_rotation.as_str())
        ));
        out.push_str(&format!("file_prefix = {}\n", quote(&self.logging.file_prefix)));

        if self.routes.is_empty() {
            out.push_str(EXAMPLE_ROUTES);
        } else {
            for route in &self.routes {
                out.push('\n');
                out.push_str(&route_to_toml(route));
            }
        }

        out
    }
}

fn route_to_toml(route: &RouteConfig) -> String {
    let mut out = String::from("[[routes]]\n");

    out.push_str(&format!("name = {}\n", quote(&route.name)));
    let optional = [
        ("path_prefix", &route.path_prefix),
        ("model", &route.model),
        ("label", &route.label),
        ("upstream_model", &route.upstream_model),
        ("system_prompt", &route.system_prompt),
        ("append_to_last_user", &route.append_to_last_user),
    ];
    out.push_str(&format!("target = {}\n", quote(&route.target)));
    for (key, value) in optional {
        if let Some(value) = value {
            out.push_str(&format!("{} = {}\n", key, quote(value)));
        }
    }
    if !route.logit_bias.is_empty() {
        if let Some(biases) = inline_value(&Value::Object(route.logit_bias.clone())) {
            out.push_str(&format!("logit_bias = {}\n", biases));
        }
    }
    if route.tags.is_empty() {
        out.push_str("tags = []\n");
    }

    for o in &route.overrides {
        out.push_str("\n[[routes.overrides]]\n");
        out.push_str(&format!("key = {}\n", quote(&o.key)));
        match inline_value(&o.value) {
            Some(value) => out.push_str(&format!("value = {}\n", value)),
            None => out.push_str("# value = null (not representable in TOML)\n"),
        }
        out.push_str(&format!("mode = {}\n", quote(o.mode.as_str())));
    }

    for rule in &route.tags {
        out.push_str("\n[[routes.tags]]\n");
        out.push_str(&format!("begin = {}\n", quote(&rule.begin)));
        out.push_str(&format!("end = {}\n", quote(&rule.end)));
        out.push_str(&format!("action = {}\n", quote(rule.action.name())));
        match &rule.action {
            TagAction::Replace(literal) => {
                out.push_str(&format!("replacement = {}\n", quote(literal)));
            }
            TagAction::Rename { begin, end } => {
                out.push_str(&format!("rename_begin = {}\n", quote(begin)));
                out.push_str(&format!("rename_end = {}\n", quote(end)));
            }
            TagAction::Strip | TagAction::Passthrough => {}
        }
    }

    out
}

/// TOML basic string (JSON escapes are a subset of TOML's)
fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s))
}

/// JSON value as a TOML inline value; `null` has no TOML form
fn inline_value(value: &Value) -> Option<String> {
    Some(match value {
        Value::Null => return None,
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        Value::Array(items) => {
            let items = items.iter().map(inline_value).collect::<Option<Vec<_>>>()?;
            format!("[{}]", items.join(", "))
        }
        Value::Object(map) => {
            let fields = map
                .iter()
                .map(|(k, v)| Some(format!("{} = {}", quote(k), inline_value(v)?)))
                .collect::<Option<Vec<_>>>()?;
            format!("{{ {} }}", fields.join(", "))
        }
    })
}

const EXAMPLE_ROUTES: &str = r#"
# Routes are tried in order; the first match wins. Without any route every
# request goes to default_target (or http://127.0.0.1:8000) with <think>
# blocks stripped from responses.
#
# [[routes]]
# name = "qwq-thinking"
# path_prefix = "/v1/chat/completions"
# model = "^qwq"                 # regex on the model name
# label = "think"                # matches requests for "qwq@think"
# target = "http://127.0.0.1:8000"
# upstream_model = "Qwen/QwQ-32B"
# system_prompt_file = "prompts/qwq.txt"
# append_to_last_user = ""
# logit_bias = { "151649" = -100 }   # only tokens the client did not bias
#
# [[routes.overrides]]
# key = "temperature"
# value = 0.6                    # mode = "set_always" (default) or "set_if_absent"
#
# [[routes.tags]]
# begin = "<think>"
# end = "</think>"
# action = "strip"               # strip, replace, rename, passthrough
"#;
