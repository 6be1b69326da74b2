//! Configuration tests
//!
//! Parsing and validation of the config file, plus round-trips through
//! `to_toml` so the template and `config --show` stay loadable.

use super::*;
use crate::proxy::rewrite::{TagAction, TagRule};
use crate::proxy::transformation::OverrideMode;
use serde_json::{json, Value};
use std::io::Write;

const FULL_CONFIG: &str = r#"
bind_addr = "0.0.0.0:4000"
upstream_timeout_secs = 5
read_timeout_secs = 60
relay_buffer = 4
default_target = "http://backend:9000/"

[logging]
level = "debug"
file_rotation = "hourly"

[[routes]]
name = "qwq-think"
path_prefix = "/v1/chat"
model = "^qwq"
label = "think"
target = "https://gpu.example.com/"
upstream_model = "Qwen/QwQ-32B"
system_prompt = "Think step by step."
append_to_last_user = " /think"
logit_bias = { "151649" = -100, "42" = 2.5 }

[[routes.overrides]]
key = "temperature"
value = 0.6

[[routes.overrides]]
key = "top_k"
value = 20
mode = "set_if_absent"

[[routes.tags]]
begin = "<think>"
end = "</think>"
action = "rename"
rename_begin = "<reasoning>"
rename_end = "</reasoning>"

[[routes.tags]]
begin = "<scratch>"
end = "</scratch>"
action = "replace"
replacement = "[…]"

[[routes]]
name = "raw"
model = "^llama"
tags = []
"#;

// ─────────────────────────────────────────────────────────────────────────────
// Parsing
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_full_config_parses() {
    let config = Config::from_toml_str(FULL_CONFIG).unwrap();

    assert_eq!(config.bind_addr.to_string(), "0.0.0.0:4000");
    assert_eq!(config.upstream_timeout, Duration::from_secs(5));
    assert_eq!(config.read_timeout, Duration::from_secs(60));
    assert_eq!(config.relay_buffer, 4);
    assert_eq!(config.max_body_bytes, 32 * 1024 * 1024);
    assert_eq!(config.max_frame_bytes, 1024 * 1024);
    assert_eq!(config.default_target.as_deref(), Some("http://backend:9000"));
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.file_rotation, LogRotation::Hourly);

    let think = &config.routes[0];
    assert_eq!(think.name, "qwq-think");
    assert_eq!(think.target, "https://gpu.example.com");
    assert_eq!(think.label.as_deref(), Some("think"));
    assert_eq!(think.system_prompt.as_deref(), Some("Think step by step."));
    assert_eq!(think.overrides.len(), 2);
    assert_eq!(think.overrides[0].mode, OverrideMode::SetAlways);
    assert_eq!(think.overrides[1].mode, OverrideMode::SetIfAbsent);
    assert_eq!(think.overrides[1].value, json!(20));
    assert_eq!(
        Value::Object(think.logit_bias.clone()),
        json!({"151649": -100, "42": 2.5})
    );
    assert_eq!(
        think.tags,
        vec![
            TagRule::new(
                "<think>",
                "</think>",
                TagAction::Rename {
                    begin: "<reasoning>".into(),
                    end: "</reasoning>".into()
                }
            ),
            TagRule::new("<scratch>", "</scratch>", TagAction::Replace("[…]".into())),
        ]
    );

    // No target of its own: inherits default_target
    let raw = &config.routes[1];
    assert_eq!(raw.target, "http://backend:9000");
    assert!(raw.tags.is_empty());
}

#[test]
fn test_missing_tags_get_default_rule() {
    let config = Config::from_toml_str(
        r#"
        [[routes]]
        target = "http://localhost:8000"
        "#,
    )
    .unwrap();

    assert_eq!(config.routes[0].name, "route-1");
    assert_eq!(config.routes[0].tags, default_tag_rules());
}

#[test]
fn test_empty_config_uses_defaults() {
    let config = Config::from_toml_str("").unwrap();
    assert_eq!(config.bind_addr.to_string(), "127.0.0.1:3000");
    assert_eq!(config.upstream_timeout, Duration::from_secs(30));
    assert_eq!(config.read_timeout, Duration::from_secs(120));
    assert!(config.routes.is_empty());
}

#[test]
fn test_effective_routes() {
    let config = Config::from_toml_str("").unwrap();
    let routes = config.effective_routes();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].target, FALLBACK_TARGET);

    let config = Config::from_toml_str(FULL_CONFIG).unwrap();
    let routes = config.effective_routes();
    assert_eq!(routes.len(), 3);
    assert_eq!(routes[2].name, "default");
    assert_eq!(routes[2].target, "http://backend:9000");
    assert!(routes[2].model.is_none() && routes[2].path_prefix.is_none());

    // Declared routes without default_target: no catch-all
    let config = Config::from_toml_str(
        r#"
        [[routes]]
        target = "http://a:1"
        "#,
    )
    .unwrap();
    assert_eq!(config.effective_routes().len(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation
// ─────────────────────────────────────────────────────────────────────────────

fn load_err(toml: &str) -> String {
    format!("{:#}", Config::from_toml_str(toml).unwrap_err())
}

#[test]
fn test_route_without_target_rejected() {
    let err = load_err(
        r#"
        [[routes]]
        name = "lost"
        "#,
    );
    assert!(err.contains("lost"), "{}", err);
    assert!(err.contains("default_target"), "{}", err);
}

#[test]
fn test_invalid_target_rejected() {
    let err = load_err(
        r#"
        [[routes]]
        target = "ftp://nowhere"
        "#,
    );
    assert!(err.contains("http://"), "{}", err);
    assert!(load_err(r#"default_target = "http://""#).contains("no host"));
}

#[test]
fn test_invalid_model_pattern_rejected() {
    let err = load_err(
        r#"
        [[routes]]
        name = "bad"
        model = "qwq("
        target = "http://a:1"
        "#,
    );
    assert!(err.contains("invalid model pattern"), "{}", err);
}

#[test]
fn test_tag_action_parameters_required() {
    let err = load_err(
        r#"
        [[routes]]
        target = "http://a:1"
        [[routes.tags]]
        begin = "<a>"
        end = "</a>"
        action = "replace"
        "#,
    );
    assert!(err.contains("replacement"), "{}", err);

    let err = load_err(
        r#"
        [[routes]]
        target = "http://a:1"
        [[routes.tags]]
        begin = "<a>"
        end = "</a>"
        action = "rename"
        rename_begin = "<b>"
        "#,
    );
    assert!(err.contains("rename_end"), "{}", err);
}

#[test]
fn test_bad_delimiters_rejected() {
    let empty = load_err(
        r#"
        [[routes]]
        target = "http://a:1"
        [[routes.tags]]
        begin = ""
        end = "</a>"
        "#,
    );
    assert!(empty.contains("empty"), "{}", empty);

    let same = load_err(
        r#"
        [[routes]]
        target = "http://a:1"
        [[routes.tags]]
        begin = "|"
        end = "|"
        "#,
    );
    assert!(same.contains("begin and end"), "{}", same);

    let duplicate = load_err(
        r#"
        [[routes]]
        target = "http://a:1"
        [[routes.tags]]
        begin = "<t>"
        end = "</t>"
        [[routes.tags]]
        begin = "<t>"
        end = "</x>"
        "#,
    );
    assert!(duplicate.contains("declared twice"), "{}", duplicate);
}

#[test]
fn test_prefix_begin_delimiters_allowed() {
    let rules = vec![
        TagRule::new("<t", "</t>", TagAction::Strip),
        TagRule::new("<tool>", "</tool>", TagAction::Strip),
    ];
    assert!(validate_tag_rules(&rules).is_ok());
}

#[test]
fn test_non_numeric_logit_bias_rejected() {
    let err = load_err(
        r#"
        [[routes]]
        target = "http://a:1"
        logit_bias = { "42" = "strong" }
        "#,
    );
    assert!(err.contains("logit_bias"), "{}", err);
}

#[test]
fn test_unknown_top_level_key_rejected() {
    assert!(Config::from_toml_str("bind = \"1.2.3.4:5\"").is_err());
}

#[test]
fn test_misspelled_route_key_rejected() {
    let toml = r#"
        [[routes]]
        target = "http://a:1"
        upstream_modle = "x"
    "#;
    assert!(Config::from_toml_str(toml).is_err());
}

#[test]
fn test_log_rotation_parsing() {
    assert_eq!("Hourly".parse::<LogRotation>().unwrap(), LogRotation::Hourly);
    assert_eq!("never".parse::<LogRotation>().unwrap(), LogRotation::Never);

    let err = load_err("[logging]\nfile_rotation = \"weekly\"");
    assert!(err.contains("weekly"), "{}", err);
}

#[test]
fn test_zero_relay_buffer_rejected() {
    assert!(load_err("relay_buffer = 0").contains("relay_buffer"));
}

#[test]
fn test_zero_limits_rejected() {
    assert!(load_err("max_frame_bytes = 0").contains("max_frame_bytes"));
    assert!(load_err("max_body_bytes = 0").contains("max_body_bytes"));
    let config = Config::from_toml_str("max_frame_bytes = 4096").unwrap();
    assert_eq!(config.max_frame_bytes, 4096);
}

// ─────────────────────────────────────────────────────────────────────────────
// Files
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_system_prompt_file_relative_to_config() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("prompt.txt"), "From a file.\n").unwrap();

    let config_path = dir.path().join("config.toml");
    let mut f = std::fs::File::create(&config_path).unwrap();
    writeln!(
        f,
        r#"
        [[routes]]
        target = "http://a:1"
        system_prompt_file = "prompt.txt"
        "#
    )
    .unwrap();

    let overrides = ConfigOverrides {
        path: Some(config_path.clone()),
        ..Default::default()
    };
    let config = Config::load(&overrides).unwrap();
    assert_eq!(config.routes[0].system_prompt.as_deref(), Some("From a file."));
    assert_eq!(config.source.as_deref(), Some(config_path.as_path()));
}

#[test]
fn test_unreadable_prompt_file_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        "[[routes]]\ntarget = \"http://a:1\"\nsystem_prompt_file = \"missing.txt\"\n",
    )
    .unwrap();

    let overrides = ConfigOverrides {
        path: Some(config_path),
        ..Default::default()
    };
    let err = format!("{:#}", Config::load(&overrides).unwrap_err());
    assert!(err.contains("missing.txt"), "{}", err);
}

#[test]
fn test_explicit_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let overrides = ConfigOverrides {
        path: Some(dir.path().join("nope.toml")),
        ..Default::default()
    };
    assert!(Config::load(&overrides).is_err());
}

#[test]
fn test_flags_override_file() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    std::fs::write(&config_path, "bind_addr = \"127.0.0.1:1111\"\n").unwrap();

    let overrides = ConfigOverrides {
        path: Some(config_path),
        bind: Some("127.0.0.1:2222".to_string()),
        target: Some("http://flag-target:1".to_string()),
    };
    let config = Config::load(&overrides).unwrap();
    assert_eq!(config.bind_addr.to_string(), "127.0.0.1:2222");
    assert_eq!(config.default_target.as_deref(), Some("http://flag-target:1"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Round-trip tests
// ─────────────────────────────────────────────────────────────────────────────

/// The first-run template must load
#[test]
fn test_default_template_roundtrip() {
    let toml_str = Config::default().to_toml();
    let parsed = Config::from_toml_str(&toml_str);
    assert!(
        parsed.is_ok(),
        "Default config should round-trip.\nTOML:\n{}\nError: {:?}",
        toml_str,
        parsed.err()
    );
}

#[test]
fn test_populated_config_roundtrip() {
    let config = Config::from_toml_str(FULL_CONFIG).unwrap();
    let toml_str = config.to_toml();
    let parsed = Config::from_toml_str(&toml_str)
        .unwrap_or_else(|e| panic!("TOML:\n{}\nError: {:#}", toml_str, e));

    assert_eq!(parsed.bind_addr, config.bind_addr);
    assert_eq!(parsed.default_target, config.default_target);
    assert_eq!(parsed.routes.len(), config.routes.len());
    for (a, b) in parsed.routes.iter().zip(&config.routes) {
        assert_eq!(a.name, b.name);
        assert_eq!(a.target, b.target);
        assert_eq!(a.model, b.model);
        assert_eq!(a.label, b.label);
        assert_eq!(a.overrides, b.overrides);
        assert_eq!(a.logit_bias, b.logit_bias);
        assert_eq!(a.tags, b.tags);
    }
}
