//! Request routing
//!
//! Routes are tried in declaration order and the first match wins. A route
//! matches when every predicate it declares holds:
//!
//! - `path_prefix`: the request path starts with it
//! - `model`: the regex matches the requested model name (label removed)
//! - `label`: the request asked for `model@label` with exactly this label
//!
//! A route without a `label` accepts any label; the label is still removed
//! before the request is forwarded.

use std::sync::Arc;

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::Value;

use super::error::ProxyError;
use super::rewrite::TagRule;
use super::transformation::{TransformContext, TransformResult, TransformationPipeline};
use crate::config::RouteConfig;

/// Split `base@label` into its parts; an empty label counts as none
pub fn split_model(model: &str) -> (&str, Option<&str>) {
    match model.rsplit_once('@') {
        Some((base, label)) if !label.is_empty() => (base, Some(label)),
        Some((base, _)) => (base, None),
        None => (model, None),
    }
}

// ============================================================================
// Route
// ============================================================================

pub struct Route {
    pub name: String,
    path_prefix: Option<String>,
    model: Option<Regex>,
    label: Option<String>,
    /// Base URL without trailing slash
    pub target: String,
    /// Rules for the response, shared by every session on this route
    pub tags: Arc<[TagRule]>,
    pipeline: TransformationPipeline,
}

impl Route {
    pub fn from_config(config: &RouteConfig) -> Result<Self> {
        let model = config
            .model
            .as_deref()
            .map(Regex::new)
            .transpose()
            .with_context(|| format!("route {:?}: invalid model pattern", config.name))?;

        Ok(Self {
            name: config.name.clone(),
            path_prefix: config.path_prefix.clone(),
            model,
            label: config.label.clone(),
            target: config.target.trim_end_matches('/').to_string(),
            tags: Arc::from(config.tags.clone()),
            pipeline: TransformationPipeline::for_route(config),
        })
    }

    fn matches(&self, path: &str, model: Option<&str>, label: Option<&str>) -> bool {
        if let Some(prefix) = &self.path_prefix {
            if !path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(pattern) = &self.model {
            match model {
                Some(model) if pattern.is_match(model) => {}
                _ => return false,
            }
        }
        if let Some(required) = &self.label {
            if label != Some(required.as_str()) {
                return false;
            }
        }
        true
    }

    /// Backend URL for a client request target (path plus query)
    pub fn upstream_url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.target, path_and_query)
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("transformers", &self.pipeline.transformer_names())
            .finish()
    }
}

// ============================================================================
// Route Table
// ============================================================================

/// Outcome of routing one request
#[derive(Debug)]
pub struct Resolved {
    pub route: Arc<Route>,
    /// Rewritten request body; `None` means forward the original bytes
    pub body: Option<Value>,
}

#[derive(Debug)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    pub fn from_config(routes: &[RouteConfig]) -> Result<Self> {
        let routes = routes
            .iter()
            .map(|r| Route::from_config(r).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { routes })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Route>> {
        self.routes.iter()
    }

    /// Pick the route for a request and rewrite its body
    ///
    /// `body` is the parsed JSON request, if it was JSON at all. Requests
    /// without a JSON body can only match routes without a `model` pattern,
    /// and are forwarded untouched.
    pub fn resolve(&self, path: &str, body: Option<&Value>) -> Result<Resolved, ProxyError> {
        let requested = body.and_then(|b| b.get("model")).and_then(Value::as_str);
        let (model, label) = match requested {
            Some(m) => {
                let (base, label) = split_model(m);
                (Some(base), label)
            }
            None => (None, None),
        };

        let Some(route) = self.routes.iter().find(|r| r.matches(path, model, label)) else {
            return Err(ProxyError::NoRouteMatch {
                path: path.to_string(),
                model: requested.map(String::from),
            });
        };

        tracing::debug!(
            route = %route.name,
            target = %route.target,
            model = ?model,
            label = ?label,
            "Route selected"
        );

        let body = body.and_then(|body| {
            let ctx = TransformContext::new(path, model, label);
            match route.pipeline.transform(body, &ctx) {
                TransformResult::Modified(body) => Some(body),
                TransformResult::Unchanged | TransformResult::Error(_) => None,
            }
        });

        Ok(Resolved {
            route: Arc::clone(route),
            body,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
