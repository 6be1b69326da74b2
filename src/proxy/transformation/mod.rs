//! Request transformation pipeline
//!
//! Every route owns a pipeline that rewrites the outbound JSON body before it
//! is forwarded to the backend: model name rewriting, parameter overrides,
//! default logit biases, system prompt injection and text appended to the
//! last user message.
//!
//! # Architecture
//!
//! ```text
//! Request Body → TransformationPipeline → [Transformer₁, Transformer₂, ...] → Modified Body
//! ```
//!
//! Transformers can:
//! - **Pass through**: Return `TransformResult::Unchanged` (zero-cost)
//! - **Transform**: Return `TransformResult::Modified(body)`
//! - **Error**: Return `TransformResult::Error(e)`, logged, pipeline continues
//!
//! # Fail-Safe Guarantee
//!
//! The pipeline ALWAYS returns - one transformer failing never breaks the request.
//! Worst case: the original unmodified request goes through.

mod logit_bias;
mod messages;
mod model;
mod overrides;

pub use logit_bias::WeakLogitBias;
pub use messages::{AppendToLastUser, SystemPromptInjector};
pub use model::ModelRewrite;
pub use overrides::{OverrideMode, ParamOverride, ParamOverrides};

use serde_json::Value;
use std::borrow::Cow;

use crate::config::RouteConfig;

// ============================================================================
// Transform Result
// ============================================================================

/// Result of transforming a request
#[derive(Debug)]
pub enum TransformResult {
    /// Request unchanged - zero-copy passthrough
    Unchanged,

    /// Request modified - use this new body
    Modified(Value),

    /// Error during transformation - log and continue with current body
    Error(anyhow::Error),
}

// ============================================================================
// Transform Context
// ============================================================================

/// What the router learned about the request
#[derive(Debug, Clone, Copy, Default)]
pub struct TransformContext<'a> {
    /// Request path (e.g., "/v1/chat/completions")
    pub path: &'a str,

    /// Requested model with any `@label` suffix removed
    pub model: Option<&'a str>,

    /// The `@label` suffix of the requested model, if any
    pub label: Option<&'a str>,
}

impl<'a> TransformContext<'a> {
    pub fn new(path: &'a str, model: Option<&'a str>, label: Option<&'a str>) -> Self {
        Self { path, model, label }
    }
}

// ============================================================================
// Request Transformer Trait
// ============================================================================

/// Trait for request transformers
///
/// Transformers are called in registration order. `transform` is synchronous;
/// anything it needs from the outside is resolved at config load.
///
/// Implementations should return `TransformResult::Error` rather than
/// panicking. The pipeline logs the error and continues with the current body.
pub trait RequestTransformer: Send + Sync {
    /// Human-readable name for logging and debugging
    fn name(&self) -> &'static str;

    /// Check if this transformer should run for this request
    fn should_apply(&self, ctx: &TransformContext) -> bool;

    /// Transform the request body
    fn transform(&self, body: &Value, ctx: &TransformContext) -> TransformResult;
}

// ============================================================================
// Transformation Pipeline
// ============================================================================

/// Pipeline that runs requests through registered transformers
pub struct TransformationPipeline {
    transformers: Vec<Box<dyn RequestTransformer>>,
}

impl TransformationPipeline {
    /// Create an empty pipeline (passthrough)
    pub fn new() -> Self {
        Self {
            transformers: Vec::new(),
        }
    }

    /// Build the pipeline for one route
    ///
    /// Order: model rewrite, overrides, logit bias, system prompt, last user
    /// message.
    /// Overrides see the request as the client sent it (only `model` may have
    /// been rewritten), so `set_if_absent` checks the original keys.
    pub fn for_route(route: &RouteConfig) -> Self {
        let mut pipeline = Self::new();

        pipeline.register(ModelRewrite::new(route.upstream_model.clone()));

        if !route.overrides.is_empty() {
            pipeline.register(ParamOverrides::new(route.overrides.clone()));
        }
        if !route.logit_bias.is_empty() {
            pipeline.register(WeakLogitBias::new(route.logit_bias.clone()));
        }
        if let Some(prompt) = &route.system_prompt {
            pipeline.register(SystemPromptInjector::new(prompt.clone()));
        }
        if let Some(text) = &route.append_to_last_user {
            pipeline.register(AppendToLastUser::new(text.clone()));
        }

        tracing::debug!(
            route = %route.name,
            transformers = ?pipeline.transformer_names(),
            "Built transformation pipeline"
        );
        pipeline
    }

    /// Register a transformer
    pub fn register(&mut self, transformer: impl RequestTransformer + 'static) {
        self.transformers.push(Box::new(transformer));
    }

    /// Process a request through all registered transformers
    ///
    /// Uses `Cow` internally to avoid cloning when all transformers pass through.
    pub fn transform<'a>(&self, body: &'a Value, ctx: &TransformContext) -> TransformResult {
        if self.transformers.is_empty() {
            return TransformResult::Unchanged;
        }

        let mut current: Cow<'a, Value> = Cow::Borrowed(body);

        for transformer in &self.transformers {
            if !transformer.should_apply(ctx) {
                continue;
            }

            match transformer.transform(current.as_ref(), ctx) {
                TransformResult::Unchanged => {}
                TransformResult::Modified(body) => {
                    tracing::debug!(
                        transformer = transformer.name(),
                        "Request body transformed"
                    );
                    current = Cow::Owned(body);
                }
                TransformResult::Error(error) => {
                    // LOG AND CONTINUE - never break the request
                    tracing::warn!(
                        transformer = transformer.name(),
                        error = %error,
                        "Transformer {} failed: {}, continuing with current body",
                        transformer.name(),
                        error
                    );
                }
            }
        }

        match current {
            Cow::Borrowed(_) => TransformResult::Unchanged,
            Cow::Owned(modified) => TransformResult::Modified(modified),
        }
    }

    /// Check if pipeline has any transformers
    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    /// Get names of registered transformers (for logging/debug)
    pub fn transformer_names(&self) -> Vec<&'static str> {
        self.transformers.iter().map(|t| t.name()).collect()
    }
}

impl Default for TransformationPipeline {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
