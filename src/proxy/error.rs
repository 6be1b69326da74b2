//! Proxy error types and response handling
//!
//! Errors raised before any response byte reached the client become an
//! OpenAI-style JSON error body:
//!
//! ```json
//! {"error": {"message": "...", "type": "relay_error", "code": "upstream_timeout"}}
//! ```
//!
//! Once relaying has started the status line is gone; failures there end the
//! stream instead (see `session`).

use axum::{
    body::Body,
    http::{header, Response, StatusCode},
    response::IntoResponse,
};
use std::fmt;
use std::time::Duration;

/// Errors that can occur during proxying
#[derive(Debug)]
pub enum ProxyError {
    /// No route accepts this path/model
    NoRouteMatch { path: String, model: Option<String> },
    /// Backend did not answer in time
    UpstreamTimeout(Duration),
    /// Backend unreachable or the connection failed
    Upstream(String),
    /// Client body could not be read (too large, aborted)
    BodyRead(String),
    /// Outbound or client response could not be assembled
    ResponseBuild(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoRouteMatch { .. } | ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::BodyRead(_) => StatusCode::BAD_REQUEST,
            ProxyError::ResponseBuild(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code for the `error.code` field
    pub fn code(&self) -> &'static str {
        match self {
            ProxyError::NoRouteMatch { .. } => "no_route_match",
            ProxyError::UpstreamTimeout(_) => "upstream_timeout",
            ProxyError::Upstream(_) => "upstream_error",
            ProxyError::BodyRead(_) => "invalid_request_body",
            ProxyError::ResponseBuild(_) => "internal_error",
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ProxyError::BodyRead(_) => "invalid_request_error",
            _ => "relay_error",
        }
    }
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::NoRouteMatch { path, model } => match model {
                Some(model) => write!(f, "no route matches {} (model {:?})", path, model),
                None => write!(f, "no route matches {}", path),
            },
            ProxyError::UpstreamTimeout(after) => {
                write!(f, "upstream did not respond within {}s", after.as_secs())
            }
            ProxyError::Upstream(msg) => write!(f, "upstream request failed: {}", msg),
            ProxyError::BodyRead(msg) => write!(f, "failed to read request body: {}", msg),
            ProxyError::ResponseBuild(msg) => write!(f, "failed to build response: {}", msg),
        }
    }
}

impl std::error::Error for ProxyError {}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response<Body> {
        let status = self.status();

        match self {
            ProxyError::NoRouteMatch { .. } | ProxyError::BodyRead(_) => {
                tracing::warn!("Proxy error: {} - {}", status, self)
            }
            _ => tracing::error!("Proxy error: {} - {}", status, self),
        }

        let body = serde_json::json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
                "code": self.code(),
            }
        });

        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap_or_else(|_| Response::new(Body::from("Internal error building error response")))
    }
}
