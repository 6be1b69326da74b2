//! Main proxy handler - routes, forwards and relays every request

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, Response},
};
use bytes::Bytes;
use serde_json::Value;
use tracing::Instrument;

use super::error::ProxyError;
use super::helpers::{client_fingerprint, forward_request_header, forward_response_header};
use super::routing::Route;
use super::session::{self, CloseReason, Session, SessionState};
use super::sse::is_sse_response;
use super::state::ProxyState;
use crate::util::{generate_id, truncate_utf8_safe};

/// Request ready to go to the backend
struct Outbound {
    route: Arc<Route>,
    method: reqwest::Method,
    url: String,
    headers: HeaderMap,
    body: Bytes,
}

/// Entry point for every request that reaches the relay
pub(crate) async fn proxy_handler(
    State(state): State<ProxyState>,
    req: Request<Body>,
) -> Response<Body> {
    let id = generate_id();
    let span = tracing::info_span!(
        "session",
        id = %id,
        method = %req.method(),
        path = %req.uri().path(),
        client = tracing::field::Empty,
    );
    if let Some(fingerprint) = client_fingerprint(req.headers()) {
        span.record("client", fingerprint.as_str());
    }

    run_session(state, Session::new(id), req)
        .instrument(span)
        .await
}

async fn run_session(state: ProxyState, mut session: Session, req: Request<Body>) -> Response<Body> {
    let outbound = match prepare(&state, req).await {
        Ok(outbound) => outbound,
        Err(e) => return session.reject(e),
    };

    session.transition(SessionState::Forwarding);
    let response = match forward(&state, &outbound).await {
        Ok(response) => response,
        Err(e) => return session.reject(e),
    };

    let status = response.status();
    tracing::info!(
        route = %outbound.route.name,
        status = status.as_u16(),
        "Backend responded"
    );

    // Convert reqwest's StatusCode to axum's via u16
    let mut builder = Response::builder().status(status.as_u16());
    for (key, value) in response.headers() {
        if forward_response_header(key.as_str()) {
            builder = builder.header(key.as_str(), value.as_bytes().to_vec());
        }
    }

    if is_sse_response(response.headers()) {
        let (tx, body) = session::stream_channel(state.settings.relay_buffer);
        let client_response = match builder.body(body) {
            Ok(r) => r,
            Err(e) => return session.reject(ProxyError::ResponseBuild(e.to_string())),
        };

        session::spawn_stream_relay(
            session,
            response,
            Arc::clone(&outbound.route.tags),
            &state.settings,
            tx,
        );
        return client_response;
    }

    let body = match session::relay_buffered(
        &mut session,
        response,
        &outbound.route.tags,
        &state.settings,
    )
    .await
    {
        Ok(body) => body,
        Err(e) => return session.reject(e),
    };

    if !status.is_success() {
        tracing::debug!(
            body = %truncate_utf8_safe(&String::from_utf8_lossy(&body), 512),
            "Backend error body"
        );
    }

    match builder.body(Body::from(body)) {
        Ok(response) => {
            session.close(CloseReason::Completed);
            response
        }
        Err(e) => session.reject(ProxyError::ResponseBuild(e.to_string())),
    }
}

/// Read the client request, route it and build the backend request
async fn prepare(state: &ProxyState, req: Request<Body>) -> Result<Outbound, ProxyError> {
    let (parts, body) = req.into_parts();

    let bytes = axum::body::to_bytes(body, state.settings.max_body_bytes)
        .await
        .map_err(|e| ProxyError::BodyRead(e.to_string()))?;

    let json = if bytes.is_empty() {
        None
    } else {
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::debug!(error = %e, "Request body is not JSON, forwarding verbatim");
                None
            }
        }
    };

    let stream = json
        .as_ref()
        .and_then(|b| b.get("stream"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    tracing::debug!(
        "Stream mode: {}",
        if stream { "streaming" } else { "non-streaming" }
    );

    let resolved = state.routes.resolve(parts.uri.path(), json.as_ref())?;

    let body = match resolved.body {
        Some(rewritten) => serde_json::to_vec(&rewritten)
            .map(Bytes::from)
            .map_err(|e| ProxyError::ResponseBuild(e.to_string()))?,
        None => bytes,
    };

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = resolved.route.upstream_url(path_and_query);

    // Convert axum's Method to reqwest's Method via string
    let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
        .map_err(|e| ProxyError::Upstream(format!("Invalid HTTP method: {}", e)))?;

    Ok(Outbound {
        route: resolved.route,
        method,
        url,
        headers: parts.headers,
        body,
    })
}

/// Send the request; everything up to the response headers is bounded by
/// the upstream timeout
async fn forward(state: &ProxyState, outbound: &Outbound) -> Result<reqwest::Response, ProxyError> {
    tracing::debug!(url = %outbound.url, bytes = outbound.body.len(), "Forwarding");

    let mut request = state
        .client
        .request(outbound.method.clone(), &outbound.url)
        .body(outbound.body.clone());

    for (key, value) in outbound.headers.iter() {
        if forward_request_header(key.as_str()) {
            request = request.header(key.as_str(), value.as_bytes().to_vec());
        }
    }

    let timeout = state.settings.upstream_timeout;
    match tokio::time::timeout(timeout, request.send()).await {
        Err(_) => Err(ProxyError::UpstreamTimeout(timeout)),
        Ok(Err(e)) if e.is_timeout() => Err(ProxyError::UpstreamTimeout(timeout)),
        Ok(Err(e)) => Err(ProxyError::Upstream(e.to_string())),
        Ok(Ok(response)) => Ok(response),
    }
}
