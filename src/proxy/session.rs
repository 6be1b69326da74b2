//! Proxy session lifecycle and response relaying
//!
//! One session is one client request and the backend exchange behind it:
//!
//! ```text
//! Routing → Forwarding → RelayingBuffered ─┐
//!                      → RelayingStreamed ─┴→ Closed(reason)
//!
//! any non-terminal state → Failed(kind)
//! ```
//!
//! `Closed` and `Failed` are terminal: later transitions are ignored.
//!
//! Streamed responses are relayed by a dedicated task feeding a bounded
//! channel. The task only reads the next backend chunk after the previous one
//! was accepted by the channel, so a slow client slows down the backend read
//! instead of growing a buffer. When the client goes away the receiver is
//! dropped and the task stops reading and drops the backend response.

use std::io;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

use super::error::ProxyError;
use super::rewrite::{self, TagRule};
use super::sse::EventStreamRewriter;
use super::state::RelaySettings;

// ============================================================================
// States
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The whole response reached the client
    Completed,
    /// The client went away mid-response (normal, not an error)
    ClientDisconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    NoRouteMatch,
    UpstreamTimeout,
    /// Backend went silent mid-body for longer than the read timeout
    ReadTimeout,
    Upstream,
    BodyRead,
    ResponseBuild,
}

impl From<&ProxyError> for FailureKind {
    fn from(err: &ProxyError) -> Self {
        match err {
            ProxyError::NoRouteMatch { .. } => FailureKind::NoRouteMatch,
            ProxyError::UpstreamTimeout(_) => FailureKind::UpstreamTimeout,
            ProxyError::Upstream(_) => FailureKind::Upstream,
            ProxyError::BodyRead(_) => FailureKind::BodyRead,
            ProxyError::ResponseBuild(_) => FailureKind::ResponseBuild,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Routing,
    Forwarding,
    RelayingBuffered,
    RelayingStreamed,
    Closed(CloseReason),
    Failed(FailureKind),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed(_) | SessionState::Failed(_))
    }
}

// ============================================================================
// Session
// ============================================================================

/// Lifecycle of one proxied request
#[derive(Debug)]
pub struct Session {
    id: String,
    state: SessionState,
    started: Instant,
}

impl Session {
    pub fn new(id: String) -> Self {
        Self {
            id,
            state: SessionState::Routing,
            started: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move to `next`; a terminal session stays where it is
    pub fn transition(&mut self, next: SessionState) -> bool {
        if self.state.is_terminal() {
            tracing::trace!(from = ?self.state, to = ?next, "Ignoring transition of finished session");
            return false;
        }

        tracing::debug!(from = ?self.state, to = ?next, "Session state");
        self.state = next;

        match next {
            SessionState::Closed(reason) => tracing::info!(
                reason = ?reason,
                elapsed_ms = self.started.elapsed().as_millis() as u64,
                "Session closed"
            ),
            SessionState::Failed(kind) => tracing::warn!(
                kind = ?kind,
                elapsed_ms = self.started.elapsed().as_millis() as u64,
                "Session failed"
            ),
            _ => {}
        }
        true
    }

    pub fn close(&mut self, reason: CloseReason) {
        self.transition(SessionState::Closed(reason));
    }

    pub fn fail(&mut self, kind: FailureKind) {
        self.transition(SessionState::Failed(kind));
    }

    /// Record a pre-relay failure and turn it into the client's error response
    pub fn reject(&mut self, err: ProxyError) -> axum::response::Response {
        use axum::response::IntoResponse;

        self.fail(FailureKind::from(&err));
        err.into_response()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // The handler future was dropped mid-flight: axum does that when the
        // client disconnects before the response is complete
        if !self.state.is_terminal() {
            self.close(CloseReason::ClientDisconnected);
        }
    }
}

// ============================================================================
// Buffered Relay
// ============================================================================

/// Read the whole backend body and apply the route's tag rules
///
/// Each chunk must arrive within `read_timeout`, and the body may not grow
/// past `max_body_bytes`.
pub async fn relay_buffered(
    session: &mut Session,
    mut response: reqwest::Response,
    tags: &Arc<[TagRule]>,
    settings: &RelaySettings,
) -> Result<Bytes, ProxyError> {
    session.transition(SessionState::RelayingBuffered);

    let read_timeout = settings.read_timeout;
    let mut body = BytesMut::new();
    loop {
        match tokio::time::timeout(read_timeout, response.chunk()).await {
            Err(_) => return Err(ProxyError::UpstreamTimeout(read_timeout)),
            Ok(Err(e)) => return Err(ProxyError::Upstream(e.to_string())),
            Ok(Ok(Some(chunk))) => {
                if body.len() + chunk.len() > settings.max_body_bytes {
                    return Err(ProxyError::Upstream(format!(
                        "backend response exceeds {} bytes",
                        settings.max_body_bytes
                    )));
                }
                body.extend_from_slice(&chunk);
            }
            Ok(Ok(None)) => break,
        }
    }

    let body = body.freeze();
    match rewrite::rewrite_buffered_body(&body, tags) {
        Some(rewritten) => {
            tracing::debug!(
                before = body.len(),
                after = rewritten.len(),
                "Rewrote buffered response"
            );
            Ok(Bytes::from(rewritten))
        }
        None => Ok(body),
    }
}

// ============================================================================
// Streamed Relay
// ============================================================================

type RelayItem = Result<Bytes, io::Error>;

/// Channel-backed client body
///
/// The sender goes to [`spawn_stream_relay`]; the body goes into the client
/// response.
pub fn stream_channel(capacity: usize) -> (mpsc::Sender<RelayItem>, Body) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tx, Body::from_stream(ReceiverStream::new(rx)))
}

/// Relay an SSE response through the tag rewriter on its own task
///
/// Failures after the first byte cannot change the status any more: the
/// task sends an error into the body, which aborts the client connection
/// (the client sees a truncated stream).
pub fn spawn_stream_relay(
    mut session: Session,
    response: reqwest::Response,
    tags: Arc<[TagRule]>,
    settings: &RelaySettings,
    tx: mpsc::Sender<RelayItem>,
) -> tokio::task::JoinHandle<()> {
    session.transition(SessionState::RelayingStreamed);

    let read_timeout = settings.read_timeout;
    let max_frame_bytes = settings.max_frame_bytes;
    let task = async move {
        let mut upstream = response.bytes_stream();
        let mut rewriter = EventStreamRewriter::new(tags, max_frame_bytes);
        let mut relayed: u64 = 0;

        loop {
            let next = tokio::select! {
                _ = tx.closed() => {
                    tracing::debug!(relayed, "Client closed stream, dropping backend response");
                    session.close(CloseReason::ClientDisconnected);
                    return;
                }
                next = tokio::time::timeout(read_timeout, upstream.next()) => next,
            };

            let out = match next {
                Err(_) => {
                    tracing::warn!(
                        timeout_secs = read_timeout.as_secs(),
                        "Backend stream stalled, aborting"
                    );
                    session.fail(FailureKind::ReadTimeout);
                    let _ = tx
                        .send(Err(io::Error::new(io::ErrorKind::TimedOut, "backend read timed out")))
                        .await;
                    return;
                }
                Ok(Some(Err(e))) => {
                    tracing::warn!(error = %e, "Backend stream failed, aborting");
                    session.fail(FailureKind::Upstream);
                    let _ = tx.send(Err(io::Error::other(e.to_string()))).await;
                    return;
                }
                Ok(Some(Ok(chunk))) => rewriter.feed(&chunk),
                Ok(None) => {
                    let tail = rewriter.finish();
                    if !tail.is_empty() && tx.send(Ok(tail)).await.is_err() {
                        session.close(CloseReason::ClientDisconnected);
                        return;
                    }
                    if !rewriter.is_done() {
                        tracing::debug!("Backend stream ended without [DONE]");
                    }
                    session.close(CloseReason::Completed);
                    return;
                }
            };

            if out.is_empty() {
                continue;
            }
            relayed += out.len() as u64;
            if tx.send(Ok(out)).await.is_err() {
                session.close(CloseReason::ClientDisconnected);
                return;
            }
        }
    };

    tokio::spawn(task.instrument(tracing::Span::current()))
}

// ============================================================================
// Tests
// ============================================================================
