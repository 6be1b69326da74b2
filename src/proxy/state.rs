//! Proxy state shared by every request

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::Config;

use super::routing::RouteTable;

// ─────────────────────────────────────────────────────────────────────────────
// Relay Settings
// ─────────────────────────────────────────────────────────────────────────────

/// Per-request limits taken from the configuration
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Bound on connect + send + response headers
    pub upstream_timeout: Duration,
    /// Longest gap between two backend body chunks
    pub read_timeout: Duration,
    /// Largest client body, and largest buffered backend body
    pub max_body_bytes: usize,
    /// Largest SSE frame the stream rewriter buffers
    pub max_frame_bytes: usize,
    /// Chunks buffered between backend reader and client
    pub relay_buffer: usize,
}

impl RelaySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            upstream_timeout: config.upstream_timeout,
            read_timeout: config.read_timeout,
            max_body_bytes: config.max_body_bytes,
            max_frame_bytes: config.max_frame_bytes,
            relay_buffer: config.relay_buffer,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Proxy State
// ─────────────────────────────────────────────────────────────────────────────

/// Shared state for the proxy server
///
/// Everything in here is read-only once the server starts; sessions never
/// share mutable state.
#[derive(Clone)]
pub struct ProxyState {
    /// HTTP client for forwarding requests
    pub(super) client: reqwest::Client,
    /// Routes in match order
    pub(super) routes: Arc<RouteTable>,
    pub(super) settings: Arc<RelaySettings>,
}

impl ProxyState {
    pub fn from_config(config: &Config) -> Result<Self> {
        let routes = RouteTable::from_config(&config.effective_routes())
            .context("Failed to build route table")?;

        Ok(Self {
            client: build_client(config.upstream_timeout)?,
            routes: Arc::new(routes),
            settings: Arc::new(RelaySettings::from_config(config)),
        })
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }
}

/// HTTP client for backend requests
///
/// No overall request timeout: streamed responses can legitimately run for
/// minutes. The handler bounds the time to response headers and each body
/// read separately. No default User-Agent either; the client's is forwarded.
fn build_client(connect_timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .pool_max_idle_per_host(10)
        // Force HTTP/1.1 to avoid HTTP/2 connection reset issues with some backends
        .http1_only()
        .build()
        .context("Failed to create HTTP client")
}
